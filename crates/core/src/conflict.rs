//! Pre-write conflict guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::errors::RemoteStoreError;
use crate::model::SyncConfig;
use crate::store::RemoteDocumentStore;

/// Checks whether another replica wrote the remote document since this
/// install last saw it, using only the metadata endpoint.
///
/// The check is advisory: the remote can still change between this probe
/// and the subsequent write. The remote contract offers no conditional
/// write, so that window is accepted.
pub struct ConflictDetector {
    remote: Arc<dyn RemoteDocumentStore>,
}

impl ConflictDetector {
    pub fn new(remote: Arc<dyn RemoteDocumentStore>) -> Self {
        Self { remote }
    }

    /// True iff the remote document was modified strictly after both the
    /// last read and the last successful sync.
    pub async fn has_newer_remote(
        &self,
        token: &str,
        document_id: &str,
        config: &SyncConfig,
    ) -> Result<bool, RemoteStoreError> {
        let remote_modified = self.remote.read_metadata(token, document_id).await?;
        let newer = is_newer_than_watermarks(remote_modified, config);
        if newer {
            debug!(
                "[Sync] Remote modified at {} is newer than lastRead={:?} lastSync={:?}",
                remote_modified, config.last_read_time, config.last_sync_time
            );
        }
        Ok(newer)
    }
}

/// A missing watermark means this install never observed the remote, so
/// there is nothing to conflict with; first contact merges instead of
/// aborting.
pub fn is_newer_than_watermarks(remote_modified: DateTime<Utc>, config: &SyncConfig) -> bool {
    match (config.last_read_time, config.last_sync_time) {
        (Some(read), Some(sync)) => remote_modified > read && remote_modified > sync,
        _ => false,
    }
}
