//! One sync cycle: conflict guard → read → merge → write → apply.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::apply::ApplyEngine;
use crate::conflict::ConflictDetector;
use crate::errors::RemoteStoreError;
use crate::merge::{merge, MergeContext};
use crate::model::{Snapshot, SyncConfig, SyncOutcome, SyncPhase};
use crate::store::{CollectionRepository, RemoteDocumentStore, SyncListener};
use crate::tracker::ChangeTracker;
use crate::vault::CredentialVault;

/// Runs individual sync cycles. Mutual exclusion between cycles lives in
/// `SyncService`; the engine assumes it is the only cycle in flight.
pub struct SyncEngine {
    vault: Arc<CredentialVault>,
    remote: Arc<dyn RemoteDocumentStore>,
    conflicts: ConflictDetector,
    repositories: Vec<Arc<dyn CollectionRepository>>,
    apply: ApplyEngine,
    tracker: Arc<ChangeTracker>,
    listener: Arc<dyn SyncListener>,
}

impl SyncEngine {
    pub fn new(
        vault: Arc<CredentialVault>,
        remote: Arc<dyn RemoteDocumentStore>,
        repositories: Vec<Arc<dyn CollectionRepository>>,
        apply: ApplyEngine,
        tracker: Arc<ChangeTracker>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            vault,
            remote: remote.clone(),
            conflicts: ConflictDetector::new(remote),
            repositories,
            apply,
            tracker,
            listener,
        }
    }

    /// Full cycle against the current config. Never writes remotely after a
    /// detected conflict; never applies locally after a failed write.
    pub async fn run_cycle(&self) -> SyncOutcome {
        let (mut config, token) = match self.configured() {
            Some(pair) => pair,
            None => return SyncOutcome::NotConfigured,
        };

        self.listener.phase_changed(SyncPhase::Checking);
        if let Some(document_id) = config.document_id.clone() {
            match self
                .conflicts
                .has_newer_remote(&token, &document_id, &config)
                .await
            {
                Ok(true) => {
                    info!("[Sync] Remote changed since last read, aborting before write");
                    self.listener.phase_changed(SyncPhase::Idle);
                    return SyncOutcome::ConflictDetected;
                }
                Ok(false) => {}
                Err(e) => return self.fail("conflict check", e),
            }
        }

        self.listener.phase_changed(SyncPhase::Pulling);
        let remote_doc = match config.document_id.clone() {
            Some(document_id) => match self.remote.read(&token, &document_id).await {
                Ok(doc) => Some(doc),
                Err(RemoteStoreError::MalformedDocument(e)) => {
                    warn!("[Sync] Remote document unreadable, merging as absent: {}", e);
                    None
                }
                Err(e) => return self.fail("remote read", e),
            },
            None => None,
        };

        self.listener.phase_changed(SyncPhase::Merging);
        // Marks from after this instant are not in the collected snapshot
        // and must survive the tracker reset at the end of the cycle.
        let now = Utc::now();
        let (local, ctx) = match self.collect_local(now) {
            Ok(pair) => pair,
            Err(e) => {
                self.listener.phase_changed(SyncPhase::Idle);
                return SyncOutcome::Failed(e);
            }
        };
        let merged = merge(&local, remote_doc.as_ref().map(|d| &d.snapshot), &ctx);

        self.listener.phase_changed(SyncPhase::Pushing);
        match &config.document_id {
            Some(document_id) => {
                if let Err(e) = self.remote.update(&token, document_id, &merged).await {
                    return self.fail("remote write", e);
                }
            }
            None => match self.remote.create(&token, &merged).await {
                Ok(receipt) => {
                    // Persist the new id before anything else can fail, or a
                    // crash would orphan the document and create another.
                    config.document_id = Some(receipt.document_id);
                    if let Err(e) = self.vault.save_config(&config) {
                        self.listener.phase_changed(SyncPhase::Idle);
                        return SyncOutcome::Failed(e.to_string());
                    }
                }
                Err(e) => return self.fail("remote create", e),
            },
        }

        self.listener.phase_changed(SyncPhase::Applying);
        if let Err(e) = self.apply.apply(&merged) {
            self.listener.phase_changed(SyncPhase::Idle);
            return SyncOutcome::Failed(e.to_string());
        }

        self.tracker.reset_if_marked_before(now);
        let finished = Utc::now();
        config.last_sync_time = Some(finished);
        config.last_read_time = Some(finished);
        config.last_known_remote_hash = Some(merged.checksum());
        if let Err(e) = self.vault.save_config(&config) {
            warn!("[Sync] Cycle succeeded but config save failed: {}", e);
        }

        self.listener.phase_changed(SyncPhase::Idle);
        SyncOutcome::Completed
    }

    /// Replace local state with the remote document as-is, skipping the
    /// merge. The caller-side resolution after `ConflictDetected`.
    pub async fn run_pull(&self) -> SyncOutcome {
        let (mut config, token) = match self.configured() {
            Some(pair) => pair,
            None => return SyncOutcome::NotConfigured,
        };
        let Some(document_id) = config.document_id.clone() else {
            return SyncOutcome::NotConfigured;
        };

        self.listener.phase_changed(SyncPhase::Pulling);
        let remote_doc = match self.remote.read(&token, &document_id).await {
            Ok(doc) => doc,
            Err(e) => return self.fail("remote read", e),
        };

        self.listener.phase_changed(SyncPhase::Applying);
        // Local edits up to this instant are overwritten by the pull; edits
        // landing after it still need a push of their own.
        let applied_at = Utc::now();
        if let Err(e) = self.apply.apply(&remote_doc.snapshot) {
            self.listener.phase_changed(SyncPhase::Idle);
            return SyncOutcome::Failed(e.to_string());
        }

        self.tracker.reset_if_marked_before(applied_at);
        let finished = Utc::now();
        config.last_read_time = Some(finished);
        config.last_sync_time = Some(finished);
        config.last_known_remote_hash = Some(remote_doc.snapshot.checksum());
        if let Err(e) = self.vault.save_config(&config) {
            warn!("[Sync] Pull succeeded but config save failed: {}", e);
        }

        self.listener.phase_changed(SyncPhase::Idle);
        SyncOutcome::Completed
    }

    fn configured(&self) -> Option<(SyncConfig, String)> {
        let config = self.vault.load();
        if !config.has_credential || !config.enabled {
            return None;
        }
        let token = self.vault.credential()?;
        Some((config, token))
    }

    /// Snapshot of every registered collection plus the catalogue ids the
    /// merge needs, both collected fresh for this cycle.
    fn collect_local(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> Result<(Snapshot, MergeContext), String> {
        let mut local = Snapshot::new(now);
        let mut ctx = MergeContext::new(now);
        for repo in &self.repositories {
            let collection = repo
                .collect()
                .map_err(|e| format!("collecting '{}': {}", repo.name(), e))?;
            if let Some(ids) = repo.known_record_ids() {
                ctx.known_ids.insert(repo.name().to_string(), ids);
            }
            local.collections.insert(repo.name().to_string(), collection);
        }
        Ok((local, ctx))
    }

    fn fail(&self, stage: &str, e: RemoteStoreError) -> SyncOutcome {
        warn!("[Sync] {} failed ({:?}): {}", stage, e.retry_class(), e);
        self.listener.phase_changed(SyncPhase::Idle);
        SyncOutcome::Failed(format!("{stage} failed: {e}"))
    }
}
