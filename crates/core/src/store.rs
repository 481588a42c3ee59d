//! Collaborator contracts injected into the sync engine.
//!
//! The engine never touches application state directly; it receives one
//! narrow interface per concern. Local persistence is synchronous, remote
//! access is async — the only suspension points in a cycle are the
//! `RemoteDocumentStore` calls.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{RemoteStoreError, StoreError};
use crate::model::{AggregateList, AggregateMap, Collection, RecordEntry, Snapshot, SyncPhase};

/// Persisted key-value slot holding the serialized sync config document.
pub trait ConfigStore: Send + Sync {
    fn read(&self) -> Result<Option<String>, StoreError>;
    fn write(&self, raw: &str) -> Result<(), StoreError>;
    fn delete(&self) -> Result<(), StoreError>;
}

/// Holds the per-install vault key outside the config document.
///
/// A real application backs this with the OS keychain; tests use memory.
pub trait SecretStore: Send + Sync {
    /// Returns the 32-byte vault key, generating and persisting one on
    /// first use.
    fn vault_key(&self) -> Result<[u8; 32], StoreError>;
    fn delete_vault_key(&self) -> Result<(), StoreError>;
}

/// Read/write access to one local collection that participates in sync.
pub trait CollectionRepository: Send + Sync {
    /// Wire name of the collection, e.g. `"articleStates"`.
    fn name(&self) -> &str;

    /// Current local state of the collection. Record-map repositories
    /// recompute the tombstone set freshly from the local catalogue here;
    /// it is never persisted long-term.
    fn collect(&self) -> Result<Collection, StoreError>;

    /// Persist the merged collection, replacing local state wholesale.
    fn replace(&self, collection: &Collection) -> Result<(), StoreError>;

    /// Drop any read-through cache keyed to this collection.
    fn invalidate(&self);

    /// Ids present in the authoritative local record catalogue, used by the
    /// merge to drop records purged locally (retention policy etc.).
    /// `None` for aggregate collections and for record collections without
    /// a backing catalogue.
    fn known_record_ids(&self) -> Option<HashSet<String>> {
        None
    }

    /// Store recomputed derived scores for a record collection.
    fn apply_scores(&self, _scores: &BTreeMap<String, f64>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Pure relevance model: derives a numeric rank from a record's own fields
/// plus the aggregate weight and filter collections.
pub trait ScoreModel: Send + Sync {
    fn score(&self, record: &RecordEntry, weights: &AggregateMap, filters: &AggregateList) -> f64;
}

/// UI-side observer for sync progress and data refreshes.
pub trait SyncListener: Send + Sync {
    fn phase_changed(&self, _phase: SyncPhase) {}
    fn refresh_requested(&self) {}
}

/// No-op listener for headless use and tests.
pub struct NullListener;

impl SyncListener for NullListener {}

/// Receipt of a successful remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub document_id: String,
    pub last_modified: DateTime<Utc>,
}

/// A remote document read in full.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub snapshot: Snapshot,
    pub last_modified: DateTime<Utc>,
}

/// Wire-level access to the single remote JSON document.
///
/// Full-document semantics only: the document is always read and written
/// whole. `create` runs exactly once per install, the first time no
/// document id is known locally.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    async fn create(&self, token: &str, doc: &Snapshot) -> Result<WriteReceipt, RemoteStoreError>;

    async fn read(&self, token: &str, document_id: &str)
        -> Result<RemoteDocument, RemoteStoreError>;

    async fn update(
        &self,
        token: &str,
        document_id: &str,
        doc: &Snapshot,
    ) -> Result<WriteReceipt, RemoteStoreError>;

    /// Lightweight metadata read: only the document's modification
    /// timestamp, never the body.
    async fn read_metadata(
        &self,
        token: &str,
        document_id: &str,
    ) -> Result<DateTime<Utc>, RemoteStoreError>;
}
