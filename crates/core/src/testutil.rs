//! In-memory collaborator doubles shared across the crate's unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{RemoteStoreError, StoreError};
use crate::model::{Collection, Snapshot, SyncPhase};
use crate::store::{
    CollectionRepository, ConfigStore, RemoteDocument, RemoteDocumentStore, SecretStore,
    SyncListener, WriteReceipt,
};
use crate::vault::generate_vault_key;

#[derive(Default)]
pub struct MemoryConfigStore {
    slot: Mutex<Option<String>>,
}

impl ConfigStore for MemoryConfigStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    fn write(&self, raw: &str) -> Result<(), StoreError> {
        *self.slot.lock().unwrap() = Some(raw.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    key: Mutex<Option<[u8; 32]>>,
}

impl SecretStore for MemorySecretStore {
    fn vault_key(&self) -> Result<[u8; 32], StoreError> {
        let mut key = self.key.lock().unwrap();
        Ok(*key.get_or_insert_with(generate_vault_key))
    }

    fn delete_vault_key(&self) -> Result<(), StoreError> {
        *self.key.lock().unwrap() = None;
        Ok(())
    }
}

/// A collection repository over an in-memory `Collection`, recording every
/// mutation the engine performs on it.
pub struct MemoryCollection {
    name: String,
    data: Mutex<Collection>,
    known_ids: Option<HashSet<String>>,
    pub replace_calls: AtomicUsize,
    pub invalidate_calls: AtomicUsize,
    pub scores: Mutex<Option<BTreeMap<String, f64>>>,
}

impl MemoryCollection {
    pub fn new(name: &str, data: Collection) -> Self {
        Self {
            name: name.to_string(),
            data: Mutex::new(data),
            known_ids: None,
            replace_calls: AtomicUsize::new(0),
            invalidate_calls: AtomicUsize::new(0),
            scores: Mutex::new(None),
        }
    }

    pub fn with_known_ids(mut self, ids: impl IntoIterator<Item = &'static str>) -> Self {
        self.known_ids = Some(ids.into_iter().map(str::to_string).collect());
        self
    }

    pub fn current(&self) -> Collection {
        self.data.lock().unwrap().clone()
    }
}

impl CollectionRepository for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> Result<Collection, StoreError> {
        Ok(self.data.lock().unwrap().clone())
    }

    fn replace(&self, collection: &Collection) -> Result<(), StoreError> {
        *self.data.lock().unwrap() = collection.clone();
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn invalidate(&self) {
        self.invalidate_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn known_record_ids(&self) -> Option<HashSet<String>> {
        self.known_ids.clone()
    }

    fn apply_scores(&self, scores: &BTreeMap<String, f64>) -> Result<(), StoreError> {
        *self.scores.lock().unwrap() = Some(scores.clone());
        Ok(())
    }
}

/// Scripted remote document store. Each call is appended to `calls`; reads
/// and writes run against an in-memory document slot unless a failure is
/// scripted first.
pub struct ScriptedRemote {
    pub calls: Mutex<Vec<String>>,
    document: Mutex<Option<RemoteDocument>>,
    fail_update: Mutex<Option<RemoteStoreError>>,
    fail_read: Mutex<Option<RemoteStoreError>>,
    metadata_override: Mutex<Option<DateTime<Utc>>>,
}

impl ScriptedRemote {
    pub fn empty() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            document: Mutex::new(None),
            fail_update: Mutex::new(None),
            fail_read: Mutex::new(None),
            metadata_override: Mutex::new(None),
        }
    }

    pub fn with_document(snapshot: Snapshot, last_modified: DateTime<Utc>) -> Self {
        let remote = Self::empty();
        *remote.document.lock().unwrap() = Some(RemoteDocument {
            snapshot,
            last_modified,
        });
        remote
    }

    pub fn fail_next_update(&self, err: RemoteStoreError) {
        *self.fail_update.lock().unwrap() = Some(err);
    }

    pub fn fail_next_read(&self, err: RemoteStoreError) {
        *self.fail_read.lock().unwrap() = Some(err);
    }

    /// Make the metadata probe report a different timestamp than the stored
    /// document, simulating a write from another replica.
    pub fn override_metadata(&self, last_modified: DateTime<Utc>) {
        *self.metadata_override.lock().unwrap() = Some(last_modified);
    }

    pub fn stored_snapshot(&self) -> Option<Snapshot> {
        self.document.lock().unwrap().as_ref().map(|d| d.snapshot.clone())
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl RemoteDocumentStore for ScriptedRemote {
    async fn create(&self, _token: &str, doc: &Snapshot) -> Result<WriteReceipt, RemoteStoreError> {
        self.record("create");
        let now = Utc::now();
        *self.document.lock().unwrap() = Some(RemoteDocument {
            snapshot: doc.clone(),
            last_modified: now,
        });
        Ok(WriteReceipt {
            document_id: "doc-created".to_string(),
            last_modified: now,
        })
    }

    async fn read(
        &self,
        _token: &str,
        document_id: &str,
    ) -> Result<RemoteDocument, RemoteStoreError> {
        self.record("read");
        if let Some(err) = self.fail_read.lock().unwrap().take() {
            return Err(err);
        }
        self.document
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RemoteStoreError::api(404, format!("no document {document_id}")))
    }

    async fn update(
        &self,
        _token: &str,
        _document_id: &str,
        doc: &Snapshot,
    ) -> Result<WriteReceipt, RemoteStoreError> {
        self.record("update");
        if let Some(err) = self.fail_update.lock().unwrap().take() {
            return Err(err);
        }
        let now = Utc::now();
        *self.document.lock().unwrap() = Some(RemoteDocument {
            snapshot: doc.clone(),
            last_modified: now,
        });
        Ok(WriteReceipt {
            document_id: "doc-1".to_string(),
            last_modified: now,
        })
    }

    async fn read_metadata(
        &self,
        _token: &str,
        document_id: &str,
    ) -> Result<DateTime<Utc>, RemoteStoreError> {
        self.record("read_metadata");
        if let Some(overridden) = *self.metadata_override.lock().unwrap() {
            return Ok(overridden);
        }
        self.document
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.last_modified)
            .ok_or_else(|| RemoteStoreError::api(404, format!("no document {document_id}")))
    }
}

/// Listener recording phases and refresh requests.
#[derive(Default)]
pub struct RecordingListener {
    pub phases: Mutex<Vec<SyncPhase>>,
    pub refreshes: AtomicUsize,
}

impl SyncListener for RecordingListener {
    fn phase_changed(&self, phase: SyncPhase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn refresh_requested(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}
