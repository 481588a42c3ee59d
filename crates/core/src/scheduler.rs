//! Public sync service: scheduling, mutual exclusion, lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::apply::{ApplyEngine, ScoringPlan};
use crate::engine::SyncEngine;
use crate::errors::VaultError;
use crate::model::{SyncOutcome, SyncStatus};
use crate::store::{CollectionRepository, RemoteDocumentStore, ScoreModel, SyncListener};
use crate::tracker::ChangeTracker;
use crate::vault::CredentialVault;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);
const MAX_START_JITTER_MS: u64 = 3_000;

/// Application-facing entry point for the sync feature.
///
/// One `is_syncing` flag serializes everything: manual, background and
/// pull cycles all race for it, the loser returns `AlreadySyncing` at once
/// and nothing is queued.
pub struct SyncService {
    engine: SyncEngine,
    vault: Arc<CredentialVault>,
    tracker: Arc<ChangeTracker>,
    is_syncing: AtomicBool,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    pub fn new(
        vault: Arc<CredentialVault>,
        remote: Arc<dyn RemoteDocumentStore>,
        repositories: Vec<Arc<dyn CollectionRepository>>,
        scoring: Option<(ScoringPlan, Arc<dyn ScoreModel>)>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        let tracker = Arc::new(ChangeTracker::new());
        let apply = ApplyEngine::new(repositories.clone(), scoring, listener.clone());
        let engine = SyncEngine::new(
            vault.clone(),
            remote,
            repositories,
            apply,
            tracker.clone(),
            listener,
        );
        Self {
            engine,
            vault,
            tracker,
            is_syncing: AtomicBool::new(false),
            periodic: Mutex::new(None),
        }
    }

    /// Flag any local mutation that should ride the next cycle.
    pub fn mark_changed(&self) {
        self.tracker.mark();
    }

    /// User-initiated cycle. Always runs (dirty or not) and surfaces the
    /// outcome.
    pub async fn run_manual(&self) -> SyncOutcome {
        if !self.try_begin() {
            return SyncOutcome::AlreadySyncing;
        }
        let outcome = self.engine.run_cycle().await;
        self.end();
        outcome
    }

    /// Timer-driven cycle: a no-op while the tracker is clean, and failures
    /// are logged rather than surfaced.
    pub async fn run_background(&self) -> SyncOutcome {
        if !self.tracker.is_dirty() {
            return SyncOutcome::NoLocalChanges;
        }
        if !self.try_begin() {
            return SyncOutcome::AlreadySyncing;
        }
        let outcome = self.engine.run_cycle().await;
        self.end();
        if let SyncOutcome::Failed(ref e) = outcome {
            warn!("[Sync] Background sync failed, will retry next interval: {}", e);
        }
        outcome
    }

    /// Overwrite local state with the remote document, discarding local
    /// changes. The resolution path after `ConflictDetected`.
    pub async fn force_pull(&self) -> SyncOutcome {
        if !self.try_begin() {
            return SyncOutcome::AlreadySyncing;
        }
        let outcome = self.engine.run_pull().await;
        self.end();
        outcome
    }

    pub fn get_status(&self) -> SyncStatus {
        let config = self.vault.load();
        SyncStatus {
            enabled: config.enabled && config.has_credential,
            is_syncing: self.is_syncing.load(Ordering::SeqCst),
            last_sync_time: config.last_sync_time,
        }
    }

    /// Spawn the periodic background loop, replacing any previous one.
    /// Start-up is jittered so replicas launched together do not probe the
    /// remote in lockstep.
    pub fn start_periodic(self: &Arc<Self>, interval: Duration) {
        self.stop_periodic();
        let service = Arc::clone(self);
        let jitter_ms = u64::from(Utc::now().timestamp_subsec_millis()) % MAX_START_JITTER_MS;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            info!("[Sync] Periodic sync started (every {:?})", interval);
            loop {
                tokio::time::sleep(interval).await;
                let _ = service.run_background().await;
            }
        });
        if let Ok(mut periodic) = self.periodic.lock() {
            *periodic = Some(handle);
        }
    }

    pub fn stop_periodic(&self) {
        if let Ok(mut periodic) = self.periodic.lock() {
            if let Some(handle) = periodic.take() {
                handle.abort();
                info!("[Sync] Periodic sync stopped");
            }
        }
    }

    /// Tear the feature down: stop the loop and forget credential, config
    /// and pending-change state. Local data is untouched.
    pub fn disconnect(&self) -> Result<(), VaultError> {
        self.stop_periodic();
        self.vault.disconnect()?;
        self.tracker.reset();
        Ok(())
    }

    fn try_begin(&self) -> bool {
        self.is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end(&self) {
        self.is_syncing.store(false, Ordering::SeqCst);
    }
}
