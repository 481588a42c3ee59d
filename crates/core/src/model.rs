//! Snapshot and sync-state domain models.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Schema version stamped into every remote document this client writes.
pub const SNAPSHOT_VERSION: &str = "2.0";

/// A flat key→weight mapping merged as one indivisible unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMap {
    pub entries: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

/// An ordered list merged as one indivisible unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateList {
    pub entries: Vec<Value>,
    pub last_updated: DateTime<Utc>,
}

/// Per-record state carrying its own modification timestamp.
///
/// Record fields are open-ended (read status, rating, pinned flag, derived
/// score, …); only `lastModified` is interpreted by the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    pub last_modified: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// A collection merged per individual record, with a tombstone set of ids
/// deliberately removed locally since the last successful read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMap {
    pub by_id: BTreeMap<String, RecordEntry>,
    #[serde(default)]
    pub deleted_ids: BTreeSet<String>,
}

/// One named collection inside a snapshot.
///
/// The wire form is shape-discriminated, not tagged: an object with `byId`
/// is a record map, an `entries` object is an aggregate map, an `entries`
/// array is an aggregate list. Anything else fails the whole document read,
/// which the engine treats as "absent remote".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Collection {
    Map(AggregateMap),
    List(AggregateList),
    Records(RecordMap),
}

impl Collection {
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Map(_) => "aggregate_map",
            Self::List(_) => "aggregate_list",
            Self::Records(_) => "record_map",
        }
    }

    pub fn as_map(&self) -> Option<&AggregateMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&AggregateList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&RecordMap> {
        match self {
            Self::Records(records) => Some(records),
            _ => None,
        }
    }
}

/// The full exchanged state for one sync cycle.
///
/// Constructed fresh per cycle and discarded after apply; `syncTime` is
/// informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: String,
    pub sync_time: DateTime<Utc>,
    pub collections: BTreeMap<String, Collection>,
}

impl Snapshot {
    pub fn new(sync_time: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            sync_time,
            collections: BTreeMap::new(),
        }
    }

    /// Canonical content checksum (`sha256:<hex>`) of the serialized body.
    ///
    /// BTreeMap keys keep the serialization stable, so equal snapshots hash
    /// equal regardless of construction order.
    pub fn checksum(&self) -> String {
        let body = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&body);
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("sha256:{}", hex)
    }
}

/// A merged snapshot ready to be written remotely and applied locally.
pub type MergeResult = Snapshot;

/// Per-install sync configuration, persisted through the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub has_credential: bool,
    pub document_id: Option<String>,
    pub enabled: bool,
    pub configured_at: Option<DateTime<Utc>>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_read_time: Option<DateTime<Utc>>,
    pub last_known_remote_hash: Option<String>,
}

impl SyncConfig {
    /// The empty/disabled config returned when nothing usable is persisted.
    pub fn disabled() -> Self {
        Self {
            has_credential: false,
            document_id: None,
            enabled: false,
            configured_at: None,
            last_sync_time: None,
            last_read_time: None,
            last_known_remote_hash: None,
        }
    }
}

/// Externally observable scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Result of one sync attempt, surfaced to the manual caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Full cycle ran: read, merge, write, apply.
    Completed,
    /// Another cycle already holds the mutual-exclusion flag; nothing queued.
    AlreadySyncing,
    /// No credential/config; sync feature is off.
    NotConfigured,
    /// Background trigger with a clean change flag.
    NoLocalChanges,
    /// Remote was written by another replica after our last read and write;
    /// aborted before any write. Caller decides between `force_pull` and
    /// leaving local state alone.
    ConflictDetected,
    Failed(String),
}

impl SyncOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Completed | Self::NoLocalChanges)
    }
}

/// Coarse progress phases reported to the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Checking,
    Pulling,
    Merging,
    Pushing,
    Applying,
}
