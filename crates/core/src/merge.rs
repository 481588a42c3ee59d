//! Snapshot merge: combines a local and a remote snapshot per-collection.
//!
//! Aggregate collections resolve whole-collection last-writer-wins on their
//! single `lastUpdated` timestamp; record collections resolve per record on
//! `lastModified`, with local tombstones and the local record catalogue
//! filtering out anything deliberately removed or expired. The merge is
//! deterministic: the only timestamp it introduces is the `now` passed in.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use log::warn;

use crate::model::{
    AggregateList, AggregateMap, Collection, MergeResult, RecordMap, Snapshot, SNAPSHOT_VERSION,
};

/// Per-cycle inputs the merge needs beyond the two snapshots.
#[derive(Debug, Default)]
pub struct MergeContext {
    /// Authoritative catalogue ids per record collection name. Records
    /// missing from their catalogue are dropped from the result so a stale
    /// remote copy cannot resurrect them.
    pub known_ids: std::collections::BTreeMap<String, HashSet<String>>,
    pub now: DateTime<Utc>,
}

impl MergeContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            known_ids: Default::default(),
            now,
        }
    }
}

/// Merge `local` with `remote` into a fresh snapshot.
///
/// `remote == None` (first sync, or an unreadable remote body) yields the
/// local collections unchanged under a fresh header.
pub fn merge(local: &Snapshot, remote: Option<&Snapshot>, ctx: &MergeContext) -> MergeResult {
    let mut result = Snapshot {
        version: SNAPSHOT_VERSION.to_string(),
        sync_time: ctx.now,
        collections: Default::default(),
    };

    let Some(remote) = remote else {
        result.collections = local.collections.clone();
        return result;
    };

    let names: BTreeSet<&String> = local
        .collections
        .keys()
        .chain(remote.collections.keys())
        .collect();

    for name in names {
        let merged = match (local.collections.get(name), remote.collections.get(name)) {
            (Some(ours), Some(theirs)) => merge_collection(name, ours, theirs, ctx),
            (Some(ours), None) => ours.clone(),
            (None, Some(theirs)) => adopt_remote_only(name, theirs, ctx),
            (None, None) => continue,
        };
        result.collections.insert(name.clone(), merged);
    }

    result
}

fn merge_collection(
    name: &str,
    ours: &Collection,
    theirs: &Collection,
    ctx: &MergeContext,
) -> Collection {
    match (ours, theirs) {
        (Collection::Map(local), Collection::Map(remote)) => {
            Collection::Map(merge_aggregate_map(local, remote, ctx.now))
        }
        (Collection::List(local), Collection::List(remote)) => {
            Collection::List(merge_aggregate_list(local, remote, ctx.now))
        }
        (Collection::Records(local), Collection::Records(remote)) => Collection::Records(
            merge_record_map(local, Some(remote), ctx.known_ids.get(name)),
        ),
        (local, remote) => {
            // Reserved merge-ambiguity case: the remote side does not match
            // the local shape. Fail open to local.
            warn!(
                "[Sync] Collection '{}' shape mismatch (local={}, remote={}); keeping local",
                name,
                local.shape_name(),
                remote.shape_name()
            );
            local.clone()
        }
    }
}

/// A collection the local side has never initialized: take the remote copy,
/// still subject to the catalogue filter for record maps.
fn adopt_remote_only(name: &str, theirs: &Collection, ctx: &MergeContext) -> Collection {
    match theirs {
        Collection::Records(remote) => {
            let local = RecordMap {
                by_id: Default::default(),
                deleted_ids: Default::default(),
            };
            Collection::Records(merge_record_map(&local, Some(remote), ctx.known_ids.get(name)))
        }
        other => other.clone(),
    }
}

fn merge_aggregate_map(
    local: &AggregateMap,
    remote: &AggregateMap,
    now: DateTime<Utc>,
) -> AggregateMap {
    let winner = if remote.last_updated > local.last_updated {
        remote
    } else {
        local
    };
    AggregateMap {
        entries: winner.entries.clone(),
        last_updated: now,
    }
}

fn merge_aggregate_list(
    local: &AggregateList,
    remote: &AggregateList,
    now: DateTime<Utc>,
) -> AggregateList {
    let winner = if remote.last_updated > local.last_updated {
        remote
    } else {
        local
    };
    AggregateList {
        entries: winner.entries.clone(),
        last_updated: now,
    }
}

fn merge_record_map(
    local: &RecordMap,
    remote: Option<&RecordMap>,
    catalogue: Option<&HashSet<String>>,
) -> RecordMap {
    let mut result = RecordMap {
        by_id: Default::default(),
        // Tombstones are not merged; the local set was recomputed from the
        // catalogue when this cycle collected its snapshot.
        deleted_ids: local.deleted_ids.clone(),
    };

    let ids: BTreeSet<&String> = local
        .by_id
        .keys()
        .chain(remote.map(|r| r.by_id.keys()).into_iter().flatten())
        .collect();

    for id in ids {
        if local.deleted_ids.contains(id.as_str()) {
            continue;
        }
        if let Some(catalogue) = catalogue {
            if !catalogue.contains(id.as_str()) {
                continue;
            }
        }

        let ours = local.by_id.get(id);
        let theirs = remote.and_then(|r| r.by_id.get(id));
        let winner = match (ours, theirs) {
            (Some(ours), Some(theirs)) => {
                if theirs.last_modified > ours.last_modified {
                    theirs
                } else {
                    ours
                }
            }
            (Some(ours), None) => ours,
            (None, Some(theirs)) => theirs,
            (None, None) => continue,
        };
        result.by_id.insert(id.clone(), winner.clone());
    }

    result
}
