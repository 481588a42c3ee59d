//! Applies a merged snapshot to local state.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;

use crate::errors::StoreError;
use crate::model::Snapshot;
use crate::store::{CollectionRepository, ScoreModel, SyncListener};

/// Names the collections involved in derived-score recomputation: the
/// record collection being scored plus the aggregate weight map and filter
/// list that feed the model.
#[derive(Debug, Clone)]
pub struct ScoringPlan {
    pub records: String,
    pub weights: String,
    pub filters: String,
}

/// Persists merged collections into their repositories and refreshes
/// everything derived from them.
///
/// Best-effort sequential: each collection is persisted and its cache
/// invalidated in turn. A failure mid-way leaves earlier collections
/// applied; the next successful cycle converges them again.
pub struct ApplyEngine {
    repositories: BTreeMap<String, Arc<dyn CollectionRepository>>,
    scoring: Option<(ScoringPlan, Arc<dyn ScoreModel>)>,
    listener: Arc<dyn SyncListener>,
}

impl ApplyEngine {
    pub fn new(
        repositories: Vec<Arc<dyn CollectionRepository>>,
        scoring: Option<(ScoringPlan, Arc<dyn ScoreModel>)>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        let repositories = repositories
            .into_iter()
            .map(|repo| (repo.name().to_string(), repo))
            .collect();
        Self {
            repositories,
            scoring,
            listener,
        }
    }

    pub fn apply(&self, merged: &Snapshot) -> Result<(), StoreError> {
        for (name, collection) in &merged.collections {
            let Some(repo) = self.repositories.get(name) else {
                warn!("[Sync] Merged snapshot names unknown collection '{}', skipping", name);
                continue;
            };
            repo.replace(collection)?;
            repo.invalidate();
        }

        if let Some((plan, model)) = &self.scoring {
            self.recompute_scores(merged, plan, model.as_ref())?;
        }

        self.listener.refresh_requested();
        Ok(())
    }

    /// Rank every record against the aggregate collections as just merged,
    /// so scores always reflect the post-sync weights and filters.
    fn recompute_scores(
        &self,
        merged: &Snapshot,
        plan: &ScoringPlan,
        model: &dyn ScoreModel,
    ) -> Result<(), StoreError> {
        let records = merged
            .collections
            .get(&plan.records)
            .and_then(|c| c.as_records());
        let weights = merged
            .collections
            .get(&plan.weights)
            .and_then(|c| c.as_map());
        let filters = merged
            .collections
            .get(&plan.filters)
            .and_then(|c| c.as_list());
        let (Some(records), Some(weights), Some(filters)) = (records, weights, filters) else {
            warn!(
                "[Sync] Scoring inputs incomplete ({}, {}, {}), keeping existing scores",
                plan.records, plan.weights, plan.filters
            );
            return Ok(());
        };

        let scores: BTreeMap<String, f64> = records
            .by_id
            .iter()
            .map(|(id, record)| (id.clone(), model.score(record, weights, filters)))
            .collect();

        let repo = self
            .repositories
            .get(&plan.records)
            .ok_or_else(|| StoreError::UnknownCollection(plan.records.clone()))?;
        repo.apply_scores(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AggregateList, AggregateMap, Collection, RecordEntry, RecordMap, SNAPSHOT_VERSION,
    };
    use crate::testutil::{MemoryCollection, RecordingListener};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;

    struct SumModel;

    impl ScoreModel for SumModel {
        fn score(
            &self,
            _record: &RecordEntry,
            weights: &AggregateMap,
            filters: &AggregateList,
        ) -> f64 {
            weights.entries.values().sum::<f64>() - filters.entries.len() as f64
        }
    }

    fn merged_snapshot() -> Snapshot {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut snapshot = Snapshot::new(now);

        let mut weights = AggregateMap {
            entries: BTreeMap::new(),
            last_updated: now,
        };
        weights.entries.insert("rust".into(), 2.5);
        weights.entries.insert("tokio".into(), 1.5);
        snapshot
            .collections
            .insert("wordWeights".into(), Collection::Map(weights));

        let filters = AggregateList {
            entries: vec![serde_json::json!("spam")],
            last_updated: now,
        };
        snapshot
            .collections
            .insert("filterWords".into(), Collection::List(filters));

        let mut records = RecordMap::default();
        records.by_id.insert(
            "a-1".into(),
            RecordEntry {
                last_modified: now,
                fields: serde_json::Map::new(),
            },
        );
        records.by_id.insert(
            "a-2".into(),
            RecordEntry {
                last_modified: now,
                fields: serde_json::Map::new(),
            },
        );
        snapshot
            .collections
            .insert("articleStates".into(), Collection::Records(records));

        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        snapshot
    }

    fn plan() -> ScoringPlan {
        ScoringPlan {
            records: "articleStates".into(),
            weights: "wordWeights".into(),
            filters: "filterWords".into(),
        }
    }

    fn empty_map() -> Collection {
        Collection::Map(AggregateMap {
            entries: BTreeMap::new(),
            last_updated: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    fn empty_list() -> Collection {
        Collection::List(AggregateList {
            entries: Vec::new(),
            last_updated: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn persists_invalidates_and_rescores_each_collection() {
        let weights = Arc::new(MemoryCollection::new("wordWeights", empty_map()));
        let filters = Arc::new(MemoryCollection::new("filterWords", empty_list()));
        let articles = Arc::new(MemoryCollection::new(
            "articleStates",
            Collection::Records(RecordMap::default()),
        ));
        let listener = Arc::new(RecordingListener::default());

        let repos: Vec<Arc<dyn CollectionRepository>> =
            vec![weights.clone(), filters.clone(), articles.clone()];
        let engine = ApplyEngine::new(
            repos,
            Some((plan(), Arc::new(SumModel))),
            listener.clone(),
        );
        engine.apply(&merged_snapshot()).unwrap();

        for repo in [&weights, &filters, &articles] {
            assert_eq!(repo.replace_calls.load(Ordering::SeqCst), 1);
            assert_eq!(repo.invalidate_calls.load(Ordering::SeqCst), 1);
        }

        // 2.5 + 1.5 weights, minus one filter entry.
        let scores = articles.scores.lock().unwrap().clone().unwrap();
        assert_eq!(scores.get("a-1"), Some(&3.0));
        assert_eq!(scores.get("a-2"), Some(&3.0));

        assert_eq!(listener.refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_collection_is_skipped() {
        let articles = Arc::new(MemoryCollection::new(
            "articleStates",
            Collection::Records(RecordMap::default()),
        ));
        let repos: Vec<Arc<dyn CollectionRepository>> = vec![articles.clone()];
        let engine = ApplyEngine::new(repos, None, Arc::new(RecordingListener::default()));

        engine.apply(&merged_snapshot()).unwrap();
        assert_eq!(articles.replace_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_scoring_inputs_keep_existing_scores() {
        let articles = Arc::new(MemoryCollection::new(
            "articleStates",
            Collection::Records(RecordMap::default()),
        ));
        let repos: Vec<Arc<dyn CollectionRepository>> = vec![articles.clone()];
        let engine = ApplyEngine::new(
            repos,
            Some((plan(), Arc::new(SumModel))),
            Arc::new(RecordingListener::default()),
        );

        let mut snapshot = merged_snapshot();
        snapshot.collections.remove("wordWeights");
        engine.apply(&snapshot).unwrap();
        assert!(articles.scores.lock().unwrap().is_none());
    }
}
