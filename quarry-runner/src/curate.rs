//! Curation engine: folds raw snapshots into the curated series.
//!
//! For one instrument:
//! 1. Read the newest curated snapshot (empty if there is none).
//! 2. List raw snapshots; with none, apply the `EmptyRawPolicy`.
//! 3. Upsert the raw snapshots oldest-to-newest on top of the curated base.
//! 4. Write the result as exactly one new curated snapshot.
//!
//! Every run refolds all raw snapshots. The fold is idempotent, so curating
//! twice without new raw data yields the same content hash.

use quarry_core::fingerprint::records_hash;
use quarry_core::merge::UpsertMerge;
use quarry_core::{
    InstrumentKey, Layer, LayerStore, Record, SnapshotFormat, SnapshotLocator, SnapshotName,
    StoreError,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CurationError {
    #[error("raw layer has no snapshots for {key}")]
    SourceLayerEmpty { key: InstrumentKey },

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// What to do when an instrument has no raw snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRawPolicy {
    /// Fail with `SourceLayerEmpty`.
    #[default]
    Error,
    /// Return the current curated series unchanged, without writing.
    PassThrough,
}

/// Which raw snapshots take part in the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawSelection {
    #[default]
    All,
    NewestOnly,
}

/// How curated snapshots are named.
///
/// The curated base is the snapshot whose name sorts last. Fixed names such as
/// `latest` sort after every timestamped name, so a namespace holding both
/// always folds onto the fixed snapshot. When switching from `Fixed` to
/// `Timestamped`, remove the fixed snapshot first or it stays the base forever.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CuratedNaming {
    /// Append a new timestamped snapshot per run.
    #[default]
    Timestamped,
    /// Overwrite one snapshot of this name.
    Fixed { name: String },
}

impl CuratedNaming {
    fn snapshot_name(&self) -> SnapshotName {
        match self {
            CuratedNaming::Timestamped => SnapshotName::Timestamped,
            CuratedNaming::Fixed { name } => SnapshotName::Fixed(name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurationPolicy {
    pub format: SnapshotFormat,
    pub empty_raw: EmptyRawPolicy,
    pub selection: RawSelection,
    pub naming: CuratedNaming,
}

/// Result of curating one instrument.
#[derive(Debug, Clone)]
pub struct Curated {
    pub key: InstrumentKey,
    /// The curated series, ordered by (Date, Instrument).
    pub records: Vec<Record>,
    /// Snapshot holding `records`: the new one, or the existing one on pass-through.
    pub snapshot: Option<SnapshotLocator>,
    pub raw_snapshots: usize,
    pub passed_through: bool,
    /// BLAKE3 of `records`.
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CurationStatus {
    Curated {
        rows: usize,
        snapshot: Option<SnapshotLocator>,
        content_hash: String,
    },
    PassedThrough {
        rows: usize,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurationOutcome {
    pub key: InstrumentKey,
    pub status: CurationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct CurationReport {
    pub outcomes: Vec<CurationOutcome>,
}

impl CurationReport {
    pub fn curated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CurationStatus::Curated { .. }))
            .count()
    }

    pub fn passed_through(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CurationStatus::PassedThrough { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CurationStatus::Failed { .. }))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

pub struct CurationEngine<'a> {
    store: &'a dyn LayerStore,
    policy: CurationPolicy,
}

impl<'a> CurationEngine<'a> {
    pub fn new(store: &'a dyn LayerStore, policy: CurationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CurationPolicy {
        &self.policy
    }

    /// Curate one instrument.
    pub fn curate(&self, key: &InstrumentKey) -> Result<Curated, CurationError> {
        let format = self.policy.format;

        let base_snapshot = self.store.latest(Layer::Curated, key, format)?;
        let base = match &base_snapshot {
            Some(locator) => self.store.read(locator)?,
            None => Vec::new(),
        };

        let mut raw = self.store.list_snapshots(Layer::Raw, key, format)?;
        if raw.is_empty() {
            return match self.policy.empty_raw {
                EmptyRawPolicy::Error => Err(CurationError::SourceLayerEmpty { key: key.clone() }),
                EmptyRawPolicy::PassThrough => {
                    debug!(%key, "no raw snapshots, passing curated series through");
                    Ok(Curated {
                        key: key.clone(),
                        content_hash: records_hash(&base),
                        records: base,
                        snapshot: base_snapshot,
                        raw_snapshots: 0,
                        passed_through: true,
                    })
                }
            };
        }

        if self.policy.selection == RawSelection::NewestOnly {
            raw = raw.split_off(raw.len() - 1);
        }

        let mut merge = UpsertMerge::from_records(base);
        for locator in &raw {
            let stats = merge.apply(self.store.read(locator)?);
            debug!(%key, snapshot = %locator, inserted = stats.inserted, updated = stats.updated, "folded raw snapshot");
        }
        let records = merge.into_records();

        let snapshot = self.store.write(
            Layer::Curated,
            key,
            &records,
            format,
            &self.policy.naming.snapshot_name(),
        )?;
        let content_hash = records_hash(&records);

        info!(
            %key,
            rows = records.len(),
            raw_snapshots = raw.len(),
            snapshot = %snapshot,
            "curated"
        );

        Ok(Curated {
            key: key.clone(),
            records,
            snapshot: Some(snapshot),
            raw_snapshots: raw.len(),
            passed_through: false,
            content_hash,
        })
    }

    fn outcome(&self, key: InstrumentKey) -> CurationOutcome {
        let status = match self.curate(&key) {
            Ok(curated) if curated.passed_through => CurationStatus::PassedThrough {
                rows: curated.records.len(),
            },
            Ok(curated) => CurationStatus::Curated {
                rows: curated.records.len(),
                snapshot: curated.snapshot,
                content_hash: curated.content_hash,
            },
            Err(e) => {
                warn!(%key, error = %e, "curation failed");
                CurationStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        CurationOutcome { key, status }
    }

    /// Curate every instrument present in the raw layer, one after another.
    pub fn curate_all(&self) -> Result<CurationReport, CurationError> {
        let keys = self.store.list_instruments(Layer::Raw)?;
        info!(instruments = keys.len(), "starting curation run");
        let outcomes = keys.into_iter().map(|key| self.outcome(key)).collect();
        Ok(self.finish(outcomes))
    }

    /// Same as [`curate_all`](Self::curate_all), on the rayon pool.
    ///
    /// Each instrument owns its own curated namespace, so workers never write
    /// to the same place.
    pub fn curate_all_parallel(&self) -> Result<CurationReport, CurationError> {
        let keys = self.store.list_instruments(Layer::Raw)?;
        info!(instruments = keys.len(), "starting parallel curation run");
        let outcomes = keys.into_par_iter().map(|key| self.outcome(key)).collect();
        Ok(self.finish(outcomes))
    }

    fn finish(&self, outcomes: Vec<CurationOutcome>) -> CurationReport {
        let report = CurationReport { outcomes };
        info!(
            curated = report.curated(),
            passed_through = report.passed_through(),
            failed = report.failed(),
            "curation run complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quarry_core::store::{MemoryObjectClient, ObjectLayerStore};

    fn bar(d: u32, close: Option<f64>) -> Record {
        Record {
            close,
            ..Record::empty(NaiveDate::from_ymd_opt(2024, 1, d).unwrap(), "X")
        }
    }

    fn key() -> InstrumentKey {
        InstrumentKey::new("nyse", "X")
    }

    fn store() -> ObjectLayerStore<MemoryObjectClient> {
        ObjectLayerStore::new(MemoryObjectClient::new())
    }

    fn put(store: &dyn LayerStore, layer: Layer, rows: &[Record]) {
        store
            .write(layer, &key(), rows, SnapshotFormat::Csv, &SnapshotName::Timestamped)
            .unwrap();
    }

    #[test]
    fn raw_value_wins_over_curated() {
        let store = store();
        put(&store, Layer::Curated, &[bar(2, Some(10.0))]);
        put(&store, Layer::Raw, &[bar(2, Some(11.0))]);

        let curated = CurationEngine::new(&store, CurationPolicy::default())
            .curate(&key())
            .unwrap();
        assert_eq!(curated.records, vec![bar(2, Some(11.0))]);
        assert_eq!(curated.raw_snapshots, 1);
    }

    #[test]
    fn writes_exactly_one_curated_snapshot() {
        let store = store();
        put(&store, Layer::Raw, &[bar(2, Some(1.0))]);
        put(&store, Layer::Raw, &[bar(3, Some(2.0))]);

        let engine = CurationEngine::new(&store, CurationPolicy::default());
        let curated = engine.curate(&key()).unwrap();
        let listed = store
            .list_snapshots(Layer::Curated, &key(), SnapshotFormat::Csv)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(curated.snapshot.as_ref(), listed.first());
        assert_eq!(store.read(&listed[0]).unwrap(), curated.records);
    }

    #[test]
    fn recuration_is_idempotent() {
        let store = store();
        put(&store, Layer::Raw, &[bar(2, Some(1.0)), bar(3, None)]);
        put(&store, Layer::Raw, &[bar(3, Some(2.0))]);

        let engine = CurationEngine::new(&store, CurationPolicy::default());
        let first = engine.curate(&key()).unwrap();
        let second = engine.curate(&key()).unwrap();
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn empty_raw_errors_by_default() {
        let store = store();
        let err = CurationEngine::new(&store, CurationPolicy::default())
            .curate(&key())
            .unwrap_err();
        assert!(matches!(err, CurationError::SourceLayerEmpty { .. }));
    }

    #[test]
    fn empty_raw_pass_through_writes_nothing() {
        let store = store();
        put(&store, Layer::Curated, &[bar(2, Some(10.0))]);
        let policy = CurationPolicy {
            empty_raw: EmptyRawPolicy::PassThrough,
            ..CurationPolicy::default()
        };

        let curated = CurationEngine::new(&store, policy).curate(&key()).unwrap();
        assert!(curated.passed_through);
        assert_eq!(curated.records, vec![bar(2, Some(10.0))]);
        assert_eq!(
            store
                .list_snapshots(Layer::Curated, &key(), SnapshotFormat::Csv)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn newest_only_ignores_older_raw() {
        let store = store();
        put(&store, Layer::Raw, &[bar(2, Some(1.0))]);
        put(&store, Layer::Raw, &[bar(3, Some(2.0))]);
        let policy = CurationPolicy {
            selection: RawSelection::NewestOnly,
            ..CurationPolicy::default()
        };

        let curated = CurationEngine::new(&store, policy).curate(&key()).unwrap();
        assert_eq!(curated.records, vec![bar(3, Some(2.0))]);
        assert_eq!(curated.raw_snapshots, 1);
    }

    #[test]
    fn fixed_naming_overwrites() {
        let store = store();
        put(&store, Layer::Raw, &[bar(2, Some(1.0))]);
        let policy = CurationPolicy {
            naming: CuratedNaming::Fixed {
                name: "latest".into(),
            },
            ..CurationPolicy::default()
        };
        let engine = CurationEngine::new(&store, policy);
        engine.curate(&key()).unwrap();
        let curated = engine.curate(&key()).unwrap();

        let listed = store
            .list_snapshots(Layer::Curated, &key(), SnapshotFormat::Csv)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(curated.snapshot.unwrap().name, "latest");
    }

    #[test]
    fn fixed_snapshot_stays_base_after_switching_to_timestamped() {
        let store = store();
        store
            .write(
                Layer::Curated,
                &key(),
                &[bar(2, Some(10.0))],
                SnapshotFormat::Csv,
                &SnapshotName::Fixed("latest".into()),
            )
            .unwrap();
        put(&store, Layer::Raw, &[bar(3, Some(2.0))]);

        let engine = CurationEngine::new(&store, CurationPolicy::default());
        engine.curate(&key()).unwrap();

        let base = store
            .latest(Layer::Curated, &key(), SnapshotFormat::Csv)
            .unwrap()
            .unwrap();
        assert_eq!(base.name, "latest");
        assert_eq!(store.read(&base).unwrap(), vec![bar(2, Some(10.0))]);
    }

    #[test]
    fn curate_all_isolates_failures() {
        let store = store();
        put(&store, Layer::Raw, &[bar(2, Some(1.0))]);
        // a raw instrument directory whose snapshots are in another format
        store
            .write(
                Layer::Raw,
                &InstrumentKey::new("nyse", "Y"),
                &[bar(2, Some(1.0))],
                SnapshotFormat::Parquet,
                &SnapshotName::Timestamped,
            )
            .unwrap();

        let engine = CurationEngine::new(&store, CurationPolicy::default());
        for report in [engine.curate_all().unwrap(), engine.curate_all_parallel().unwrap()] {
            assert_eq!(report.outcomes.len(), 2);
            assert_eq!(report.outcomes[0].key, key());
            assert!(report.has_failures());
            assert!(matches!(report.outcomes[1].status, CurationStatus::Failed { .. }));
        }
    }
}
