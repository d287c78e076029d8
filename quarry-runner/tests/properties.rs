//! Property tests for ingestion checkpoints and curation.

use chrono::NaiveDate;
use proptest::prelude::*;
use quarry_core::source::{Pacer, StaticSource};
use quarry_core::store::{MemoryObjectClient, ObjectLayerStore};
use quarry_core::{
    Checkpoint, CheckpointLedger, FixedClock, InstrumentKey, Layer, LayerStore, MemoryLedger,
    Record, SnapshotFormat, SnapshotName, Universe,
};
use quarry_runner::{CurationEngine, CurationPolicy, IngestOptions, IngestionEngine};

fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

fn arb_snapshot() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec((0u32..30, prop::option::of(1.0..100.0_f64)), 0..15).prop_map(|rows| {
        rows.into_iter()
            .map(|(d, close)| Record {
                close,
                ..Record::empty(day(d), "X")
            })
            .collect()
    })
}

proptest! {
    /// Across runs on arbitrary days with arbitrary failures, a checkpoint
    /// only moves forward and only to a day on which ingestion succeeded.
    #[test]
    fn checkpoints_never_move_backwards(
        runs in prop::collection::vec((0u32..60, any::<bool>()), 1..10)
    ) {
        let universe = Universe::single_group("nyse", &["X"]);
        let key = InstrumentKey::new("nyse", "X");
        let store = ObjectLayerStore::new(MemoryObjectClient::new());
        let mut ledger = MemoryLedger::new(&universe.keys());
        let mut expected: Option<NaiveDate> = None;

        for (offset, fails) in runs {
            let today = day(offset);
            let mut source = StaticSource::new("static").with_rows("X", vec![Record::empty(today, "X")]);
            if fails {
                source = source.fail_on("X");
            }
            let clock = FixedClock(today);
            let before = ledger.checkpoint(&key);

            IngestionEngine::new(&source, &store, &mut ledger, &clock, IngestOptions::default())
                .with_pacer(Pacer::disabled())
                .run(&universe)
                .unwrap();

            let after = ledger.checkpoint(&key);
            prop_assert!(after.date() >= before.date());
            let due = before.is_due(today);
            if due && !fails {
                expected = Some(today);
            }
            prop_assert_eq!(after, Checkpoint::from(expected));
        }
    }

    /// Curating twice over the same raw snapshots yields the same series.
    #[test]
    fn curation_is_idempotent(
        base in arb_snapshot(),
        raws in prop::collection::vec(arb_snapshot(), 1..5)
    ) {
        let store = ObjectLayerStore::new(MemoryObjectClient::new());
        let key = InstrumentKey::new("nyse", "X");
        let write = |layer, rows: &[Record]| {
            store
                .write(layer, &key, rows, SnapshotFormat::Csv, &SnapshotName::Timestamped)
                .unwrap();
        };
        write(Layer::Curated, &base);
        for raw in &raws {
            write(Layer::Raw, raw);
        }

        let engine = CurationEngine::new(&store, CurationPolicy::default());
        let first = engine.curate(&key).unwrap();
        let second = engine.curate(&key).unwrap();
        prop_assert_eq!(&first.content_hash, &second.content_hash);
        prop_assert_eq!(first.records, second.records);
    }
}
