//! Integration tests across stores, ledger and the upsert merge.

use chrono::NaiveDate;
use proptest::prelude::*;
use quarry_core::merge::{upsert_fold, UpsertMerge};
use quarry_core::store::{FsLayerStore, MemoryObjectClient, MirroredLayerStore, ObjectLayerStore};
use quarry_core::{
    Checkpoint, CheckpointLedger, FileLedger, InstrumentKey, Layer, LayerStore, Record,
    SnapshotFormat, SnapshotName, Universe,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(tag: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("quarry_it_{tag}_{}_{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn bar(d: u32, instrument: &str, close: f64) -> Record {
    Record {
        close: Some(close),
        ..Record::empty(day(d), instrument)
    }
}

#[test]
fn every_backend_reads_back_what_it_wrote() {
    let root = temp_dir("backends");
    let key = InstrumentKey::new("b3", "WEGE3.SA");
    let rows = vec![bar(2, "WEGE3.SA", 10.0), bar(3, "WEGE3.SA", 11.0)];

    let stores: Vec<Box<dyn LayerStore>> = vec![
        Box::new(FsLayerStore::new(root.join("fs"))),
        Box::new(ObjectLayerStore::new(MemoryObjectClient::new())),
        Box::new(MirroredLayerStore::new(
            FsLayerStore::new(root.join("primary")),
            ObjectLayerStore::new(MemoryObjectClient::new()),
        )),
    ];

    for store in &stores {
        for format in [SnapshotFormat::Csv, SnapshotFormat::Parquet] {
            let loc = store
                .write(Layer::Raw, &key, &rows, format, &SnapshotName::Timestamped)
                .unwrap();
            assert_eq!(store.read(&loc).unwrap(), rows, "backend {}", store.backend());
        }
        assert_eq!(store.list_instruments(Layer::Raw).unwrap(), vec![key.clone()]);
    }

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn ledger_survives_restart_and_universe_growth() {
    let dir = temp_dir("ledger");
    let path = FileLedger::path_for(&dir, "yahoo_finance");
    let a = InstrumentKey::new("nyse", "A");
    let b = InstrumentKey::new("nyse", "B");

    {
        let first = Universe::single_group("nyse", &["A"]);
        let mut ledger = FileLedger::load(&path, &first.keys()).unwrap();
        ledger.advance(&a, day(1)).unwrap();
    }

    let grown = Universe::single_group("nyse", &["A", "B"]);
    let ledger = FileLedger::load(&path, &grown.keys()).unwrap();
    assert_eq!(
        ledger.entries(),
        vec![(a, Checkpoint::Checked(day(1))), (b, Checkpoint::Unseen)]
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn curated_round_trip_through_store_is_stable() {
    let root = temp_dir("stable");
    let store = FsLayerStore::new(&root);
    let key = InstrumentKey::new("nyse", "X");

    let merged = upsert_fold(
        vec![bar(2, "X", 10.0)],
        vec![vec![bar(2, "X", 11.0), bar(3, "X", 12.0)]],
    );
    let loc = store
        .write(Layer::Curated, &key, &merged, SnapshotFormat::Parquet, &SnapshotName::Timestamped)
        .unwrap();
    let back = store.read(&loc).unwrap();
    assert_eq!(upsert_fold(back.clone(), Vec::<Vec<Record>>::new()), back);

    let _ = std::fs::remove_dir_all(&root);
}

// ── Properties of the upsert merge ───────────────────────────────────

fn arb_snapshot() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec((1u32..=28, 0usize..3, prop::option::of(1.0..500.0_f64)), 0..20).prop_map(
        |rows| {
            rows.into_iter()
                .map(|(d, i, close)| Record {
                    close,
                    ..Record::empty(day(d), ["X", "Y", "Z"][i])
                })
                .collect()
        },
    )
}

proptest! {
    /// Every key seen in any snapshot appears exactly once in the fold.
    #[test]
    fn fold_is_union_of_keys(snapshots in prop::collection::vec(arb_snapshot(), 0..6)) {
        let expected: BTreeSet<_> = snapshots.iter().flatten().map(|r| r.key()).collect();
        let merged = upsert_fold(Vec::new(), snapshots);
        let got: Vec<_> = merged.iter().map(|r| r.key()).collect();
        prop_assert_eq!(got.len(), expected.len());
        prop_assert_eq!(got.into_iter().collect::<BTreeSet<_>>(), expected);
    }

    /// The close of each key is the last present close across the fold.
    #[test]
    fn last_present_value_wins(snapshots in prop::collection::vec(arb_snapshot(), 1..6)) {
        let mut expected = BTreeMap::new();
        for record in snapshots.iter().flatten() {
            let entry = expected.entry(record.key()).or_insert(None);
            if record.close.is_some() {
                *entry = record.close;
            }
        }
        let merged = upsert_fold(Vec::new(), snapshots);
        for record in merged {
            prop_assert_eq!(record.close, expected[&record.key()]);
        }
    }

    /// Re-applying the merged result changes nothing.
    #[test]
    fn fold_is_idempotent(snapshots in prop::collection::vec(arb_snapshot(), 0..6)) {
        let merged = upsert_fold(Vec::new(), snapshots);
        let mut again = UpsertMerge::from_records(merged.clone());
        again.apply(merged.clone());
        prop_assert_eq!(again.into_records(), merged);
    }
}
