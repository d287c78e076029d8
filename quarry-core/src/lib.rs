//! Quarry Core — domain types, checkpoint ledger, sources, layer stores, upsert merge.
//!
//! This crate holds everything the ingestion and curation engines are built on:
//! - Domain types (instrument keys, records, intervals)
//! - Instrument universe loaded from TOML
//! - Checkpoint ledger with monotonic per-instrument dates
//! - Market-data sources (Yahoo Finance, in-memory script) and call pacing
//! - Layer stores over filesystem, object storage and mirrored pairs,
//!   with CSV, Parquet and SQLite snapshot codecs
//! - The upsert merge that builds curated series

pub mod clock;
pub mod domain;
pub mod fingerprint;
pub mod ledger;
pub mod merge;
pub mod source;
pub mod store;
pub mod universe;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{InstrumentKey, Interval, Record};
pub use ledger::{Checkpoint, CheckpointLedger, FileLedger, LedgerError, MemoryLedger};
pub use source::{FetchRange, MarketDataSource, SourceError};
pub use store::{Layer, LayerStore, SnapshotFormat, SnapshotLocator, SnapshotName, StoreError};
pub use universe::Universe;
