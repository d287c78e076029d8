//! Quarry Runner — pipeline configuration, ingestion and curation engines.
//!
//! This crate builds on `quarry-core` to provide:
//! - TOML pipeline configuration with backend and policy selection
//! - The checkpointed incremental ingestion engine (single and batch modes)
//! - The curation engine that folds raw snapshots into curated series,
//!   sequentially or on the rayon pool

pub mod config;
pub mod curate;
pub mod ingest;

pub use config::{BackendConfig, ConfigError, PipelineConfig};
pub use curate::{
    Curated, CuratedNaming, CurationEngine, CurationError, CurationOutcome, CurationPolicy,
    CurationReport, CurationStatus, EmptyRawPolicy, RawSelection,
};
pub use ingest::{
    IngestError, IngestMode, IngestOptions, IngestProgress, IngestReport, IngestStatus,
    IngestionEngine, InstrumentOutcome, StdoutProgress,
};
