//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! [storage]
//! root = "data"
//! format = "parquet"
//!
//! [storage.backend]
//! kind = "mirrored"
//! mirror_root = "objects"
//!
//! [checkpoints]
//! dir = "checkpoints"
//!
//! [ingestion]
//! mode = "single"
//! pause_secs = 3.0
//!
//! [curation]
//! empty_raw = "error"
//!
//! [universe.groups]
//! b3 = ["WEGE3.SA", "MGLU3.SA"]
//! ```
//!
//! Relative paths are resolved once, against the directory holding the file.

use crate::curate::{CuratedNaming, CurationPolicy, EmptyRawPolicy, RawSelection};
use crate::ingest::{IngestMode, IngestOptions};
use quarry_core::source::{Pacer, YahooOptions, YahooSource};
use quarry_core::store::filesystem::{DEFAULT_CURATED_DIR, DEFAULT_RAW_DIR};
use quarry_core::store::object::{DEFAULT_CURATED_BUCKET, DEFAULT_RAW_BUCKET};
use quarry_core::store::{
    FsLayerStore, LocalObjectClient, MirroredLayerStore, ObjectLayerStore, SnapshotFormat,
};
use quarry_core::{Interval, LayerStore, SourceError, Universe};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for `ingestion.pause_secs`.
pub const MAX_PAUSE_SECS: f64 = 3600.0;
/// Upper bound for `ingestion.max_retries`.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub checkpoints: CheckpointConfig,
    pub ingestion: IngestionConfig,
    pub curation: CurationConfig,
    pub universe: Universe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub format: SnapshotFormat,
    pub raw_dir: String,
    pub curated_dir: String,
    pub backend: BackendConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            format: SnapshotFormat::Csv,
            raw_dir: DEFAULT_RAW_DIR.to_string(),
            curated_dir: DEFAULT_CURATED_DIR.to_string(),
            backend: BackendConfig::default(),
        }
    }
}

/// Physical medium behind the layer store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Layer directories under `storage.root`.
    #[default]
    Filesystem,
    /// Buckets as directories under `root`.
    ObjectStore {
        root: PathBuf,
        #[serde(default = "default_raw_bucket")]
        raw_bucket: String,
        #[serde(default = "default_curated_bucket")]
        curated_bucket: String,
    },
    /// Filesystem primary under `storage.root`, object-store replica under `mirror_root`.
    Mirrored {
        mirror_root: PathBuf,
        #[serde(default = "default_raw_bucket")]
        raw_bucket: String,
        #[serde(default = "default_curated_bucket")]
        curated_bucket: String,
    },
}

fn default_raw_bucket() -> String {
    DEFAULT_RAW_BUCKET.to_string()
}

fn default_curated_bucket() -> String {
    DEFAULT_CURATED_BUCKET.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub interval: Interval,
    pub mode: IngestMode,
    pub batch_group: String,
    /// Minimum pause between source calls. Zero disables pacing.
    pub pause_secs: f64,
    pub prepost: bool,
    pub auto_adjust: bool,
    pub actions: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        let yahoo = YahooOptions::default();
        Self {
            interval: Interval::Day,
            mode: IngestMode::Single,
            batch_group: "batch".to_string(),
            pause_secs: 3.0,
            prepost: yahoo.prepost,
            auto_adjust: yahoo.auto_adjust,
            actions: yahoo.actions,
            max_retries: yahoo.max_retries,
            timeout_secs: yahoo.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    pub empty_raw: EmptyRawPolicy,
    pub selection: RawSelection,
    /// `timestamped` appends a new curated snapshot per run; `fixed` overwrites `fixed_name`.
    pub naming: NamingKind,
    pub fixed_name: String,
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingKind {
    #[default]
    Timestamped,
    Fixed,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            empty_raw: EmptyRawPolicy::default(),
            selection: RawSelection::default(),
            naming: NamingKind::Timestamped,
            fixed_name: "latest".to_string(),
            parallel: false,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file and resolve relative paths against its directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::from_toml(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        Ok(config)
    }

    /// Parse and validate. Paths are left as written.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.storage.root);
        resolve(&mut self.checkpoints.dir);
        match &mut self.storage.backend {
            BackendConfig::Filesystem => {}
            BackendConfig::ObjectStore { root, .. } => resolve(root),
            BackendConfig::Mirrored { mirror_root, .. } => resolve(mirror_root),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pause = self.ingestion.pause_secs;
        if !pause.is_finite() || !(0.0..=MAX_PAUSE_SECS).contains(&pause) {
            return Err(ConfigError::Invalid(format!(
                "ingestion.pause_secs must be between 0 and {MAX_PAUSE_SECS}, got {pause}"
            )));
        }
        if self.ingestion.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "ingestion.max_retries must be at most {MAX_RETRIES}, got {}",
                self.ingestion.max_retries
            )));
        }
        if self.ingestion.batch_group.is_empty() || self.ingestion.batch_group.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "ingestion.batch_group '{}' is not a valid group name",
                self.ingestion.batch_group
            )));
        }
        if self.curation.naming == NamingKind::Fixed && self.curation.fixed_name.is_empty() {
            return Err(ConfigError::Invalid(
                "curation.fixed_name must be set when naming = \"fixed\"".into(),
            ));
        }
        let uses_objects = !matches!(self.storage.backend, BackendConfig::Filesystem);
        if uses_objects && self.storage.format == SnapshotFormat::Sqlite {
            return Err(ConfigError::Invalid(
                "sqlite snapshots cannot be stored in object storage; use csv or parquet".into(),
            ));
        }
        for key in self.universe.keys() {
            if !key.is_path_safe() {
                return Err(ConfigError::Invalid(format!(
                    "universe entry '{key}' cannot be used as a storage path"
                )));
            }
        }
        Ok(())
    }

    /// Build the configured layer store.
    pub fn build_store(&self) -> Box<dyn LayerStore> {
        let fs = FsLayerStore::new(&self.storage.root)
            .with_layer_dirs(&self.storage.raw_dir, &self.storage.curated_dir);
        match &self.storage.backend {
            BackendConfig::Filesystem => Box::new(fs),
            BackendConfig::ObjectStore {
                root,
                raw_bucket,
                curated_bucket,
            } => Box::new(
                ObjectLayerStore::new(LocalObjectClient::new(root))
                    .with_buckets(raw_bucket, curated_bucket),
            ),
            BackendConfig::Mirrored {
                mirror_root,
                raw_bucket,
                curated_bucket,
            } => Box::new(MirroredLayerStore::new(
                fs,
                ObjectLayerStore::new(LocalObjectClient::new(mirror_root))
                    .with_buckets(raw_bucket, curated_bucket),
            )),
        }
    }

    pub fn yahoo_options(&self) -> YahooOptions {
        YahooOptions {
            prepost: self.ingestion.prepost,
            auto_adjust: self.ingestion.auto_adjust,
            actions: self.ingestion.actions,
            max_retries: self.ingestion.max_retries,
            timeout: Duration::from_secs(self.ingestion.timeout_secs),
            ..YahooOptions::default()
        }
    }

    pub fn build_source(&self) -> Result<YahooSource, SourceError> {
        YahooSource::new(self.yahoo_options())
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(Duration::from_secs_f64(self.ingestion.pause_secs))
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            mode: self.ingestion.mode,
            interval: self.ingestion.interval,
            format: self.storage.format,
            batch_group: self.ingestion.batch_group.clone(),
        }
    }

    pub fn curation_policy(&self) -> CurationPolicy {
        CurationPolicy {
            format: self.storage.format,
            empty_raw: self.curation.empty_raw,
            selection: self.curation.selection,
            naming: match self.curation.naming {
                NamingKind::Timestamped => CuratedNaming::Timestamped,
                NamingKind::Fixed => CuratedNaming::Fixed {
                    name: self.curation.fixed_name.clone(),
                },
            },
        }
    }

    /// Checkpoint file for a source identity.
    pub fn checkpoint_path(&self, identity: &str) -> PathBuf {
        quarry_core::FileLedger::path_for(&self.checkpoints.dir, identity)
    }

    /// Starter configuration written by `quarry init`.
    pub fn starter() -> Self {
        Self {
            universe: Universe::single_group("b3", &["WEGE3.SA", "MGLU3.SA"]),
            ..Self::default()
        }
    }
}
