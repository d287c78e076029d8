//! Layer store: raw and curated snapshot namespaces over pluggable media.
//!
//! Logical layout: `layer → group → instrument → snapshots`. A snapshot is an
//! immutable record batch identified by a sortable name plus its format's
//! extension. Listing returns snapshots oldest first; names are local
//! timestamps (`YYYY-MM-DDTHH-MM-SS.ffffff`) unless the caller picks a fixed
//! name, which overwrites.

pub mod codec;
pub mod filesystem;
pub mod mirror;
pub mod object;

pub use codec::{CodecError, SnapshotCodec, SnapshotFormat};
pub use filesystem::FsLayerStore;
pub use mirror::MirroredLayerStore;
pub use object::{LocalObjectClient, MemoryObjectClient, ObjectClient, ObjectLayerStore};

use crate::domain::{InstrumentKey, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Unmodified per-run fetch results.
    Raw,
    /// Deduplicated, merged series.
    Curated,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Raw, Layer::Curated];
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Raw => f.write_str("raw"),
            Layer::Curated => f.write_str("curated"),
        }
    }
}

/// How a new snapshot is named.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SnapshotName {
    /// Local wall-clock timestamp; never overwrites.
    #[default]
    Timestamped,
    /// Fixed name; overwrites any snapshot of the same name and format.
    Fixed(String),
}

/// Address of one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotLocator {
    pub layer: Layer,
    pub key: InstrumentKey,
    /// Name without extension.
    pub name: String,
    pub format: SnapshotFormat,
}

impl SnapshotLocator {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.format.extension())
    }

    /// `{group}/{instrument}/{name}.{ext}`, used as object key.
    pub fn relative_key(&self) -> String {
        format!("{}/{}", self.key, self.file_name())
    }
}

impl fmt::Display for SnapshotLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.layer, self.relative_key())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("codec failure for {location}: {source}")]
    Codec {
        location: String,
        #[source]
        source: CodecError,
    },

    #[error("{backend} backend cannot store {format} snapshots")]
    UnsupportedPayload {
        format: SnapshotFormat,
        backend: &'static str,
    },

    #[error("instrument key '{0}' is not usable as a storage path")]
    InvalidKey(String),

    #[error("object storage: {0}")]
    Object(String),

    #[error("snapshot {name} written to primary but replication failed: {source}")]
    Replication {
        name: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("no free snapshot name for base '{0}'")]
    NameExhausted(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn codec(location: impl fmt::Display, source: CodecError) -> Self {
        StoreError::Codec {
            location: location.to_string(),
            source,
        }
    }
}

/// Uniform read/write/list over one storage medium.
pub trait LayerStore: Send + Sync {
    /// Short backend label for logs.
    fn backend(&self) -> &'static str;

    /// Snapshots of `key` in `layer` with `format`, oldest first.
    /// Missing layer, group or instrument yields an empty list.
    fn list_snapshots(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        format: SnapshotFormat,
    ) -> Result<Vec<SnapshotLocator>, StoreError>;

    fn read(&self, locator: &SnapshotLocator) -> Result<Vec<Record>, StoreError>;

    /// Persist `records` as one new snapshot. Readers never observe a partial write.
    fn write(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        records: &[Record],
        format: SnapshotFormat,
        naming: &SnapshotName,
    ) -> Result<SnapshotLocator, StoreError>;

    /// Every (group, instrument) with at least one snapshot directory in `layer`.
    fn list_instruments(&self, layer: Layer) -> Result<Vec<InstrumentKey>, StoreError>;

    fn exists(&self, layer: Layer) -> Result<bool, StoreError>;

    /// Newest snapshot, if any.
    fn latest(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        format: SnapshotFormat,
    ) -> Result<Option<SnapshotLocator>, StoreError> {
        Ok(self.list_snapshots(layer, key, format)?.pop())
    }
}

impl<S: LayerStore + ?Sized> LayerStore for Box<S> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn list_snapshots(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        format: SnapshotFormat,
    ) -> Result<Vec<SnapshotLocator>, StoreError> {
        (**self).list_snapshots(layer, key, format)
    }

    fn read(&self, locator: &SnapshotLocator) -> Result<Vec<Record>, StoreError> {
        (**self).read(locator)
    }

    fn write(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        records: &[Record],
        format: SnapshotFormat,
        naming: &SnapshotName,
    ) -> Result<SnapshotLocator, StoreError> {
        (**self).write(layer, key, records, format, naming)
    }

    fn list_instruments(&self, layer: Layer) -> Result<Vec<InstrumentKey>, StoreError> {
        (**self).list_instruments(layer)
    }

    fn exists(&self, layer: Layer) -> Result<bool, StoreError> {
        (**self).exists(layer)
    }
}

pub(crate) fn ensure_path_safe(key: &InstrumentKey) -> Result<(), StoreError> {
    if key.is_path_safe() {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6f";

/// UTC timestamp in snapshot-name form. Names sort in write order because
/// UTC never repeats an hour.
pub fn timestamp_name() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Pick the concrete name for a new snapshot. `taken` reports whether a name
/// is already in use. Fixed names are returned as-is.
pub(crate) fn resolve_name(
    naming: &SnapshotName,
    taken: impl Fn(&str) -> bool,
) -> Result<String, StoreError> {
    let base = match naming {
        SnapshotName::Fixed(name) => return Ok(name.clone()),
        SnapshotName::Timestamped => timestamp_name(),
    };
    if !taken(&base) {
        return Ok(base);
    }
    (1..=999)
        .map(|n| format!("{base}-{n:03}"))
        .find(|candidate| !taken(candidate))
        .ok_or(StoreError::NameExhausted(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_names_have_fixed_shape() {
        let name = timestamp_name();
        // 2024-01-02T10-00-00.123456
        assert_eq!(name.len(), 26);
        assert_eq!(&name[10..11], "T");
        assert!(!name.contains(':'));
    }

    #[test]
    fn timestamp_names_are_utc() {
        let before = chrono::Utc::now().naive_utc();
        let name = timestamp_name();
        let after = chrono::Utc::now().naive_utc();
        let parsed = chrono::NaiveDateTime::parse_from_str(&name, TIMESTAMP_FORMAT).unwrap();
        assert!(parsed >= before - chrono::Duration::microseconds(1));
        assert!(parsed <= after);
    }

    #[test]
    fn collisions_get_suffix() {
        let taken = |name: &str| !name.ends_with("-002");
        let name = resolve_name(&SnapshotName::Timestamped, taken).unwrap();
        assert!(name.ends_with("-002"));
    }

    #[test]
    fn suffixed_names_sort_after_base() {
        let base = "2024-01-02T10-00-00.123456";
        let mut names = vec![
            format!("{base}-001"),
            base.to_string(),
            "2024-01-02T10-00-00.123457".to_string(),
        ];
        names.sort();
        assert_eq!(names[0], base);
        assert_eq!(names[1], format!("{base}-001"));
    }

    #[test]
    fn fixed_names_pass_through() {
        let name = resolve_name(&SnapshotName::Fixed("latest".into()), |_| true).unwrap();
        assert_eq!(name, "latest");
    }

    #[test]
    fn locator_paths() {
        let loc = SnapshotLocator {
            layer: Layer::Raw,
            key: InstrumentKey::new("b3", "WEGE3.SA"),
            name: "2024-01-02T10-00-00.000000".into(),
            format: SnapshotFormat::Parquet,
        };
        assert_eq!(loc.relative_key(), "b3/WEGE3.SA/2024-01-02T10-00-00.000000.parquet");
        assert_eq!(loc.to_string(), "raw:b3/WEGE3.SA/2024-01-02T10-00-00.000000.parquet");
    }
}
