//! Local-filesystem layer store.
//!
//! Layout: `{root}/{layer_dir}/{group}/{instrument}/{name}.{ext}`
//!
//! Writes go to a hidden `.tmp` sibling first and are renamed into place, so a
//! listing never sees a half-written snapshot.

use super::{
    ensure_path_safe, resolve_name, Layer, LayerStore, SnapshotFormat, SnapshotLocator,
    SnapshotName, StoreError,
};
use crate::domain::{InstrumentKey, Record};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_RAW_DIR: &str = "ingested_data";
pub const DEFAULT_CURATED_DIR: &str = "curated_data";

#[derive(Debug, Clone)]
pub struct FsLayerStore {
    root: PathBuf,
    raw_dir: String,
    curated_dir: String,
}

impl FsLayerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            raw_dir: DEFAULT_RAW_DIR.to_string(),
            curated_dir: DEFAULT_CURATED_DIR.to_string(),
        }
    }

    pub fn with_layer_dirs(mut self, raw: impl Into<String>, curated: impl Into<String>) -> Self {
        self.raw_dir = raw.into();
        self.curated_dir = curated.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layer_dir(&self, layer: Layer) -> PathBuf {
        match layer {
            Layer::Raw => self.root.join(&self.raw_dir),
            Layer::Curated => self.root.join(&self.curated_dir),
        }
    }

    fn instrument_dir(&self, layer: Layer, key: &InstrumentKey) -> PathBuf {
        self.layer_dir(layer).join(&key.group).join(&key.instrument)
    }

    /// On-disk path of a snapshot.
    pub fn snapshot_path(&self, locator: &SnapshotLocator) -> PathBuf {
        self.instrument_dir(locator.layer, &locator.key)
            .join(locator.file_name())
    }
}

/// Sorted names of the sub-directories of `dir`. Missing `dir` is empty.
fn child_dirs(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

impl LayerStore for FsLayerStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    fn list_snapshots(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        format: SnapshotFormat,
    ) -> Result<Vec<SnapshotLocator>, StoreError> {
        ensure_path_safe(key)?;
        let dir = self.instrument_dir(layer, key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| SnapshotLocator {
                layer,
                key: key.clone(),
                name,
                format,
            })
            .collect())
    }

    fn read(&self, locator: &SnapshotLocator) -> Result<Vec<Record>, StoreError> {
        ensure_path_safe(&locator.key)?;
        let path = self.snapshot_path(locator);
        locator
            .format
            .codec()
            .read_file(&path)
            .map_err(|e| StoreError::codec(path.display(), e))
    }

    fn write(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        records: &[Record],
        format: SnapshotFormat,
        naming: &SnapshotName,
    ) -> Result<SnapshotLocator, StoreError> {
        ensure_path_safe(key)?;
        let dir = self.instrument_dir(layer, key);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let ext = format.extension();
        let name = resolve_name(naming, |candidate| {
            dir.join(format!("{candidate}.{ext}")).exists()
        })?;
        let locator = SnapshotLocator {
            layer,
            key: key.clone(),
            name,
            format,
        };

        let path = dir.join(locator.file_name());
        let tmp_path = dir.join(format!(".{}.tmp", locator.file_name()));
        let _ = fs::remove_file(&tmp_path);

        format
            .codec()
            .write_file(&tmp_path, records)
            .map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                StoreError::codec(path.display(), e)
            })?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::io(&path, e)
        })?;

        debug!(snapshot = %locator, rows = records.len(), "wrote snapshot");
        Ok(locator)
    }

    fn list_instruments(&self, layer: Layer) -> Result<Vec<InstrumentKey>, StoreError> {
        let layer_dir = self.layer_dir(layer);
        let mut keys = Vec::new();
        for group in child_dirs(&layer_dir)? {
            for instrument in child_dirs(&layer_dir.join(&group))? {
                let key = InstrumentKey::new(group.as_str(), instrument);
                if key.is_path_safe() {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn exists(&self, layer: Layer) -> Result<bool, StoreError> {
        Ok(self.layer_dir(layer).is_dir())
    }
}
