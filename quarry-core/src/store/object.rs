//! Object-storage layer store.
//!
//! One bucket per layer; object key `{group}/{instrument}/{name}.{ext}`.
//! Buckets are created on first write. A snapshot is a single put, so readers
//! see it whole or not at all. Only byte-encodable formats can be stored.

use super::{
    ensure_path_safe, resolve_name, Layer, LayerStore, SnapshotFormat, SnapshotLocator,
    SnapshotName, StoreError,
};
use crate::domain::{InstrumentKey, Record};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_RAW_BUCKET: &str = "ingested-data";
pub const DEFAULT_CURATED_BUCKET: &str = "curated-data";

/// Minimal bucket/object API.
pub trait ObjectClient: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Store `bytes` under `key`, replacing any previous object.
    fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Keys starting with `prefix`, sorted.
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

// ── Local directory client ──────────────────────────────────────────

/// Buckets as directories under a root, objects as files.
#[derive(Debug, Clone)]
pub struct LocalObjectClient {
    root: PathBuf,
}

impl LocalObjectClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn collect_keys(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let key = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                Self::collect_keys(&path, &key, out)?;
            } else if !name.starts_with('.') {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectClient for LocalObjectClient {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.bucket_dir(bucket).is_dir())
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))
    }

    fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket);
        if !dir.is_dir() {
            return Err(StoreError::Object(format!("bucket '{bucket}' does not exist")));
        }
        let path = dir.join(key);
        let parent = path.parent().unwrap_or(&dir).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::Object(format!("invalid object key '{key}'")))?;
        let tmp_path = parent.join(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|e| StoreError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::io(&path, e)
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.bucket_dir(bucket).join(key);
        fs::read(&path).map_err(|e| StoreError::io(&path, e))
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        Self::collect_keys(&self.bucket_dir(bucket), "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

// ── In-memory client ────────────────────────────────────────────────

/// Object store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, Vec<u8>>>>, StoreError>
    {
        self.buckets
            .lock()
            .map_err(|_| StoreError::Object("object map lock poisoned".into()))
    }
}

impl ObjectClient for MemoryObjectClient {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.lock()?.entry(bucket.to_string()).or_default();
        Ok(())
    }

    fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut buckets = self.lock()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::Object(format!("bucket '{bucket}' does not exist")))?;
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.lock()?
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| StoreError::Object(format!("no object '{key}' in bucket '{bucket}'")))
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ── Layer store over a client ───────────────────────────────────────

#[derive(Debug)]
pub struct ObjectLayerStore<C: ObjectClient> {
    client: C,
    raw_bucket: String,
    curated_bucket: String,
}

impl<C: ObjectClient> ObjectLayerStore<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            raw_bucket: DEFAULT_RAW_BUCKET.to_string(),
            curated_bucket: DEFAULT_CURATED_BUCKET.to_string(),
        }
    }

    pub fn with_buckets(mut self, raw: impl Into<String>, curated: impl Into<String>) -> Self {
        self.raw_bucket = raw.into();
        self.curated_bucket = curated.into();
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn bucket(&self, layer: Layer) -> &str {
        match layer {
            Layer::Raw => &self.raw_bucket,
            Layer::Curated => &self.curated_bucket,
        }
    }

    fn check_format(&self, format: SnapshotFormat) -> Result<(), StoreError> {
        if format.codec().supports_bytes() {
            Ok(())
        } else {
            Err(StoreError::UnsupportedPayload {
                format,
                backend: self.backend(),
            })
        }
    }
}

impl<C: ObjectClient> LayerStore for ObjectLayerStore<C> {
    fn backend(&self) -> &'static str {
        "object_store"
    }

    fn list_snapshots(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        format: SnapshotFormat,
    ) -> Result<Vec<SnapshotLocator>, StoreError> {
        ensure_path_safe(key)?;
        let bucket = self.bucket(layer);
        if !self.client.bucket_exists(bucket)? {
            return Ok(Vec::new());
        }

        let prefix = format!("{key}/");
        let mut names: Vec<String> = self
            .client
            .list_objects(bucket, &prefix)?
            .iter()
            .filter_map(|object_key| {
                let file = object_key.strip_prefix(&prefix)?;
                if file.contains('/') {
                    return None;
                }
                let (name, ext) = file.rsplit_once('.')?;
                (ext == format.extension()).then(|| name.to_string())
            })
            .collect();
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
        self.check_format(locator.format)?;
        let bytes = self
            .client
            .get_object(self.bucket(locator.layer), &locator.relative_key())?;
        locator
            .format
            .codec()
            .decode(&bytes)
            .map_err(|e| StoreError::codec(locator, e))
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
        self.check_format(format)?;

        let bucket = self.bucket(layer);
        if !self.client.bucket_exists(bucket)? {
            info!(bucket, "creating bucket");
            self.client.create_bucket(bucket)?;
        }

        let taken: BTreeSet<String> = self
            .list_snapshots(layer, key, format)?
            .into_iter()
            .map(|loc| loc.name)
            .collect();
        let name = resolve_name(naming, |candidate| taken.contains(candidate))?;
        let locator = SnapshotLocator {
            layer,
            key: key.clone(),
            name,
            format,
        };

        let bytes = format
            .codec()
            .encode(records)
            .map_err(|e| StoreError::codec(&locator, e))?;
        self.client.put_object(bucket, &locator.relative_key(), bytes)?;

        debug!(snapshot = %locator, rows = records.len(), bucket, "put snapshot object");
        Ok(locator)
    }

    fn list_instruments(&self, layer: Layer) -> Result<Vec<InstrumentKey>, StoreError> {
        let bucket = self.bucket(layer);
        if !self.client.bucket_exists(bucket)? {
            return Ok(Vec::new());
        }
        let keys: BTreeSet<InstrumentKey> = self
            .client
            .list_objects(bucket, "")?
            .iter()
            .filter_map(|object_key| {
                let mut parts = object_key.splitn(3, '/');
                let group = parts.next()?;
                let instrument = parts.next()?;
                parts.next()?;
                let key = InstrumentKey::new(group, instrument);
                key.is_path_safe().then_some(key)
            })
            .collect();
        Ok(keys.into_iter().collect())
    }

    fn exists(&self, layer: Layer) -> Result<bool, StoreError> {
        self.client.bucket_exists(self.bucket(layer))
    }
}
