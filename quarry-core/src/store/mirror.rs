//! Primary store plus a replica that receives every snapshot under the same name.
//!
//! Typical pairing is a local filesystem primary with an object-storage
//! mirror: write locally, then upload. Reads and listings only touch the primary.

use super::{Layer, LayerStore, SnapshotFormat, SnapshotLocator, SnapshotName, StoreError};
use crate::domain::{InstrumentKey, Record};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct MirroredLayerStore<P, M> {
    primary: P,
    mirror: M,
}

impl<P: LayerStore, M: LayerStore> MirroredLayerStore<P, M> {
    pub fn new(primary: P, mirror: M) -> Self {
        Self { primary, mirror }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }
}

impl<P: LayerStore, M: LayerStore> LayerStore for MirroredLayerStore<P, M> {
    fn backend(&self) -> &'static str {
        "mirrored"
    }

    fn list_snapshots(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        format: SnapshotFormat,
    ) -> Result<Vec<SnapshotLocator>, StoreError> {
        self.primary.list_snapshots(layer, key, format)
    }

    fn read(&self, locator: &SnapshotLocator) -> Result<Vec<Record>, StoreError> {
        self.primary.read(locator)
    }

    /// The snapshot stays on the primary even if replication fails; the
    /// error still reaches the caller.
    fn write(
        &self,
        layer: Layer,
        key: &InstrumentKey,
        records: &[Record],
        format: SnapshotFormat,
        naming: &SnapshotName,
    ) -> Result<SnapshotLocator, StoreError> {
        let locator = self.primary.write(layer, key, records, format, naming)?;

        let same_name = SnapshotName::Fixed(locator.name.clone());
        match self.mirror.write(layer, key, records, format, &same_name) {
            Ok(_) => {
                debug!(snapshot = %locator, mirror = self.mirror.backend(), "replicated snapshot");
                Ok(locator)
            }
            Err(e) => {
                warn!(snapshot = %locator, error = %e, "replication failed");
                Err(StoreError::Replication {
                    name: locator.name,
                    source: Box::new(e),
                })
            }
        }
    }

    fn list_instruments(&self, layer: Layer) -> Result<Vec<InstrumentKey>, StoreError> {
        self.primary.list_instruments(layer)
    }

    fn exists(&self, layer: Layer) -> Result<bool, StoreError> {
        self.primary.exists(layer)
    }
}
