//! Snapshot encodings.
//!
//! `SnapshotFormat` picks the physical encoding of a snapshot; each format is
//! served by a stateless codec from a static table. Byte-oriented codecs (CSV,
//! Parquet) work over both files and object payloads. SQLite only exists as a
//! file on disk.

mod csv;
mod parquet;
mod sqlite;

pub use self::csv::CsvCodec;
pub use self::parquet::ParquetCodec;
pub use self::sqlite::SqliteCodec;

use crate::domain::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Column headers shared by every encoding, in write order.
pub const COLUMNS: [&str; 9] = [
    "Date",
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "Dividends",
    "Stock Splits",
    "Instrument",
];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O: {0}")]
    Io(#[from] io::Error),

    #[error("csv: {0}")]
    Csv(String),

    #[error("parquet: {0}")]
    Parquet(String),

    #[error("sqlite: {0}")]
    Sqlite(String),

    #[error("{format} snapshots cannot be encoded as a byte payload")]
    NotByteEncodable { format: SnapshotFormat },

    #[error("invalid snapshot content: {0}")]
    Invalid(String),
}

/// Physical encoding of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Csv,
    Parquet,
    Sqlite,
}

static CSV: CsvCodec = CsvCodec;
static PARQUET: ParquetCodec = ParquetCodec;
static SQLITE: SqliteCodec = SqliteCodec;

impl SnapshotFormat {
    pub const ALL: [SnapshotFormat; 3] = [
        SnapshotFormat::Csv,
        SnapshotFormat::Parquet,
        SnapshotFormat::Sqlite,
    ];

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Csv => "csv",
            SnapshotFormat::Parquet => "parquet",
            SnapshotFormat::Sqlite => "db",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    pub fn codec(&self) -> &'static dyn SnapshotCodec {
        match self {
            SnapshotFormat::Csv => &CSV,
            SnapshotFormat::Parquet => &PARQUET,
            SnapshotFormat::Sqlite => &SQLITE,
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotFormat::Csv => "csv",
            SnapshotFormat::Parquet => "parquet",
            SnapshotFormat::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// Encode/decode a record collection.
pub trait SnapshotCodec: Send + Sync {
    fn encode(&self, records: &[Record]) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, CodecError>;

    /// Whether `encode`/`decode` work at all. Object backends need this.
    fn supports_bytes(&self) -> bool {
        true
    }

    /// Write to `path`, replacing whatever is there.
    fn write_file(&self, path: &Path, records: &[Record]) -> Result<(), CodecError> {
        let bytes = self.encode(records)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<Record>, CodecError> {
        let bytes = fs::read(path)?;
        self.decode(&bytes)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::Record;
    use chrono::NaiveDate;

    /// Two rows with a full record and a sparse one.
    pub fn sample() -> Vec<Record> {
        let date = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        vec![
            Record {
                date: date(2),
                open: Some(100.0),
                high: Some(102.0),
                low: Some(99.0),
                close: Some(101.0),
                volume: Some(1000),
                dividends: Some(0.0),
                stock_splits: Some(0.0),
                instrument: "WEGE3.SA".into(),
            },
            Record {
                close: Some(102.5),
                ..Record::empty(date(3), "WEGE3.SA")
            },
        ]
    }
}
