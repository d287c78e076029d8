use super::{CodecError, SnapshotCodec, SnapshotFormat};
use crate::domain::Record;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags};
use std::fs;
use std::path::Path;

/// One embedded database file per snapshot, rows in table `records`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCodec;

const CREATE_TABLE: &str = "
    DROP TABLE IF EXISTS records;
    CREATE TABLE records (
        date TEXT NOT NULL,
        open REAL,
        high REAL,
        low REAL,
        close REAL,
        volume INTEGER,
        dividends REAL,
        stock_splits REAL,
        instrument TEXT NOT NULL
    );";

fn sql_err(e: rusqlite::Error) -> CodecError {
    CodecError::Sqlite(e.to_string())
}

type Row = (
    String,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<i64>,
    Option<f64>,
    Option<f64>,
    String,
);

impl SnapshotCodec for SqliteCodec {
    fn encode(&self, _records: &[Record]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::NotByteEncodable {
            format: SnapshotFormat::Sqlite,
        })
    }

    fn decode(&self, _bytes: &[u8]) -> Result<Vec<Record>, CodecError> {
        Err(CodecError::NotByteEncodable {
            format: SnapshotFormat::Sqlite,
        })
    }

    fn supports_bytes(&self) -> bool {
        false
    }

    fn write_file(&self, path: &Path, records: &[Record]) -> Result<(), CodecError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let mut conn = Connection::open(path).map_err(sql_err)?;
        conn.execute_batch(CREATE_TABLE).map_err(sql_err)?;

        let tx = conn.transaction().map_err(sql_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO records
                     (date, open, high, low, close, volume, dividends, stock_splits, instrument)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(sql_err)?;
            for r in records {
                let volume = r
                    .volume
                    .map(i64::try_from)
                    .transpose()
                    .map_err(|e| CodecError::Invalid(format!("volume out of range: {e}")))?;
                stmt.execute(params![
                    r.date.to_string(),
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    volume,
                    r.dividends,
                    r.stock_splits,
                    r.instrument,
                ])
                .map_err(sql_err)?;
            }
        }
        tx.commit().map_err(sql_err)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<Record>, CodecError> {
        let conn =
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(sql_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT date, open, high, low, close, volume, dividends, stock_splits, instrument
                 FROM records ORDER BY rowid",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| -> rusqlite::Result<Row> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })
            .map_err(sql_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (date, open, high, low, close, volume, dividends, stock_splits, instrument) =
                row.map_err(sql_err)?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| CodecError::Invalid(format!("bad date '{date}': {e}")))?;
            let volume = volume
                .map(u64::try_from)
                .transpose()
                .map_err(|e| CodecError::Invalid(format!("negative volume: {e}")))?;
            records.push(Record {
                date,
                open,
                high,
                low,
                close,
                volume,
                dividends,
                stock_splits,
                instrument,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::codec::fixtures::sample;
    use std::env;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir().join(format!("quarry_sqlite_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir.join("snapshot.db")
    }

    #[test]
    fn file_roundtrip_keeps_row_order_and_gaps() {
        let path = temp_path();
        SqliteCodec.write_file(&path, &sample()).unwrap();
        assert_eq!(SqliteCodec.read_file(&path).unwrap(), sample());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn rewrite_replaces_previous_rows() {
        let path = temp_path();
        SqliteCodec.write_file(&path, &sample()).unwrap();
        SqliteCodec.write_file(&path, &sample()[..1]).unwrap();
        assert_eq!(SqliteCodec.read_file(&path).unwrap().len(), 1);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn bytes_are_unsupported() {
        assert!(matches!(
            SqliteCodec.encode(&sample()),
            Err(CodecError::NotByteEncodable { .. })
        ));
    }
}
