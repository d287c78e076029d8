use super::{CodecError, SnapshotCodec, COLUMNS};
use crate::domain::Record;
use chrono::NaiveDate;
use polars::prelude::*;
use std::io::Cursor;

/// Columnar binary. Dates are stored as a Date column, gaps as nulls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetCodec;

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn records_to_dataframe(records: &[Record]) -> Result<DataFrame, CodecError> {
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch()).num_days() as i32)
        .collect();
    let column = |name: &str, values: Vec<Option<f64>>| Column::new(name.into(), values);

    DataFrame::new(vec![
        Column::new(COLUMNS[0].into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| CodecError::Parquet(format!("date cast: {e}")))?,
        column(COLUMNS[1], records.iter().map(|r| r.open).collect()),
        column(COLUMNS[2], records.iter().map(|r| r.high).collect()),
        column(COLUMNS[3], records.iter().map(|r| r.low).collect()),
        column(COLUMNS[4], records.iter().map(|r| r.close).collect()),
        Column::new(
            COLUMNS[5].into(),
            records.iter().map(|r| r.volume).collect::<Vec<Option<u64>>>(),
        ),
        column(COLUMNS[6], records.iter().map(|r| r.dividends).collect()),
        column(COLUMNS[7], records.iter().map(|r| r.stock_splits).collect()),
        Column::new(
            COLUMNS[8].into(),
            records
                .iter()
                .map(|r| r.instrument.as_str())
                .collect::<Vec<&str>>(),
        ),
    ])
    .map_err(|e| CodecError::Parquet(format!("dataframe creation: {e}")))
}

fn float_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, CodecError> {
    let column = df
        .column(name)
        .map_err(|e| CodecError::Invalid(format!("missing column '{name}': {e}")))?;
    let cast = column
        .cast(&DataType::Float64)
        .map_err(|e| CodecError::Parquet(format!("{name} column type: {e}")))?;
    let ca = cast
        .f64()
        .map_err(|e| CodecError::Parquet(format!("{name} column type: {e}")))?;
    Ok(ca.clone())
}

fn dataframe_to_records(df: &DataFrame) -> Result<Vec<Record>, CodecError> {
    let map_err = |e: PolarsError| CodecError::Invalid(format!("column read: {e}"));

    let dates = df.column(COLUMNS[0]).map_err(map_err)?;
    let date_ca = dates
        .date()
        .map_err(|e| CodecError::Parquet(format!("date column type: {e}")))?;
    let open_ca = float_column(df, COLUMNS[1])?;
    let high_ca = float_column(df, COLUMNS[2])?;
    let low_ca = float_column(df, COLUMNS[3])?;
    let close_ca = float_column(df, COLUMNS[4])?;
    let volumes = df
        .column(COLUMNS[5])
        .map_err(map_err)?
        .cast(&DataType::UInt64)
        .map_err(|e| CodecError::Parquet(format!("volume column type: {e}")))?;
    let vol_ca = volumes
        .u64()
        .map_err(|e| CodecError::Parquet(format!("volume column type: {e}")))?;
    let div_ca = float_column(df, COLUMNS[6])?;
    let split_ca = float_column(df, COLUMNS[7])?;
    let instruments = df.column(COLUMNS[8]).map_err(map_err)?;
    let inst_ca = instruments
        .str()
        .map_err(|e| CodecError::Parquet(format!("instrument column type: {e}")))?;

    let n = df.height();
    let mut records = Vec::with_capacity(n);

    for i in 0..n {
        let date_days = date_ca
            .get(i)
            .ok_or_else(|| CodecError::Invalid(format!("null date at row {i}")))?;
        let instrument = inst_ca
            .get(i)
            .ok_or_else(|| CodecError::Invalid(format!("null instrument at row {i}")))?;

        records.push(Record {
            date: epoch() + chrono::Duration::days(date_days as i64),
            open: open_ca.get(i),
            high: high_ca.get(i),
            low: low_ca.get(i),
            close: close_ca.get(i),
            volume: vol_ca.get(i),
            dividends: div_ca.get(i),
            stock_splits: split_ca.get(i),
            instrument: instrument.to_string(),
        });
    }

    Ok(records)
}

impl SnapshotCodec for ParquetCodec {
    fn encode(&self, records: &[Record]) -> Result<Vec<u8>, CodecError> {
        let mut df = records_to_dataframe(records)?;
        let mut buf = Vec::new();
        ParquetWriter::new(&mut buf)
            .finish(&mut df)
            .map_err(|e| CodecError::Parquet(format!("write parquet: {e}")))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, CodecError> {
        let df = ParquetReader::new(Cursor::new(bytes.to_vec()))
            .finish()
            .map_err(|e| CodecError::Parquet(format!("read: {e}")))?;
        dataframe_to_records(&df)
    }
}
