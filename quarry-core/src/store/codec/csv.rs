use super::{CodecError, SnapshotCodec, COLUMNS};
use crate::domain::Record;

/// Row-oriented text. Missing values are empty fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

impl SnapshotCodec for CsvCodec {
    fn encode(&self, records: &[Record]) -> Result<Vec<u8>, CodecError> {
        // header is written by hand so an empty snapshot still carries it
        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(COLUMNS)
            .map_err(|e| CodecError::Csv(e.to_string()))?;
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| CodecError::Csv(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| CodecError::Csv(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, CodecError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);
        reader
            .deserialize()
            .collect::<Result<Vec<Record>, _>>()
            .map_err(|e| CodecError::Csv(e.to_string()))
    }
}
