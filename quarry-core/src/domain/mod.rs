//! Domain types shared by every layer of the pipeline.

pub mod instrument;
pub mod record;

pub use instrument::{InstrumentKey, Interval, KeyParseError};
pub use record::{Record, RecordKey};
