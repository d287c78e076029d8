//! Content fingerprints for record collections.

use crate::domain::Record;

/// Deterministic BLAKE3 hash over a record collection, in the order given.
///
/// Missing values hash differently from zero, so a filled gap changes the
/// fingerprint.
pub fn records_hash(records: &[Record]) -> String {
    let mut hasher = blake3::Hasher::new();

    fn opt_f64(hasher: &mut blake3::Hasher, value: Option<f64>) {
        match value {
            Some(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }

    for r in records {
        hasher.update(r.date.to_string().as_bytes());
        hasher.update(r.instrument.as_bytes());
        hasher.update(&[0xff]);
        opt_f64(&mut hasher, r.open);
        opt_f64(&mut hasher, r.high);
        opt_f64(&mut hasher, r.low);
        opt_f64(&mut hasher, r.close);
        match r.volume {
            Some(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        opt_f64(&mut hasher, r.dividends);
        opt_f64(&mut hasher, r.stock_splits);
    }

    hasher.finalize().to_hex().to_string()
}
