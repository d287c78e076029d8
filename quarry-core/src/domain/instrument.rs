//! Instrument identity and bar interval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of one instrument series: a group label (exchange, category) plus
/// the instrument identifier.
///
/// `(group, instrument)` is the uniqueness scope for checkpoints and storage
/// namespaces. The textual form is `group/instrument`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentKey {
    pub group: String,
    pub instrument: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid instrument key '{0}': expected 'group/instrument'")]
pub struct KeyParseError(pub String);

impl InstrumentKey {
    pub fn new(group: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            instrument: instrument.into(),
        }
    }

    /// True when both segments can be used verbatim as directory names or
    /// object-key segments.
    pub fn is_path_safe(&self) -> bool {
        fn segment_ok(s: &str) -> bool {
            !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
        }
        segment_ok(&self.group) && segment_ok(&self.instrument)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.instrument)
    }
}

impl FromStr for InstrumentKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((group, instrument))
                if !group.is_empty() && !instrument.is_empty() && !instrument.contains('/') =>
            {
                Ok(Self::new(group, instrument))
            }
            _ => Err(KeyParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for InstrumentKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstrumentKey> for String {
    fn from(key: InstrumentKey) -> Self {
        key.to_string()
    }
}

/// Bar interval requested from a market-data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1wk")]
    Week,
    #[serde(rename = "1mo")]
    Month,
}

impl Interval {
    /// Query-string form used by chart APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Day => "1d",
            Interval::Week => "1wk",
            Interval::Month => "1mo",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parses_and_displays() {
        let key: InstrumentKey = "b3/WEGE3.SA".parse().unwrap();
        assert_eq!(key.group, "b3");
        assert_eq!(key.instrument, "WEGE3.SA");
        assert_eq!(key.to_string(), "b3/WEGE3.SA");
    }

    #[test]
    fn key_rejects_missing_group() {
        assert!("AAPL".parse::<InstrumentKey>().is_err());
        assert!("/AAPL".parse::<InstrumentKey>().is_err());
        assert!("nasdaq/".parse::<InstrumentKey>().is_err());
        assert!("a/b/c".parse::<InstrumentKey>().is_err());
    }

    #[test]
    fn path_safety() {
        assert!(InstrumentKey::new("nyse", "BRK-B").is_path_safe());
        assert!(!InstrumentKey::new("nyse", "..").is_path_safe());
        assert!(!InstrumentKey::new("", "SPY").is_path_safe());
        assert!(!InstrumentKey::new("nyse", "a\\b").is_path_safe());
    }

    #[test]
    fn key_serializes_as_string() {
        let key = InstrumentKey::new("nasdaq", "AAPL");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"nasdaq/AAPL\"");
        let back: InstrumentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn interval_wire_names() {
        assert_eq!(Interval::Week.as_str(), "1wk");
        let parsed: Interval = serde_json::from_str("\"1mo\"").unwrap();
        assert_eq!(parsed, Interval::Month);
    }
}
