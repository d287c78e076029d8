//! Instrument universe: group-organized instrument lists.
//!
//! Stored as a TOML table mapping each group label (exchange, category) to
//! its member instruments. The universe decides which checkpoint entries a
//! ledger must carry and which instruments an ingestion run visits.

use crate::domain::InstrumentKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The complete set of instruments an ingestion engine is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Universe {
    /// Load a universe from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read universe file: {e}"))?;
        Self::from_toml(&content)
    }

    /// Parse a universe from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("parse universe TOML: {e}"))
    }

    /// Serialize the universe to TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize universe: {e}"))
    }

    /// Single-group universe.
    pub fn single_group(group: &str, instruments: &[&str]) -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            group.to_string(),
            instruments.iter().map(|s| s.to_string()).collect(),
        );
        Self { groups }
    }

    /// Every key in the universe, group order then declaration order,
    /// duplicates removed.
    pub fn keys(&self) -> Vec<InstrumentKey> {
        let mut keys: Vec<InstrumentKey> = Vec::with_capacity(self.instrument_count());
        for (group, instruments) in &self.groups {
            for instrument in instruments {
                let key = InstrumentKey::new(group.as_str(), instrument.as_str());
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Instruments for a specific group.
    pub fn group_instruments(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(|v| v.as_slice())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(|s| s.as_str()).collect()
    }

    pub fn instrument_count(&self) -> usize {
        self.groups.values().map(|v| v.len()).sum()
    }

    /// Add an instrument to a group, creating the group when needed.
    pub fn insert(&mut self, key: &InstrumentKey) {
        let members = self.groups.entry(key.group.clone()).or_default();
        if !members.contains(&key.instrument) {
            members.push(key.instrument.clone());
        }
    }
}

impl FromIterator<InstrumentKey> for Universe {
    fn from_iter<I: IntoIterator<Item = InstrumentKey>>(iter: I) -> Self {
        let mut universe = Universe::default();
        for key in iter {
            universe.insert(&key);
        }
        universe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Universe {
        Universe::from_toml(
            r#"
[groups]
b3 = ["WEGE3.SA", "MGLU3.SA"]
nasdaq = ["AAPL"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn toml_roundtrip() {
        let u = sample();
        let parsed = Universe::from_toml(&u.to_toml().unwrap()).unwrap();
        assert_eq!(u, parsed);
    }

    #[test]
    fn keys_are_grouped_and_ordered() {
        let keys = sample().keys();
        assert_eq!(
            keys,
            vec![
                InstrumentKey::new("b3", "WEGE3.SA"),
                InstrumentKey::new("b3", "MGLU3.SA"),
                InstrumentKey::new("nasdaq", "AAPL"),
            ]
        );
    }

    #[test]
    fn duplicate_members_collapse() {
        let u = Universe::single_group("nyse", &["IBM", "IBM"]);
        assert_eq!(u.keys().len(), 1);
    }

    #[test]
    fn collect_from_keys() {
        let u: Universe = vec![
            InstrumentKey::new("nyse", "IBM"),
            InstrumentKey::new("nyse", "KO"),
            InstrumentKey::new("nyse", "IBM"),
        ]
        .into_iter()
        .collect();
        assert_eq!(u.group_instruments("nyse").unwrap(), ["IBM", "KO"]);
        assert_eq!(u.group_names(), vec!["nyse"]);
    }
}
