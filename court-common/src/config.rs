use crate::match_snapshot::{BestOf, MatchMeta, MatchSnapshot};
use log::*;
use serde_derive::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;

/// Match settings applied to a court the first time it is seen
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDefaults {
    pub name: String,
    pub best_of: BestOf,
    pub golden_point: bool,
}

impl Default for MatchDefaults {
    fn default() -> Self {
        Self {
            name: String::new(),
            best_of: BestOf::Three,
            golden_point: false,
        }
    }
}

impl MatchDefaults {
    pub fn new_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let config_file = match read_to_string(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to read match defaults file: {}", e);
                return Err(Box::new(e));
            }
        };

        match toml::from_str(&config_file) {
            Ok(c) => Ok(c),
            Err(e) => {
                error!("Failed to parse match defaults file: {}", e);
                Err(Box::new(e))
            }
        }
    }

    pub fn meta(&self) -> MatchMeta {
        MatchMeta {
            name: self.name.clone(),
            best_of: self.best_of,
            golden_point: self.golden_point,
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot::with_meta(self.meta())
    }
}
