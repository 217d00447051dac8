//! Speaker table read from the model's `config.json`.
//!
//! Only the fields the pipeline needs are parsed:
//!
//! ```json
//! { "data": { "sampling_rate": 44100, "hop_length": 512 },
//!   "spk": { "alice": 0, "bob": 1 } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SvcError};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfigFile {
    pub data: DataSection,
    #[serde(default)]
    pub spk: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSection {
    pub sampling_rate: u32,
    pub hop_length: usize,
}

impl ModelConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let parsed: Self = serde_json::from_str(&raw)?;
        if parsed.data.sampling_rate == 0 || parsed.data.hop_length == 0 {
            return Err(SvcError::config(format!(
                "{}: sampling_rate and hop_length must be positive",
                path.display()
            )));
        }
        Ok(parsed)
    }

    pub fn speaker_table(&self) -> SpeakerTable {
        SpeakerTable::new(self.spk.iter().map(|(name, &id)| (name.clone(), id)))
    }
}

/// A resolved speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    pub name: String,
    pub id: usize,
}

/// Speakers ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeakerTable {
    entries: Vec<Speaker>,
}

impl SpeakerTable {
    pub fn new(entries: impl IntoIterator<Item = (String, usize)>) -> Self {
        let mut entries: Vec<Speaker> = entries
            .into_iter()
            .map(|(name, id)| Speaker { name, id })
            .collect();
        entries.sort_by_key(|s| s.id);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.name.as_str())
    }

    /// Look up `name`, or take the lowest-id speaker when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Speaker> {
        match name {
            Some(name) => self
                .entries
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| {
                    SvcError::config(format!(
                        "unknown speaker '{name}' (available: {})",
                        self.names().collect::<Vec<_>>().join(", ")
                    ))
                }),
            None => self
                .entries
                .first()
                .cloned()
                .ok_or_else(|| SvcError::config("model has no speakers")),
        }
    }
}
