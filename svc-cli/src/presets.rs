//! Named session presets (JSON file in the user data directory).
//!
//! ```json
//! { "presets": { "default": { ... }, "alto-live": { "transpose": 3, ... } } }
//! ```
//!
//! The built-in `default` preset is always present and cannot be deleted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use svc_core::SessionConfig;

pub const DEFAULT_PRESET: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetFile {
    pub presets: BTreeMap<String, SessionConfig>,
}

impl Default for PresetFile {
    fn default() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert(DEFAULT_PRESET.to_string(), SessionConfig::default());
        Self { presets }
    }
}

impl PresetFile {
    /// Re-insert the built-in preset if the file on disk lacks it.
    pub fn normalize(&mut self) {
        self.presets
            .entry(DEFAULT_PRESET.to_string())
            .or_default();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&SessionConfig> {
        self.presets.get(normalize_name(name).as_str())
    }

    /// Insert or overwrite `name`.
    pub fn add(&mut self, name: &str, config: SessionConfig) -> Result<()> {
        let name = normalize_name(name);
        if name.is_empty() {
            bail!("preset name must not be empty");
        }
        self.presets.insert(name, config);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let name = normalize_name(name);
        if name == DEFAULT_PRESET {
            bail!("the built-in '{DEFAULT_PRESET}' preset cannot be deleted");
        }
        if self.presets.remove(&name).is_none() {
            bail!("no preset named '{name}'");
        }
        Ok(())
    }
}

fn normalize_name(raw: &str) -> String {
    raw.trim().to_string()
}

pub fn default_presets_path() -> PathBuf {
    if let Some(path) = std::env::var_os("SVC_PRESETS_PATH") {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("svc")
            .join("presets.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("svc")
            .join("presets.json")
    }
}

/// A missing file yields the built-in presets; a malformed one is an error.
pub fn load_presets(path: &Path) -> Result<PresetFile> {
    let mut file = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<PresetFile>(&raw)
            .with_context(|| format!("malformed presets file {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PresetFile::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", path.display()));
        }
    };
    file.normalize();
    Ok(file)
}

pub fn save_presets(path: &Path, presets: &PresetFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(presets)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
