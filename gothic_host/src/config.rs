use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root of the recursive `.lua` discovery.
    pub scripts_dir: PathBuf,
    /// Optional `<type>:<path>` manifest loaded before discovery.
    pub manifest: Option<PathBuf>,
    pub enable_jit: bool,
    pub load_mod_scripts: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("Data/scripts"),
            manifest: None,
            enable_jit: true,
            load_mod_scripts: true,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading host config {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing host config {}", path.display()))
    }
}
