//! Load `.symsweep.toml` (CLI only). Values in the file are defaults that command-line flags override.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::config::{PackagePaths, StageWorkers};

#[derive(Debug, Default, Deserialize)]
pub struct SymsweepToml {
    #[serde(default)]
    pub settings: SettingsSection,
    #[serde(default)]
    pub workers: WorkersSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsSection {
    pub tools_dir: Option<PathBuf>,
    pub dump_to: Option<PathBuf>,
    pub arch: Option<String>,
    pub separate_arch: Option<bool>,
    pub exclude: Option<Vec<String>>,
    pub strict: Option<bool>,
    pub verbose: Option<bool>,
    pub progress: Option<bool>,
    /// Replaces the built-in legacy endpoint list.
    pub endpoints: Option<Vec<String>>,
    /// Replaces the built-in authenticated endpoint list.
    pub auth_endpoints: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkersSection {
    pub classify: Option<usize>,
    pub dump: Option<usize>,
    pub upload: Option<usize>,
}

/// Load the config file: `explicit` when given (errors are reported), else
/// `.symsweep.toml` in `dir` if present. Missing or unreadable default file → None.
pub fn load_symsweep_toml(explicit: Option<&Path>, dir: &Path) -> anyhow::Result<Option<SymsweepToml>> {
    if let Some(path) = explicit {
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        let parsed = toml::from_str(&s)
            .map_err(|e| anyhow::anyhow!("parse config {}: {}", path.display(), e))?;
        return Ok(Some(parsed));
    }
    let path = dir.join(PackagePaths::get().config_filename());
    let Ok(s) = std::fs::read_to_string(&path) else {
        return Ok(None);
    };
    Ok(toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok())
}

/// Overwrite a worker count from the file when present and non-zero.
macro_rules! apply_worker_count {
    ($section:expr, $workers:expr, $field:ident) => {
        if let Some(n) = $section.$field.filter(|n| *n > 0) {
            $workers.$field = n;
        }
    };
}

impl WorkersSection {
    pub fn apply(&self, workers: &mut StageWorkers) {
        apply_worker_count!(self, workers, classify);
        apply_worker_count!(self, workers, dump);
        apply_worker_count!(self, workers, upload);
    }
}
