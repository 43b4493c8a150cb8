use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::FatalError;
use crate::utils::config::PackagePaths;

/// Dump destination for one run: a caller-supplied directory that is kept,
/// or a scratch directory removed when this value is dropped.
#[derive(Debug)]
pub enum DumpDir {
    Kept(PathBuf),
    Scratch(TempDir),
}

impl DumpDir {
    pub fn path(&self) -> &Path {
        match self {
            DumpDir::Kept(p) => p,
            DumpDir::Scratch(t) => t.path(),
        }
    }
}

/// Prepare the dump destination. An existing non-directory is fatal; a missing directory is created.
pub fn prepare_dump_dir(dump_to: Option<&Path>) -> Result<DumpDir> {
    match dump_to {
        Some(p) if p.exists() && !p.is_dir() => Err(FatalError::DestinationNotDir(p.to_path_buf()).into()),
        Some(p) => {
            std::fs::create_dir_all(p)
                .with_context(|| format!("create dump destination {}", p.display()))?;
            Ok(DumpDir::Kept(p.to_path_buf()))
        }
        None => Ok(DumpDir::Scratch(scratch_dir("dump")?)),
    }
}

/// New scratch directory under the system temp dir, removed on drop.
pub fn scratch_dir(purpose: &str) -> Result<TempDir> {
    let prefix = format!("{}{}-", PackagePaths::get().scratch_prefix(), purpose);
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir()
        .with_context(|| format!("create scratch {purpose} directory"))
}
