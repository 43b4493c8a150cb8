//! Extraction stage: one artifact per work item, written by the external dumper.

use crossbeam_channel::Sender;
use log::{debug, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::WorkItem;
use crate::error::{DumpError, FatalError};
use crate::pipeline::context::RunControl;
use crate::pipeline::naming::create_artifact;
use crate::utils::config::ToolNames;

/// Writes the symbol record for one architecture of `image` into `out`.
pub trait Dump: Send + Sync {
    fn dump(&self, arch: &str, image: &Path, out: File) -> Result<(), DumpError>;
}

/// Runs `dump_syms -a <arch> <image>` with stdout redirected into the artifact.
#[derive(Clone, Debug)]
pub struct ExternalDumper {
    program: PathBuf,
}

impl ExternalDumper {
    /// `dump_syms` inside `tools_dir`, or from `PATH` when None.
    pub fn new(tools_dir: Option<&Path>) -> Self {
        Self {
            program: ToolNames::resolve(tools_dir, ToolNames::DUMPER),
        }
    }
}

impl Dump for ExternalDumper {
    fn dump(&self, arch: &str, image: &Path, out: File) -> Result<(), DumpError> {
        let output = Command::new(&self.program)
            .arg("-a")
            .arg(arch)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        Err(DumpError::Failed {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Per-item extraction logic, shared by every dump worker.
pub struct Extraction {
    dest: PathBuf,
    separate_arch: bool,
    dumper: Arc<dyn Dump>,
    control: Arc<RunControl>,
}

impl Extraction {
    pub fn new(dest: &Path, separate_arch: bool, dumper: Arc<dyn Dump>, control: Arc<RunControl>) -> Self {
        Self {
            dest: dest.to_path_buf(),
            separate_arch,
            dumper,
            control,
        }
    }

    /// Directory the artifact for `arch` goes into, created on demand.
    fn artifact_dir(&self, arch: &str) -> Result<PathBuf, FatalError> {
        if !self.separate_arch {
            return Ok(self.dest.clone());
        }
        let dir = self.dest.join(arch);
        std::fs::create_dir_all(&dir).map_err(|source| FatalError::ArtifactCreate {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Dump one item. Returns the artifact path on success.
    /// Fatal errors are recorded on the run control; dump failures are logged and counted.
    pub fn process(&self, item: &WorkItem) -> Option<PathBuf> {
        let created = self
            .artifact_dir(&item.arch)
            .and_then(|dir| create_artifact(&dir, &item.path, &item.arch));
        let (file, artifact) = match created {
            Ok(v) => v,
            Err(e) => {
                self.control.fail(e);
                return None;
            }
        };
        match self.dumper.dump(&item.arch, &item.path, file) {
            Ok(()) => {
                debug!("dumped {} ({}) -> {}", item.path.display(), item.arch, artifact.display());
                self.control.stats.record_dumped();
                Some(artifact)
            }
            Err(e) => {
                warn!("dump {} ({}) failed: {}", item.path.display(), item.arch, e);
                if let Err(rm) = std::fs::remove_file(&artifact) {
                    warn!("remove failed artifact {}: {}", artifact.display(), rm);
                }
                self.control.stats.record(&self.control.stats.dump_failed);
                None
            }
        }
    }

    /// Worker body: skip when the run is stopping, forward successes when delivery is attached.
    pub fn handle(&self, item: WorkItem, artifact_tx: Option<&Sender<PathBuf>>) {
        if self.control.is_stopped() {
            return;
        }
        if let Some(artifact) = self.process(&item)
            && let Some(tx) = artifact_tx
            && let Err(unsent) = tx.send(artifact)
        {
            warn!("delivery closed, {} will not be uploaded", unsent.0.display());
        }
    }
}
