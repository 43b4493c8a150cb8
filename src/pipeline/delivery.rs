//! Delivery stage: upload every artifact to every endpoint, with retry.

use log::{debug, error, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use crate::pipeline::context::RunControl;
use crate::utils::config::ToolNames;
use crate::{Credential, RetryPolicy, ToolOutput};

/// Sends one artifact to one endpoint. `credential` selects the authenticated protocol.
pub trait Upload: Send + Sync {
    fn upload(&self, artifact: &Path, endpoint: &str, credential: Option<&Credential>) -> io::Result<ToolOutput>;
}

/// Runs `symupload [-p sym-upload-v2 -k <key>] <artifact> <endpoint>`.
#[derive(Clone, Debug)]
pub struct ExternalUploader {
    program: PathBuf,
}

impl ExternalUploader {
    /// `symupload` inside `tools_dir`, or from `PATH` when None.
    pub fn new(tools_dir: Option<&Path>) -> Self {
        Self {
            program: ToolNames::resolve(tools_dir, ToolNames::UPLOADER),
        }
    }
}

impl Upload for ExternalUploader {
    fn upload(&self, artifact: &Path, endpoint: &str, credential: Option<&Credential>) -> io::Result<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        if let Some(key) = credential {
            cmd.arg("-p").arg(ToolNames::AUTH_PROTOCOL).arg("-k").arg(key.expose());
        }
        let out = cmd.arg(artifact).arg(endpoint).stdin(Stdio::null()).output()?;
        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(ToolOutput {
            code: out.status.code(),
            output: text.trim().to_string(),
        })
    }
}

/// How one endpoint ended up for one artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointOutcome {
    Uploaded,
    AlreadyPresent,
    Failed,
}

/// Per-artifact delivery logic, shared by every upload worker.
pub struct Delivery {
    endpoints: Vec<String>,
    credential: Option<Credential>,
    uploader: Arc<dyn Upload>,
    policy: RetryPolicy,
    control: Arc<RunControl>,
}

impl Delivery {
    pub fn new(
        endpoints: Vec<String>,
        credential: Option<Credential>,
        uploader: Arc<dyn Upload>,
        policy: RetryPolicy,
        control: Arc<RunControl>,
    ) -> Self {
        Self {
            endpoints,
            credential,
            uploader,
            policy,
            control,
        }
    }

    /// Upload `artifact` to every endpoint in order. One endpoint's failure never skips the others.
    pub fn deliver(&self, artifact: &Path) -> Vec<EndpointOutcome> {
        let outcomes = self
            .endpoints
            .iter()
            .map(|endpoint| self.deliver_to(artifact, endpoint))
            .collect();
        self.control.stats.record_delivered();
        outcomes
    }

    /// Up to `max_attempts` tries against one endpoint, waiting `delay` between them.
    /// "Already exists" (authenticated protocol only) counts as done.
    pub fn deliver_to(&self, artifact: &Path, endpoint: &str) -> EndpointOutcome {
        let stats = &self.control.stats;
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            let reason = match self.uploader.upload(artifact, endpoint, self.credential.as_ref()) {
                Ok(out) if out.success() => {
                    info!("uploaded {} to {}", artifact.display(), endpoint);
                    stats.record(&stats.uploaded);
                    return EndpointOutcome::Uploaded;
                }
                Ok(out)
                    if self.credential.is_some()
                        && out.code == Some(ToolNames::ALREADY_EXISTS_STATUS) =>
                {
                    debug!("{} already present on {}", artifact.display(), endpoint);
                    stats.record(&stats.already_present);
                    return EndpointOutcome::AlreadyPresent;
                }
                Ok(out) => format!("exit {:?}: {}", out.code, out.output),
                Err(e) => format!("could not run uploader: {}", e),
            };
            if attempt < attempts {
                warn!(
                    "upload {} to {} failed (attempt {}/{}), retrying: {}",
                    artifact.display(),
                    endpoint,
                    attempt,
                    attempts,
                    reason
                );
                if !self.policy.delay.is_zero() {
                    thread::sleep(self.policy.delay);
                }
            } else {
                error!(
                    "upload {} to {} failed after {} attempts: {}",
                    artifact.display(),
                    endpoint,
                    attempts,
                    reason
                );
            }
        }
        stats.record(&stats.upload_failed);
        EndpointOutcome::Failed
    }

    /// Worker body.
    pub fn handle(&self, artifact: PathBuf) {
        if self.control.is_stopped() {
            return;
        }
        self.deliver(&artifact);
    }
}
