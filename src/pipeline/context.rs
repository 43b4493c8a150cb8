//! Pipeline context: run-wide stop/fatal state and the tuning each stage is started with.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::Opts;
use crate::error::FatalError;
use crate::pipeline::report::RunStats;
use crate::utils::cap_workers_by_fd_limit;
use crate::utils::config::{ChannelCaps, StageWorkers};

/// Worker counts and queue capacities for one run.
#[derive(Clone, Debug)]
pub struct PipelineTuning {
    pub workers: StageWorkers,
    pub path_cap: usize,
    pub item_cap: usize,
    pub artifact_cap: usize,
}

impl PipelineTuning {
    /// Tuning from opts, with the disk-heavy pools capped by the FD limit.
    pub fn from_opts(opts: &Opts) -> Self {
        let workers = StageWorkers {
            classify: cap_workers_by_fd_limit(opts.workers.classify, 2),
            dump: cap_workers_by_fd_limit(opts.workers.dump, 2),
            upload: opts.workers.upload.max(1),
        };
        Self {
            workers,
            path_cap: ChannelCaps::PATHS,
            item_cap: ChannelCaps::WORK_ITEMS,
            artifact_cap: ChannelCaps::ARTIFACTS,
        }
    }
}

/// Shared by every worker of every stage: stop flag, first fatal error, counters.
///
/// A fatal error in any worker sets the stop flag; the walk stops submitting and
/// workers drop what is left in their queues, so the run drains quickly and the
/// error surfaces from the orchestrator.
#[derive(Default)]
pub struct RunControl {
    stopped: AtomicBool,
    first_fatal: Mutex<Option<FatalError>>,
    skipped_paths: Mutex<Vec<(PathBuf, String)>>,
    pub stats: RunStats,
}

impl RunControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_stats(stats: RunStats) -> Arc<Self> {
        Arc::new(Self {
            stats,
            ..Self::default()
        })
    }

    /// Stop without an error (Ctrl+C).
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Record a fatal error (first one wins) and stop the run.
    pub fn fail(&self, err: FatalError) {
        if let Ok(mut slot) = self.first_fatal.lock()
            && slot.is_none()
        {
            log::error!("{}", err);
            *slot = Some(err);
        }
        self.cancel();
    }

    pub fn take_fatal(&self) -> Option<FatalError> {
        self.first_fatal.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Walk error that was skipped (non-strict mode).
    pub fn record_skipped(&self, path: PathBuf, msg: String) {
        if let Ok(mut skipped) = self.skipped_paths.lock() {
            skipped.push((path, msg));
        }
    }

    pub fn skipped_paths(&self) -> Vec<(PathBuf, String)> {
        self.skipped_paths
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}
