use log::{info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::progress::{ProgressBar, update_progress_bar};
use crate::pipeline::context::RunControl;

/// Per-run counters, bumped by workers of every stage.
#[derive(Default)]
pub struct RunStats {
    pub files_walked: AtomicUsize,
    pub excluded: AtomicUsize,
    pub work_items: AtomicUsize,
    pub dumped: AtomicUsize,
    pub dump_failed: AtomicUsize,
    pub uploaded: AtomicUsize,
    pub already_present: AtomicUsize,
    pub upload_failed: AtomicUsize,
    dump_bar: Option<ProgressBar>,
    upload_bar: Option<ProgressBar>,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RunStats {
    pub fn with_progress(dump_bar: Option<ProgressBar>, upload_bar: Option<ProgressBar>) -> Self {
        Self {
            dump_bar,
            upload_bar,
            ..Self::default()
        }
    }

    pub fn record_dumped(&self) {
        bump(&self.dumped);
        if let Some(bar) = &self.dump_bar {
            update_progress_bar(bar, 1);
        }
    }

    /// Called once per artifact after every endpoint has been tried.
    pub fn record_delivered(&self) {
        if let Some(bar) = &self.upload_bar {
            update_progress_bar(bar, 1);
        }
    }

    pub fn record(&self, counter: &AtomicUsize) {
        bump(counter);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

/// Log the end-of-run summary. Failures are warnings; they never change the exit code.
pub fn report_run(control: &RunControl, verbose: bool) {
    let s = &control.stats;
    let skipped = control.skipped_paths();
    if !skipped.is_empty() {
        warn!(
            "Skipped {} paths due to permission errors or access issues",
            skipped.len()
        );
        if verbose {
            for (p, msg) in &skipped {
                eprintln!("  skipped: {} ({})", p.display(), msg);
            }
        }
    }
    info!(
        "Walked {} files ({} excluded), {} images to dump",
        RunStats::get(&s.files_walked),
        RunStats::get(&s.excluded),
        RunStats::get(&s.work_items)
    );
    info!(
        "Dumped {} artifacts ({} failed); endpoint uploads: {} ok, {} already present, {} failed",
        RunStats::get(&s.dumped),
        RunStats::get(&s.dump_failed),
        RunStats::get(&s.uploaded),
        RunStats::get(&s.already_present),
        RunStats::get(&s.upload_failed)
    );
    let failed = RunStats::get(&s.dump_failed) + RunStats::get(&s.upload_failed);
    if failed > 0 {
        warn!("{} dumps/uploads failed; see log lines above for each item", failed);
    }
}
