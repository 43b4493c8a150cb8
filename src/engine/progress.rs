//! Progress counters for dumped and uploaded artifacts

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a counter for unknown total (shows count without percentage).
/// `position` stacks several counters on separate terminal lines.
pub fn create_counter(desc: &'static str, position: u16) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = position,
        unit = " files"
    )))
}

/// Force a refresh of the bar (e.g. so a counter shows "0 files" immediately).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Add `n` to the counter.
/// Uses a blocking lock: counts must add up, and updates are rare next to child-process runs.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut pb) = pb.lock() {
        let _ = pb.update(n);
    }
}

/// Counters for the stages that are active, or None when progress is off.
pub fn create_stage_counters(progress: bool, dumping: bool, uploading: bool) -> (Option<ProgressBar>, Option<ProgressBar>) {
    if !progress {
        return (None, None);
    }
    let dump = dumping.then(|| create_counter("Dumped", 0));
    let upload = uploading.then(|| create_counter("Uploaded", u16::from(dumping)));
    for bar in dump.iter().chain(upload.iter()) {
        refresh_bar(bar);
    }
    (dump, upload)
}
