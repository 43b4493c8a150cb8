//! Discovery stage: walk each root's scan targets, drop excluded paths, classify
//! the rest on a worker pool and emit one work item per dumpable architecture.

use crossbeam_channel::Sender;
use log::{debug, info};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::FatalError;
use crate::pipeline::classify::{Classify, arch_tag};
use crate::pipeline::context::{PipelineTuning, RunControl};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::walk::{WalkOutcome, walk_files};
use crate::utils::config::{DEFAULT_EXCLUDES, OPTIONAL_SCAN_PATHS, REQUIRED_SCAN_PATHS};
use crate::{Classification, ScanTarget, WorkItem};

/// Ordered exclude regexes, matched against the full path. First match wins.
#[derive(Clone, Debug)]
pub struct ExclusionRules {
    rules: Vec<Regex>,
}

impl ExclusionRules {
    /// Built-in rules followed by `extra`.
    pub fn with_defaults(extra: &[String]) -> Result<Self, FatalError> {
        Self::from_patterns(
            DEFAULT_EXCLUDES
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str)),
        )
    }

    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Self, FatalError> {
        let rules = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p).map_err(|source| FatalError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// The first rule matching `path`, if any.
    pub fn first_match(&self, path: &Path) -> Option<&str> {
        let s = path.to_string_lossy();
        self.rules
            .iter()
            .find(|r| r.is_match(&s))
            .map(Regex::as_str)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.first_match(path).is_some()
    }
}

/// Fixed, ordered scan targets of one root: required ones first, then optional ones.
pub fn scan_targets(root: &Path) -> Vec<ScanTarget> {
    let required = REQUIRED_SCAN_PATHS.iter().map(|p| (p, true));
    let optional = OPTIONAL_SCAN_PATHS.iter().map(|p| (p, false));
    required
        .chain(optional)
        .map(|(p, required)| ScanTarget {
            path: root.join(p),
            required,
        })
        .collect()
}

/// Drop targets that repeat, or sit inside, another target so no file is walked twice.
/// Paths are compared canonicalized; targets that do not resolve are kept as given.
pub fn dedupe_targets(targets: Vec<ScanTarget>) -> Vec<ScanTarget> {
    let resolved: Vec<Option<PathBuf>> = targets
        .iter()
        .map(|t| std::fs::canonicalize(&t.path).ok())
        .collect();
    let covered = |i: usize, own: &Path| {
        resolved.iter().enumerate().any(|(j, other)| {
            j != i
                && other
                    .as_deref()
                    .is_some_and(|o| (o == own && j < i) || (o != own && own.starts_with(o)))
        })
    };
    targets
        .into_iter()
        .enumerate()
        .filter(|(i, target)| match resolved[*i].as_deref() {
            Some(own) if covered(*i, own) => {
                debug!("scan target {} overlaps another target, skipping", target.path.display());
                false
            }
            _ => true,
        })
        .map(|(_, target)| target)
        .collect()
}

/// Fail before any work starts if a required target of any root is missing.
pub fn check_scan_targets(targets: &[ScanTarget]) -> Result<(), FatalError> {
    match targets.iter().find(|t| t.required && !t.path.is_dir()) {
        Some(t) => Err(FatalError::MissingScanTarget(t.path.clone())),
        None => Ok(()),
    }
}

/// Turns one file into work items.
pub struct Discovery {
    classifier: Arc<dyn Classify>,
    arch_filter: Option<String>,
}

impl Discovery {
    pub fn new(classifier: Arc<dyn Classify>, arch_filter: Option<String>) -> Self {
        Self {
            classifier,
            arch_filter,
        }
    }

    /// Work items for `path`: one per dumpable slice with a known tag that passes the arch filter.
    /// Files that are not images, or cannot be read, yield nothing.
    pub fn items_for(&self, path: &Path) -> Vec<WorkItem> {
        let slices = match self.classifier.classify(path) {
            Ok(Classification::Image { slices, .. }) => slices,
            Ok(Classification::NotAnImage) => return Vec::new(),
            Err(e) => {
                debug!("classify {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        let mut items: Vec<WorkItem> = Vec::new();
        for slice in slices {
            if !slice.kind.is_dumpable() {
                continue;
            }
            let Some(tag) = arch_tag(slice.cpu_type, slice.cpu_subtype) else {
                debug!(
                    "{}: unknown architecture {:#x}/{:#x}",
                    path.display(),
                    slice.cpu_type,
                    slice.cpu_subtype
                );
                continue;
            };
            if self.arch_filter.as_deref().is_some_and(|f| f != tag) {
                continue;
            }
            if items.iter().any(|i| i.arch == tag) {
                continue;
            }
            items.push(WorkItem {
                path: path.to_path_buf(),
                arch: tag.to_string(),
            });
        }
        items
    }
}

/// Run the whole discovery stage: walk every target (see [`dedupe_targets`] for overlapping ones), classify on a pool, send items on `item_tx`.
/// Returns once the walk is done and the pool has drained; `item_tx` is dropped with the pool.
/// Walk failures (when `strict`) and pool panics are recorded on `control`.
pub fn run_discovery(
    targets: &[ScanTarget],
    exclusions: &ExclusionRules,
    discovery: Discovery,
    item_tx: Sender<WorkItem>,
    tuning: &PipelineTuning,
    strict: bool,
    control: &Arc<RunControl>,
) -> std::io::Result<()> {
    let worker_control = Arc::clone(control);
    let pool = WorkerPool::start(
        "classify",
        tuning.workers.classify,
        tuning.path_cap,
        move |path: PathBuf| {
            if worker_control.is_stopped() {
                return;
            }
            for item in discovery.items_for(&path) {
                worker_control.stats.record(&worker_control.stats.work_items);
                if item_tx.send(item).is_err() {
                    break;
                }
            }
        },
    )?;

    for target in targets {
        if control.is_stopped() {
            break;
        }
        if !target.path.is_dir() {
            if target.required {
                control.fail(FatalError::MissingScanTarget(target.path.clone()));
                break;
            }
            debug!("optional scan target {} not present, skipping", target.path.display());
            continue;
        }
        info!("Scanning {}", target.path.display());
        for outcome in walk_files(&target.path) {
            if control.is_stopped() {
                break;
            }
            match outcome {
                WalkOutcome::File(path) => {
                    control.stats.record(&control.stats.files_walked);
                    if let Some(rule) = exclusions.first_match(&path) {
                        debug!("excluded {} ({})", path.display(), rule);
                        control.stats.record(&control.stats.excluded);
                        continue;
                    }
                    if !pool.submit(path) {
                        break;
                    }
                }
                WalkOutcome::Skip => {}
                WalkOutcome::Err { msg, path } => {
                    if strict {
                        control.fail(FatalError::Walk(msg));
                        break;
                    }
                    let path = path.unwrap_or_else(|| target.path.clone());
                    control.record_skipped(path, msg);
                }
            }
        }
    }

    if let Err(e) = pool.await_drain() {
        control.fail(e);
    }
    Ok(())
}
