use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Opts, WorkItem};
use crate::pipeline::classify::{Classify, MachOClassifier};
use crate::pipeline::context::{PipelineTuning, RunControl};
use crate::pipeline::delivery::{Delivery, ExternalUploader, Upload};
use crate::pipeline::discovery::{
    Discovery, ExclusionRules, check_scan_targets, dedupe_targets, run_discovery, scan_targets,
};
use crate::pipeline::extraction::{Dump, Extraction, ExternalDumper};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::walk::{WalkOutcome, walk_top_level};

/// The three external capabilities the pipeline calls into. Swappable for tests.
#[derive(Clone)]
pub struct Stages {
    pub classifier: Arc<dyn Classify>,
    pub dumper: Arc<dyn Dump>,
    pub uploader: Arc<dyn Upload>,
}

impl Stages {
    /// Mach-O header classifier plus `dump_syms` / `symupload` from `tools_dir` (or `PATH`).
    pub fn external(tools_dir: Option<&Path>) -> Self {
        Self {
            classifier: Arc::new(MachOClassifier),
            dumper: Arc::new(ExternalDumper::new(tools_dir)),
            uploader: Arc::new(ExternalUploader::new(tools_dir)),
        }
    }
}

fn start_upload_pool(
    opts: &Opts,
    stages: &Stages,
    tuning: &PipelineTuning,
    control: &Arc<RunControl>,
) -> Result<WorkerPool<PathBuf>> {
    let delivery = Delivery::new(
        opts.endpoints.clone(),
        opts.credential.clone(),
        Arc::clone(&stages.uploader),
        opts.retry,
        Arc::clone(control),
    );
    debug!("Uploading to {} endpoints: {:?}", opts.endpoints.len(), opts.endpoints);
    WorkerPool::start("upload", tuning.workers.upload, tuning.artifact_cap, move |artifact: PathBuf| {
        delivery.handle(artifact)
    })
    .context("start upload workers")
}

/// Fatal error recorded by any worker, if any.
fn finish(control: &RunControl) -> Result<()> {
    match control.take_fatal() {
        Some(fatal) => Err(fatal.into()),
        None => Ok(()),
    }
}

/// Discover images under `roots`, dump them into `dest`, and upload them unless in dump-only mode.
///
/// Pools are started back to front (upload, dump) so each stage has somewhere to send to,
/// then drained front to back: the walk ends, classification drains and drops its item
/// sender, dump drains and drops its artifact sender, upload drains.
pub fn run_pipeline(
    roots: &[PathBuf],
    dest: &Path,
    opts: &Opts,
    stages: &Stages,
    control: &Arc<RunControl>,
) -> Result<()> {
    let tuning = PipelineTuning::from_opts(opts);
    let targets: Vec<_> = roots.iter().flat_map(|r| scan_targets(r)).collect();
    check_scan_targets(&targets)?;
    let targets = dedupe_targets(targets);
    let exclusions = ExclusionRules::with_defaults(&opts.exclude)?;

    let upload_pool = match opts.delivers() {
        true => Some(start_upload_pool(opts, stages, &tuning, control)?),
        false => None,
    };
    let artifact_tx = upload_pool.as_ref().and_then(WorkerPool::sender);

    let extraction = Extraction::new(
        dest,
        opts.separate_arch,
        Arc::clone(&stages.dumper),
        Arc::clone(control),
    );
    let dump_pool = WorkerPool::start("dump", tuning.workers.dump, tuning.item_cap, move |item: WorkItem| {
        extraction.handle(item, artifact_tx.as_ref())
    })
    .context("start dump workers")?;
    let item_tx = dump_pool.sender().context("dump queue closed before discovery")?;

    info!("Dumping symbols to {}", dest.display());
    let discovery = Discovery::new(Arc::clone(&stages.classifier), opts.arch.clone());
    run_discovery(&targets, &exclusions, discovery, item_tx, &tuning, opts.strict, control)
        .context("start classify workers")?;

    if let Err(e) = dump_pool.await_drain() {
        control.fail(e);
    }
    if let Some(pool) = upload_pool
        && let Err(e) = pool.await_drain()
    {
        control.fail(e);
    }
    finish(control)
}

/// Upload every regular file directly inside `dir`, with no discovery or extraction in front.
pub fn run_upload_only(dir: &Path, opts: &Opts, stages: &Stages, control: &Arc<RunControl>) -> Result<()> {
    let tuning = PipelineTuning::from_opts(opts);
    let mut pool = start_upload_pool(opts, stages, &tuning, control)?;
    info!("Uploading symbols from {}", dir.display());
    for outcome in walk_top_level(dir) {
        if control.is_stopped() {
            break;
        }
        match outcome {
            WalkOutcome::File(path) => {
                if !pool.submit(path) {
                    break;
                }
            }
            WalkOutcome::Skip => {}
            WalkOutcome::Err { msg, path } => {
                control.record_skipped(path.unwrap_or_else(|| dir.to_path_buf()), msg);
            }
        }
    }
    pool.close_input();
    if let Err(e) = pool.await_drain() {
        control.fail(e);
    }
    finish(control)
}
