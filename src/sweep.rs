//! Top-level run: stage roots and the dump destination, run the pipeline, report.

use anyhow::Result;
use log::debug;
use std::sync::Arc;

use crate::engine::progress::create_stage_counters;
use crate::error::FatalError;
use crate::pipeline::context::RunControl;
use crate::pipeline::orchestrator::{Stages, run_pipeline, run_upload_only};
use crate::pipeline::report::{RunStats, report_run};
use crate::roots::stage_roots;
use crate::utils::{prepare_dump_dir, scratch_dir};
use crate::{Opts, RunMode};

/// Run control for `opts`, with progress counters when requested.
pub fn new_control(opts: &Opts) -> Arc<RunControl> {
    let dumping = !matches!(opts.mode, RunMode::UploadOnly(_));
    let (dump_bar, upload_bar) = create_stage_counters(opts.progress, dumping, opts.delivers());
    RunControl::with_stats(RunStats::with_progress(dump_bar, upload_bar))
}

/// Run the mode in `opts` with the given stage capabilities.
///
/// Scratch directories and disk-image mounts are owned by this call and released
/// before it returns, on success and on error alike.
pub fn sweep(opts: &Opts, stages: &Stages, control: &Arc<RunControl>) -> Result<()> {
    if matches!(opts.mode, RunMode::DumpOnly(_)) && opts.dump_to.is_none() {
        return Err(FatalError::DumpOnlyWithoutDestination.into());
    }
    let result = match &opts.mode {
        RunMode::UploadOnly(dir) => run_upload_only(dir, opts, stages, control),
        RunMode::Full(source) | RunMode::DumpOnly(source) => {
            let dump_dir = prepare_dump_dir(opts.dump_to.as_deref())?;
            let staging = scratch_dir("staging")?;
            let roots = stage_roots(source, staging.path(), opts.tools_dir.as_deref())?;
            let result = run_pipeline(&roots, dump_dir.path(), opts, stages, control);
            debug!("releasing staging area {}", staging.path().display());
            result
        }
    };
    report_run(control, opts.verbose);
    result
}
