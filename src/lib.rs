//! Symsweep: find system libraries under OS image roots, dump per-architecture symbols, upload them

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod roots;
pub mod sweep;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

use log::debug;

/// Result alias used by public symsweep API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point for library use: run `opts` with the external `dump_syms` / `symupload`
/// tools and the built-in Mach-O classifier.
///
/// - Full and dump-only modes stage the roots, dump into `opts.dump_to` (or a scratch
///   directory removed before returning) and, for full mode, upload every artifact.
/// - Upload-only mode uploads every file directly inside its directory.
///
/// Per-file dump and upload failures are logged and counted; only fatal errors are returned.
pub fn run(opts: &Opts) -> Result<()> {
    let stages = pipeline::Stages::external(opts.tools_dir.as_deref());
    run_with(opts, &stages)
}

/// Like [`run`] with caller-supplied classify/dump/upload capabilities.
pub fn run_with(opts: &Opts, stages: &pipeline::Stages) -> Result<()> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
    let control = sweep::new_control(opts);
    sweep::sweep(opts, stages, &control)
}
