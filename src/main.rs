//! Symsweep CLI: dump and upload system symbols; --dump-only or --upload-from run one half.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use symsweep::engine::arg_parser::Cli;
use symsweep::engine::handle_run;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
