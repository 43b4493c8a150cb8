pub mod config;
pub mod credential;
pub mod fd_limit;
pub mod logger;
pub mod symsweep_toml;
pub mod tempfiles;

pub use config::*;
pub use credential::resolve_credential;
pub use fd_limit::{FDS_PER_WORKER, cap_workers_by_fd_limit, max_open_fds};
pub use logger::setup_logging;
pub use symsweep_toml::{SymsweepToml, load_symsweep_toml};
pub use tempfiles::{DumpDir, prepare_dump_dir, scratch_dir};
