//! Command-line surface: argument parsing, option building, progress display

pub mod arg_parser;
pub mod cli;
pub mod progress;

pub use arg_parser::Cli;
pub use cli::{build_opts, handle_run};
