use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Dump and upload symbols for the system libraries of an OS image.
#[derive(Clone, Debug, Parser)]
#[command(name = "symsweep")]
#[command(about = "Find system libraries under an OS root, dump their symbols and upload them.")]
#[command(group(ArgGroup::new("source").args(["root", "installer", "ipsw"]).multiple(false)))]
pub struct Cli {
    /// Directory that is an OS root (e.g. `/`).
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Installer package to expand and scan.
    #[arg(long, value_name = "PKG")]
    pub installer: Option<PathBuf>,

    /// Firmware archive whose disk images are mounted and scanned.
    #[arg(long, value_name = "FILE")]
    pub ipsw: Option<PathBuf>,

    /// Where to write dumped symbols. Default: a scratch directory removed at exit.
    #[arg(long, short = 'd', value_name = "DIR")]
    pub dump_to: Option<PathBuf>,

    /// Only dump; do not upload. Needs --dump-to.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub dump_only: Option<bool>,

    /// Upload every file directly in DIR (subdirectories are ignored); no scanning or dumping.
    #[arg(long, value_name = "DIR", conflicts_with_all = ["source", "dump_only"])]
    pub upload_from: Option<PathBuf>,

    /// Only dump this architecture (e.g. x86_64, arm64e).
    #[arg(long, short = 'a')]
    pub arch: Option<String>,

    /// Write symbols into one subdirectory per architecture.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub separate_arch: Option<bool>,

    /// API key for authenticated uploads (or SYMSWEEP_API_KEY / .env).
    #[arg(long, short = 'k', value_name = "KEY")]
    pub api_key: Option<String>,

    /// Directory containing dump_syms, symupload and dsc_extractor. Default: look them up on PATH.
    #[arg(long, short = 't', value_name = "DIR")]
    pub tools: Option<PathBuf>,

    /// Upload endpoint; repeat to upload to several, in order. Replaces the built-in list.
    #[arg(long, value_name = "URL")]
    pub endpoint: Vec<String>,

    /// Extra exclude regexes, matched against full paths. Can specify multiple: -e re1 re2
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Fail on the first unreadable directory (default). `--strict false` skips and reports them instead.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Show dump/upload counters.
    #[arg(long, short = 'p', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Config file. Default: `.symsweep.toml` in the current directory, if present.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}
