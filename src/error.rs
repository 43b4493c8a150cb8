//! Error taxonomy: fatal (run-aborting) errors vs. per-item errors that are logged and dropped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Unrecoverable precondition or environment failure. Aborts the whole run.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("root sources are mutually exclusive, got {0}")]
    ConflictingSources(String),

    #[error("no root source given; use --root, --installer or --ipsw (or --upload-from)")]
    MissingSource,

    #[error("dump destination {} exists and is not a directory", .0.display())]
    DestinationNotDir(PathBuf),

    #[error("--dump-only needs --dump-to, otherwise the dumped symbols are deleted at exit")]
    DumpOnlyWithoutDestination,

    #[error("no free artifact name for {} ({arch}) after {attempts} attempts", path.display())]
    NamingExhausted {
        path: PathBuf,
        arch: String,
        attempts: usize,
    },

    #[error("create artifact {}", path.display())]
    ArtifactCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("required scan target {} is missing", .0.display())]
    MissingScanTarget(PathBuf),

    #[error("invalid exclude pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("walk failed: {0}")]
    Walk(String),

    #[error("staging roots: {0}")]
    RootStaging(String),

    #[error("{0} worker panicked")]
    WorkerPanicked(String),
}

/// Why a single dump failed. The item is dropped; the run continues.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("could not run dumper: {0}")]
    Spawn(#[from] io::Error),

    #[error("dumper exited with {}: {stderr}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed { code: Option<i32>, stderr: String },
}
