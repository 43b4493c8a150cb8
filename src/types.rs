//! Public and internal types for the symsweep pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::config::{RetryConsts, StageWorkers};

/// One (image, architecture) pair handed from discovery to extraction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub path: PathBuf,
    pub arch: String,
}

/// A directory under a root that gets scanned recursively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanTarget {
    pub path: PathBuf,
    /// Missing required targets abort the run; missing optional ones are skipped.
    pub required: bool,
}

/// Where the roots to scan come from. Exactly one per run (except upload-only).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootSource {
    /// A directory that already is a system root (e.g. `/`).
    Dir(PathBuf),
    /// An installer package; its dyld shared caches are extracted and unpacked.
    Installer(PathBuf),
    /// A firmware archive; the shared caches of its system image are extracted and unpacked.
    Ipsw(PathBuf),
}

impl RootSource {
    /// Pick the single root source out of the three mutually exclusive options.
    pub fn from_options(
        root: Option<&Path>,
        installer: Option<&Path>,
        ipsw: Option<&Path>,
    ) -> Result<Self, crate::error::FatalError> {
        let given: Vec<(&str, &Path)> = [("--root", root), ("--installer", installer), ("--ipsw", ipsw)]
            .into_iter()
            .filter_map(|(flag, p)| p.map(|p| (flag, p)))
            .collect();
        match given.as_slice() {
            [] => Err(crate::error::FatalError::MissingSource),
            [("--root", p)] => Ok(RootSource::Dir(p.to_path_buf())),
            [("--installer", p)] => Ok(RootSource::Installer(p.to_path_buf())),
            [(_, p)] => Ok(RootSource::Ipsw(p.to_path_buf())),
            many => Err(crate::error::FatalError::ConflictingSources(
                many.iter().map(|(f, _)| *f).collect::<Vec<_>>().join(" and "),
            )),
        }
    }
}

/// Which stages run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Discover, dump and upload.
    Full(RootSource),
    /// Discover and dump; nothing is uploaded.
    DumpOnly(RootSource),
    /// Upload every file directly inside an existing directory.
    UploadOnly(PathBuf),
}

/// API key for the authenticated upload protocol. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Credential(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Exit status and captured output of an external tool run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the tool was killed by a signal.
    pub code: Option<i32>,
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Mach-O file type of one architecture slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Executable,
    Dylib,
    Dylinker,
    Bundle,
    Other(u32),
}

impl ImageKind {
    pub fn from_filetype(filetype: u32) -> Self {
        match filetype {
            0x2 => ImageKind::Executable,
            0x6 => ImageKind::Dylib,
            0x7 => ImageKind::Dylinker,
            0x8 => ImageKind::Bundle,
            other => ImageKind::Other(other),
        }
    }

    /// Only shared libraries, bundles and the dynamic linker get their symbols dumped.
    pub fn is_dumpable(self) -> bool {
        matches!(self, ImageKind::Dylib | ImageKind::Dylinker | ImageKind::Bundle)
    }
}

/// One architecture slice of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slice {
    pub kind: ImageKind,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
}

/// Result of classifying one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    NotAnImage,
    Image { fat: bool, slices: Vec<Slice> },
}

/// Full run options. Built once at startup and passed down; never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Opts {
    pub mode: RunMode,
    /// Where artifacts go. When None a scratch directory is used and removed at exit.
    pub dump_to: Option<PathBuf>,
    /// Directory holding `dump_syms`, `symupload` and `dsc_extractor`. When None they are looked up on `PATH`.
    pub tools_dir: Option<PathBuf>,
    /// Only dump this architecture tag.
    pub arch: Option<String>,
    /// Put artifacts into per-architecture subdirectories.
    pub separate_arch: bool,
    /// Switches to the authenticated protocol and endpoint list.
    pub credential: Option<Credential>,
    /// Ordered endpoints, already chosen for the protocol in use.
    pub endpoints: Vec<String>,
    /// Extra exclude regexes, appended after the built-in ones.
    pub exclude: Vec<String>,
    /// Fail on the first walk error. When false, unreadable paths are skipped and listed.
    pub strict: bool,
    pub verbose: bool,
    /// Show dump/upload counters.
    pub progress: bool,
    pub workers: StageWorkers,
    pub retry: RetryPolicy,
}

/// How many times to try one endpoint and how long to wait between tries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RetryConsts::MAX_ATTEMPTS,
            delay: RetryConsts::DELAY,
        }
    }
}

impl Opts {
    /// True when artifacts are uploaded (full and upload-only modes).
    pub fn delivers(&self) -> bool {
        !matches!(self.mode, RunMode::DumpOnly(_))
    }
}
