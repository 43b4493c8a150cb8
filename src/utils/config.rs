//! Application configuration constants.
//! Tuning, defaults and thresholds in one place.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    config_filename: String,
    scratch_prefix: String,
    api_key_env: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                config_filename: format!(".{pkg}.toml"),
                scratch_prefix: format!("{pkg}-"),
                api_key_env: format!("{}_API_KEY", pkg.to_uppercase()),
            }
        })
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Prefix for scratch dump and staging directories.
    pub fn scratch_prefix(&self) -> &str {
        &self.scratch_prefix
    }

    /// Environment variable holding the upload API key.
    pub fn api_key_env(&self) -> &str {
        &self.api_key_env
    }
}

// ---- External tools ----

pub struct ToolNames;

impl ToolNames {
    pub const DUMPER: &'static str = "dump_syms";
    pub const UPLOADER: &'static str = "symupload";
    /// Protocol flag value passed to the uploader when a credential is present.
    pub const AUTH_PROTOCOL: &'static str = "sym-upload-v2";
    /// Uploader exit status meaning "already on the server" (authenticated protocol only).
    pub const ALREADY_EXISTS_STATUS: i32 = 2;
    /// Unpacks a dyld shared cache into a directory tree of images.
    pub const CACHE_EXTRACTOR: &'static str = "dsc_extractor";
    pub const PLIST_BUDDY: &'static str = "/usr/libexec/PlistBuddy";

    /// `name` inside the tools directory, or the bare name for a PATH lookup.
    pub fn resolve(tools_dir: Option<&Path>, name: &str) -> PathBuf {
        match tools_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

/// Extension of every dumped artifact.
pub const ARTIFACT_EXT: &str = "sym";

/// Highest numeric suffix tried when artifact names collide; the unsuffixed
/// name plus `_1..=_10` gives eleven candidates.
pub const MAX_NAME_RETRIES: usize = 10;

// ---- Worker threads ----

/// Worker counts per stage. Classification and dumping block on disk and child
/// processes; uploading is network bound and kept small so collectors are not flooded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageWorkers {
    pub classify: usize,
    pub dump: usize,
    pub upload: usize,
}

impl Default for StageWorkers {
    fn default() -> Self {
        Self {
            classify: Self::CLASSIFY_THREADS,
            dump: Self::DUMP_THREADS,
            upload: Self::UPLOAD_THREADS,
        }
    }
}

impl StageWorkers {
    pub const CLASSIFY_THREADS: usize = 12;
    pub const DUMP_THREADS: usize = 12;
    pub const UPLOAD_THREADS: usize = 5;
    pub const FLOOR_THREADS: usize = 2;

    /// Defaults with the dump pool capped to twice the available cores (from rayon);
    /// each dump worker drives one CPU-heavy child process.
    pub fn current() -> Self {
        let cores = rayon::current_num_threads();
        Self {
            dump: Self::DUMP_THREADS.min((cores * 2).max(Self::FLOOR_THREADS)),
            ..Self::default()
        }
    }
}

// ---- Channels ----

/// Bounded queue capacities between stages. Small enough that a slow stage
/// pushes back on the one before it.
pub struct ChannelCaps;

impl ChannelCaps {
    /// Walked paths waiting for classification.
    pub const PATHS: usize = 4_096;
    /// Work items waiting for the dumper.
    pub const WORK_ITEMS: usize = 1_024;
    /// Artifacts waiting for upload.
    pub const ARTIFACTS: usize = 256;
}

// ---- Delivery ----

pub struct RetryConsts;

impl RetryConsts {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const DELAY: Duration = Duration::from_secs(1);
}

/// Endpoints for the legacy, unauthenticated protocol, tried in this order.
pub const LEGACY_ENDPOINTS: &[&str] = &[
    "https://clients2.google.com/cr/symbol",
    "https://clients2.google.com/cr/staging_symbol",
];

/// Endpoints for the authenticated protocol, tried in this order.
pub const AUTH_ENDPOINTS: &[&str] = &[
    "https://staging-crashsymbolcollector-pa.googleapis.com",
    "https://prod-crashsymbolcollector-pa.googleapis.com",
];

// ---- Discovery ----

/// Built-in exclude regexes, matched against the full path in this order.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    r"/System/Library/Frameworks/Python\.framework/",
    r"/System/Library/Frameworks/Ruby\.framework/",
    r"_profile\.dylib$",
    r"_debug\.dylib$",
    r"\.a$",
    r"\.dat$",
];

/// Subpaths of every root that must exist.
pub const REQUIRED_SCAN_PATHS: &[&str] = &[
    "System/Library/Frameworks",
    "System/Library/PrivateFrameworks",
    "usr/lib",
];

/// Subpaths that only some OS versions have.
pub const OPTIONAL_SCAN_PATHS: &[&str] = &[
    // Gone in 10.15.
    "Library/QuickTime",
    // Not present in extracted shared caches.
    "System/Library/Components",
];

/// Upper bound on slices in a fat header; anything larger is not a real fat image
/// (Java class files share the magic).
pub const MAX_FAT_SLICES: u32 = 32;

// ---- Root staging ----

/// File name prefix of a dyld shared cache; the remainder names its architecture.
pub const SHARED_CACHE_PREFIX: &str = "dyld_shared_cache_";
/// Where a system volume keeps its shared caches.
pub const SHARED_CACHE_DIR: &str = "System/Library/dyld";

/// Fixed names and keys inside installer packages and IPSW archives.
pub struct ArchiveLayout;

impl ArchiveLayout {
    pub const BUILD_MANIFEST: &'static str = "BuildManifest.plist";
    pub const SYSTEM_DMG_KEY: &'static str =
        ":BuildIdentities:1:Manifest:Cryptex1,SystemOS:Info:Path";
    pub const SHARED_SUPPORT_DMG: &'static str = "SharedSupport.dmg";
    pub const ASSET_DIR: &'static str = "com_apple_MobileAsset_MacSoftwareUpdate";
    pub const OS_VERSION_KEY: &'static str = ":Assets:0:OSVersion";
    pub const PAYLOAD_GLOB: &'static str = "AssetData/payloadv2/payload.0??";
    /// Installers from this macOS major version on keep their caches in cryptexes.
    pub const FIRST_CRYPTEX_MAJOR: u32 = 13;
}
