//! Root staging: turn a [`RootSource`] into directories to scan.
//!
//! A directory is used as is. Installer packages and firmware archives are reduced to
//! their dyld shared caches, collected in `<staging>/caches`; each cache is then unpacked
//! by `dsc_extractor` into `<staging>/extracted/<arch>`, and those directories are the
//! roots. Disk images attached along the way are held by a [`MountGuard`] and detached
//! as soon as the caches are copied out.

use anyhow::{Context, Result, bail};
use glob::{MatchOptions, Pattern};
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use zip::ZipArchive;

use crate::RootSource;
use crate::error::FatalError;
use crate::utils::config::{ArchiveLayout, SHARED_CACHE_DIR, SHARED_CACHE_PREFIX, ToolNames};

/// `*` and `?` never cross a `/` in archive entry names.
const SEPARATOR_AWARE: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// An attached disk image. Detached when dropped.
#[derive(Debug)]
pub struct MountGuard {
    mountpoint: PathBuf,
}

impl MountGuard {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        debug!("detaching {}", self.mountpoint.display());
        if let Err(e) = run_tool(
            "hdiutil",
            [OsStr::new("detach"), OsStr::new("-force"), self.mountpoint.as_os_str()],
        ) {
            warn!("detach {}: {:#}", self.mountpoint.display(), e);
        }
    }
}

/// Run an external tool to completion and return its stdout.
/// A non-zero exit becomes an error carrying stderr.
fn run_tool<P, I, S>(program: P, args: I) -> Result<String>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = Path::new(program.as_ref()).display().to_string();
    let out = Command::new(program.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("run {name}"))?;
    if !out.status.success() {
        bail!(
            "{} exited with {:?}: {}",
            name,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

fn attach(image: &Path, mountpoint: &Path) -> Result<MountGuard> {
    std::fs::create_dir_all(mountpoint)
        .with_context(|| format!("create mountpoint {}", mountpoint.display()))?;
    run_tool(
        "hdiutil",
        [
            OsStr::new("attach"),
            image.as_os_str(),
            OsStr::new("-mountpoint"),
            mountpoint.as_os_str(),
            OsStr::new("-quiet"),
            OsStr::new("-nobrowse"),
            OsStr::new("-readonly"),
        ],
    )?;
    debug!("attached {} at {}", image.display(), mountpoint.display());
    Ok(MountGuard {
        mountpoint: mountpoint.to_path_buf(),
    })
}

/// One value out of a property list, via `PlistBuddy`.
fn plist_value(plist: &Path, key: &str) -> Result<String> {
    let command = format!("print {key}");
    let value = run_tool(
        ToolNames::PLIST_BUDDY,
        [OsStr::new("-c"), OsStr::new(&command), plist.as_os_str()],
    )?;
    Ok(value.trim().to_string())
}

/// Major component of a dotted OS version (`"12.6.1"` → 12).
pub fn os_major_version(version: &str) -> Result<u32> {
    let major = version.trim().split('.').next().unwrap_or_default();
    major
        .parse()
        .with_context(|| format!("unparseable OS version {version:?}"))
}

/// Entry-name filter for `pattern`, with `*` and `?` stopping at `/`.
pub fn entry_glob(pattern: &str) -> Result<impl Fn(&str) -> bool + use<>> {
    let compiled = Pattern::new(pattern).with_context(|| format!("bad entry pattern {pattern}"))?;
    Ok(move |name: &str| compiled.matches_with(name, SEPARATOR_AWARE))
}

/// Last `/`-separated component of an archive entry name.
fn entry_base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Copy every file entry of the zip `archive` accepted by `keep` into `dest`, flattening
/// directories. Returns the written paths in archive order.
pub fn extract_zip_entries(archive: &Path, dest: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let mut zip = ZipArchive::new(file).with_context(|| format!("read zip {}", archive.display()))?;
    let mut written = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() || !keep(entry.name()) {
            continue;
        }
        let base = entry_base_name(entry.name()).to_string();
        if base.is_empty() {
            continue;
        }
        let out_path = dest.join(&base);
        let mut out = File::create(&out_path).with_context(|| format!("create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).with_context(|| format!("extract {base} from {}", archive.display()))?;
        debug!("extracted {} -> {}", base, out_path.display());
        written.push(out_path);
    }
    Ok(written)
}

/// Entries of `dir`, sorted by path.
fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Copy the shared cache files of the system volume at `volume` into `caches`.
/// Returns how many were copied; a volume without a cache directory is an error.
pub fn copy_shared_caches(volume: &Path, caches: &Path) -> Result<usize> {
    let dyld = volume.join(SHARED_CACHE_DIR);
    if !dyld.is_dir() {
        bail!("no {} in {}", SHARED_CACHE_DIR, volume.display());
    }
    let mut copied = 0;
    for src in sorted_entries(&dyld).with_context(|| format!("read {}", dyld.display()))? {
        let Some(name) = src.file_name() else {
            continue;
        };
        if !src.is_file() || !name.to_string_lossy().starts_with(SHARED_CACHE_PREFIX) {
            continue;
        }
        let dst = caches.join(name);
        std::fs::copy(&src, &dst).with_context(|| format!("copy {} to {}", src.display(), dst.display()))?;
        copied += 1;
    }
    debug!("copied {} shared cache files from {}", copied, dyld.display());
    Ok(copied)
}

/// Shared caches in `dir` as (architecture, path), sorted. Sub-caches and maps
/// (`dyld_shared_cache_arm64e.1`, `.map`) carry an extension and are left out.
pub fn shared_caches(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut caches = Vec::new();
    for path in sorted_entries(dir)? {
        if path.extension().is_some() {
            continue;
        }
        let arch = path
            .file_name()
            .and_then(OsStr::to_str)
            .and_then(|n| n.strip_prefix(SHARED_CACHE_PREFIX))
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        if let Some(arch) = arch {
            caches.push((arch, path));
        }
    }
    Ok(caches)
}

/// Unpack every shared cache in `caches` into `extracted/<arch>` with `dsc_extractor`
/// from `tools_dir` (or `PATH`). Returns the extracted directories in cache order.
pub fn extract_systems(caches: &Path, extracted: &Path, tools_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let extractor = ToolNames::resolve(tools_dir, ToolNames::CACHE_EXTRACTOR);
    let found = shared_caches(caches).with_context(|| format!("read {}", caches.display()))?;
    let mut roots = Vec::with_capacity(found.len());
    for (arch, cache) in found {
        let dest = extracted.join(&arch);
        info!("Extracting {} shared cache to {}", arch, dest.display());
        run_tool(&extractor, [cache.as_os_str(), dest.as_os_str()])
            .map_err(|e| FatalError::RootStaging(format!("extract {}: {:#}", cache.display(), e)))?;
        roots.push(dest);
    }
    Ok(roots)
}

/// Firmware archive: the system disk image named in the build manifest is pulled out,
/// attached, and its shared caches copied.
fn collect_ipsw_caches(ipsw: &Path, scratch: &Path, caches: &Path) -> Result<()> {
    let manifest = extract_zip_entries(ipsw, scratch, |name| name == ArchiveLayout::BUILD_MANIFEST)?
        .into_iter()
        .next()
        .with_context(|| format!("no {} in {}", ArchiveLayout::BUILD_MANIFEST, ipsw.display()))?;
    let system_dmg = plist_value(&manifest, ArchiveLayout::SYSTEM_DMG_KEY)?;
    info!("Extracting {} from {}", system_dmg, ipsw.display());
    let dmg = extract_zip_entries(ipsw, scratch, |name| entry_base_name(name) == system_dmg)?
        .into_iter()
        .next()
        .with_context(|| format!("{} not present in {}", system_dmg, ipsw.display()))?;
    let mount = attach(&dmg, &scratch.join("Root"))?;
    copy_shared_caches(mount.mountpoint(), caches)?;
    Ok(())
}

/// `yaa list` mentions a shared cache. Listing failures count as "no".
fn payload_has_shared_cache(payload: &Path) -> bool {
    match run_tool("yaa", [OsStr::new("list"), OsStr::new("-i"), payload.as_os_str()]) {
        Ok(listing) => listing.contains("/dyld_shared_cache"),
        Err(e) => {
            debug!("list {}: {:#}", payload.display(), e);
            false
        }
    }
}

/// Installer package: expand it, attach its SharedSupport image, pull the system payloads
/// out of the update asset zips and unpack the ones that carry shared caches.
fn collect_installer_caches(pkg: &Path, scratch: &Path, caches: &Path) -> Result<()> {
    let expanded = scratch.join("installer");
    info!("Expanding {}", pkg.display());
    run_tool(
        "pkgutil",
        [OsStr::new("--expand-full"), pkg.as_os_str(), expanded.as_os_str()],
    )?;
    let shared_support = expanded.join(ArchiveLayout::SHARED_SUPPORT_DMG);
    if !shared_support.is_file() {
        bail!("no {} in expanded {}", ArchiveLayout::SHARED_SUPPORT_DMG, pkg.display());
    }
    let mount = attach(&shared_support, &scratch.join("shared_support"))?;
    let assets = mount.mountpoint().join(ArchiveLayout::ASSET_DIR);
    if !assets.is_dir() {
        bail!("no {} in {}", ArchiveLayout::ASSET_DIR, shared_support.display());
    }

    let asset_plist = assets.join(format!("{}.xml", ArchiveLayout::ASSET_DIR));
    let version = plist_value(&asset_plist, ArchiveLayout::OS_VERSION_KEY)?;
    if os_major_version(&version)? >= ArchiveLayout::FIRST_CRYPTEX_MAJOR {
        bail!("macOS {version} installers keep their shared caches in cryptexes, which cannot be unpacked; stage from an IPSW instead");
    }

    let container = scratch.join("container");
    std::fs::create_dir_all(&container).with_context(|| format!("create {}", container.display()))?;
    let is_payload = entry_glob(ArchiveLayout::PAYLOAD_GLOB)?;
    let zips = sorted_entries(&assets)?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|x| x == "zip"));
    for asset_zip in zips {
        info!("Unarchiving {}", asset_zip.display());
        extract_zip_entries(&asset_zip, &container, &is_payload)?;
    }

    let unpacked = scratch.join("payload");
    std::fs::create_dir_all(&unpacked).with_context(|| format!("create {}", unpacked.display()))?;
    for payload in sorted_entries(&container)? {
        if !payload_has_shared_cache(&payload) {
            continue;
        }
        info!("Unpacking {}", payload.display());
        run_tool(
            "yaa",
            [
                OsStr::new("extract"),
                OsStr::new("-i"),
                payload.as_os_str(),
                OsStr::new("-d"),
                unpacked.as_os_str(),
            ],
        )?;
    }
    drop(mount);
    copy_shared_caches(&unpacked, caches)?;
    Ok(())
}

type CollectCaches = fn(&Path, &Path, &Path) -> Result<()>;

fn stage_archive(archive: &Path, staging: &Path, tools_dir: Option<&Path>, collect: CollectCaches) -> Result<Vec<PathBuf>> {
    let scratch = staging.join("archive");
    let caches = staging.join("caches");
    for dir in [&scratch, &caches] {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    collect(archive, &scratch, &caches)
        .map_err(|e| FatalError::RootStaging(format!("{}: {:#}", archive.display(), e)))?;
    extract_systems(&caches, &staging.join("extracted"), tools_dir)
}

/// Produce the roots for `source`, using `staging` for everything unpacked on the way.
/// No roots at all is fatal.
pub fn stage_roots(source: &RootSource, staging: &Path, tools_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let roots = match source {
        RootSource::Dir(dir) => {
            if !dir.is_dir() {
                return Err(FatalError::RootStaging(format!("{} is not a directory", dir.display())).into());
            }
            vec![dir.clone()]
        }
        RootSource::Installer(pkg) => stage_archive(pkg, staging, tools_dir, collect_installer_caches)?,
        RootSource::Ipsw(ipsw) => stage_archive(ipsw, staging, tools_dir, collect_ipsw_caches)?,
    };
    if roots.is_empty() {
        return Err(FatalError::RootStaging(format!("{:?} produced no roots to scan", source)).into());
    }
    for root in &roots {
        info!("Root: {}", root.display());
    }
    Ok(roots)
}
