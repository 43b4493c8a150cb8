//! Artifact naming: short, readable, collision-safe file names for dumped symbols.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::FatalError;
use crate::utils::config::{ARTIFACT_EXT, MAX_NAME_RETRIES};

/// First character of every directory component, then the full file name.
///
/// `/System/Library/Frameworks/AppKit` → `SLFAppKit`. Root and empty components are skipped.
pub fn mangle(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();
    let Some((last, dirs)) = parts.split_last() else {
        return String::new();
    };
    let mut out: String = dirs.iter().filter_map(|d| d.chars().next()).collect();
    out.push_str(last);
    out
}

/// Candidate file name for `attempt` (0 = unsuffixed).
pub fn artifact_name(mangled: &str, arch: &str, attempt: usize) -> String {
    match attempt {
        0 => format!("{mangled}_{arch}.{ARTIFACT_EXT}"),
        n => format!("{mangled}_{arch}_{n}.{ARTIFACT_EXT}"),
    }
}

/// Exclusively create the artifact for (`image`, `arch`) in `dir`.
///
/// Tries `{mangled}_{arch}.sym`, then `_1` … `_10`. Only "already exists" moves on to the
/// next name; any other I/O error, or running out of names, is fatal.
pub fn create_artifact(dir: &Path, image: &Path, arch: &str) -> Result<(File, PathBuf), FatalError> {
    let mangled = mangle(image);
    for attempt in 0..=MAX_NAME_RETRIES {
        let path = dir.join(artifact_name(&mangled, arch, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(FatalError::ArtifactCreate { path, source }),
        }
    }
    Err(FatalError::NamingExhausted {
        path: image.to_path_buf(),
        arch: arch.to_string(),
        attempts: MAX_NAME_RETRIES + 1,
    })
}
