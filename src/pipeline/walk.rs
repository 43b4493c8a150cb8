//! Directory walks for discovery (recursive) and upload-only mode (top level): regular files only, symlinks never followed.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One result from a directory walk.
pub enum WalkOutcome {
    /// A regular file.
    File(PathBuf),
    /// A directory (recursed into by the walker) or a symbolic link.
    Skip,
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => {
            let ft = entry.file_type();
            if ft.is_file() && !entry.path_is_symlink() {
                WalkOutcome::File(entry.into_path())
            } else {
                WalkOutcome::Skip
            }
        }
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

/// Recursively walk `dir` in a stable (name-sorted) order.
pub fn walk_files(dir: &Path) -> impl Iterator<Item = WalkOutcome> + use<> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(to_outcome_walkdir)
}

/// Entries directly inside `dir`, name-sorted; subdirectories are not entered.
pub fn walk_top_level(dir: &Path) -> impl Iterator<Item = WalkOutcome> + use<> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(to_outcome_walkdir)
}
