use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Directory name that is never pruned nor descended into.
pub const RESERVED_DIR: &str = ".old";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.removed_files.is_empty() && self.removed_dirs.is_empty()
    }
}

/// Removes everything under `root` that the last reconciliation did not
/// vouch for. `protected_files` are left in place without being expected.
/// With `dry_run` set, stale entries are only reported.
pub fn prune(
    root: &Path,
    expected_files: &HashSet<PathBuf>,
    protected_files: &HashSet<PathBuf>,
    expected_dirs: &HashSet<PathBuf>,
    dry_run: bool,
) -> io::Result<PruneReport> {
    let mut report = PruneReport::default();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_reserved(entry));

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if vanished(&err) => continue,
            Err(err) => return Err(err.into()),
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            if expected_dirs.contains(path) {
                continue;
            }
            info!("{} folder no longer in catalog, deleting", path.display());
            if !dry_run {
                ignore_vanished(fs::remove_dir_all(path))?;
            }
            walker.skip_current_dir();
            report.removed_dirs.push(path.to_path_buf());
        } else if protected_files.contains(path) {
            debug!("keeping {}: remote copy unavailable", path.display());
        } else if !expected_files.contains(path) {
            info!("{} file no longer in catalog, deleting", path.display());
            if !dry_run {
                ignore_vanished(fs::remove_file(path))?;
            }
            report.removed_files.push(path.to_path_buf());
        }
    }
    Ok(report)
}

fn is_reserved(entry: &DirEntry) -> bool {
    let reserved = entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name() == RESERVED_DIR;
    if reserved {
        debug!("leaving reserved {}", entry.path().display());
    }
    reserved
}

/// An entry removed between listing and visiting it.
fn vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|err| err.kind() == io::ErrorKind::NotFound)
}

fn ignore_vanished(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
