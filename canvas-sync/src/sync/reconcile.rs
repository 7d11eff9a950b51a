use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use super::paths::{Resolution, resolve_file_path};
use super::transfer::{
    ContentSource, TransferClient, TransferError, files_identical, modified_time, persist,
    set_modified,
};
use crate::config::StampFormat;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unknown folder id {0}")]
    UnknownFolder(u64),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("time format error: {0}")]
    Format(#[from] time::error::Format),
}

/// A file as the reconciler sees it, regardless of whether it came from the
/// file listing or was synthesized from a module item.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub folder_id: u64,
    pub display_name: String,
    pub source: ContentSource,
    pub modified_at: OffsetDateTime,
}

impl RemoteFile {
    pub fn from_api(file: &canvas_core::File) -> Result<Self, time::error::Parse> {
        Ok(Self {
            folder_id: file.folder_id,
            display_name: file.display_name.clone(),
            source: ContentSource::parse(&file.url),
            modified_at: parse_modified(&file.modified_at)?,
        })
    }
}

pub fn parse_modified(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(value, &Rfc3339)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Fetched into a previously unused path.
    Created(PathBuf),
    /// Fetched under a renamed path because a differently-cased file exists.
    CaseRenamed(PathBuf),
    /// Remote was newer and its bytes differed; local copy replaced.
    Updated(PathBuf),
    /// Local copy already matches the remote.
    Unchanged(PathBuf),
    /// Remote serves no content for the entry. Carries the local copy left in
    /// place under that name, if there is one.
    Unavailable(Option<PathBuf>),
    /// The entry could not be brought up to date this run.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub downloaded: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl ReconcileStats {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Created(_) | FileOutcome::CaseRenamed(_) => self.downloaded += 1,
            FileOutcome::Updated(_) => self.updated += 1,
            FileOutcome::Unchanged(_) => self.skipped += 1,
            FileOutcome::Unavailable(_) | FileOutcome::Failed => self.errors += 1,
        }
    }
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} skipped, {} errors",
            self.downloaded, self.updated, self.skipped, self.errors
        )
    }
}

/// Everything the pruner needs once all entries have been reconciled.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub stats: ReconcileStats,
    pub expected_files: HashSet<PathBuf>,
    /// Local copies of entries that are currently unavailable remotely.
    pub protected_files: HashSet<PathBuf>,
    pub expected_dirs: HashSet<PathBuf>,
}

/// Per-course reconciliation context: folder map, expected paths and counters.
pub struct Reconciler {
    transfer: TransferClient,
    stamp: StampFormat,
    folders: HashMap<u64, PathBuf>,
    expected: HashSet<PathBuf>,
    protected: HashSet<PathBuf>,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new(transfer: TransferClient, stamp: StampFormat) -> Self {
        Self {
            transfer,
            stamp,
            folders: HashMap::new(),
            expected: HashSet::new(),
            protected: HashSet::new(),
            stats: ReconcileStats::default(),
        }
    }

    /// Records where folder `id` lives and makes sure the directory exists.
    pub async fn add_folder(&mut self, id: u64, dir: PathBuf) -> io::Result<()> {
        if !tokio::fs::try_exists(&dir).await? {
            info!("creating {}", dir.display());
        }
        tokio::fs::create_dir_all(&dir).await?;
        self.folders.insert(id, dir);
        Ok(())
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Counts an entry that failed before it could be reconciled, e.g. one
    /// with an unparseable timestamp.
    pub fn record_failure(&mut self) {
        self.stats.record(&FileOutcome::Failed);
    }

    pub async fn reconcile(&mut self, file: &RemoteFile) -> FileOutcome {
        let outcome = match self.reconcile_inner(file).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("failed to sync {}: {err}", file.display_name);
                FileOutcome::Failed
            }
        };
        self.stats.record(&outcome);
        match &outcome {
            FileOutcome::Created(path)
            | FileOutcome::CaseRenamed(path)
            | FileOutcome::Updated(path)
            | FileOutcome::Unchanged(path) => {
                self.expected.insert(path.clone());
            }
            FileOutcome::Unavailable(Some(path)) => {
                self.protected.insert(path.clone());
            }
            FileOutcome::Unavailable(None) | FileOutcome::Failed => {}
        }
        outcome
    }

    pub fn finish(self) -> ReconcileResult {
        ReconcileResult {
            stats: self.stats,
            expected_files: self.expected,
            protected_files: self.protected,
            expected_dirs: self.folders.into_values().collect(),
        }
    }

    async fn reconcile_inner(&self, file: &RemoteFile) -> Result<FileOutcome, ReconcileError> {
        let dir = self
            .folders
            .get(&file.folder_id)
            .ok_or(ReconcileError::UnknownFolder(file.folder_id))?;

        let suffix = format!(" c{}", self.stamp.stamp(file.modified_at)?);
        let resolution = resolve_file_path(dir, &file.display_name, &suffix).await?;

        if file.source == ContentSource::Unavailable {
            warn!("{} ignored: no content available", file.display_name);
            let resident = match resolution {
                Resolution::Existing(path) => Some(path),
                Resolution::New(_) | Resolution::CaseCollision(_) => None,
            };
            return Ok(FileOutcome::Unavailable(resident));
        }

        match resolution {
            Resolution::CaseCollision(path) => {
                info!("downloading new case {}", path.display());
                self.transfer
                    .materialize(&file.source, &path, file.modified_at)
                    .await?;
                Ok(FileOutcome::CaseRenamed(path))
            }
            Resolution::New(path) => {
                info!("downloading new {}", path.display());
                self.transfer
                    .materialize(&file.source, &path, file.modified_at)
                    .await?;
                Ok(FileOutcome::Created(path))
            }
            Resolution::Existing(path) => {
                if modified_time(&path).await? >= SystemTime::from(file.modified_at) {
                    debug!("skipped {}: latest version already present", path.display());
                    return Ok(FileOutcome::Unchanged(path));
                }
                self.refresh(file, dir, path).await
            }
        }
    }

    /// Re-fetches an existing file whose remote timestamp is newer and keeps
    /// the new bytes only if they differ.
    async fn refresh(
        &self,
        file: &RemoteFile,
        dir: &Path,
        path: PathBuf,
    ) -> Result<FileOutcome, ReconcileError> {
        let scratch = self
            .transfer
            .fetch_scratch(&file.source, dir, file.modified_at)
            .await?;
        if files_identical(&path, scratch.path()).await? {
            drop(scratch);
            set_modified(&path, file.modified_at).await?;
            debug!("skipped {}: remote touched, content unchanged", path.display());
            return Ok(FileOutcome::Unchanged(path));
        }
        persist(scratch, &path)?;
        info!("updated {}", path.display());
        Ok(FileOutcome::Updated(path))
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
