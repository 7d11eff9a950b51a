use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;

use canvas_core::{CanvasClient, CanvasError, ModuleItem, ModuleItemKind};
use futures_util::TryStreamExt;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{CourseConfig, StampFormat};
use crate::sync::mirror::{MirrorDispatcher, MirrorFailure};
use crate::sync::paths::{folder_dir_for, sanitize_name};
use crate::sync::prune::{PruneReport, prune};
use crate::sync::reconcile::{ReconcileStats, Reconciler, RemoteFile, parse_modified};
use crate::sync::transfer::{ContentSource, TransferClient};

#[derive(Debug, Error)]
pub enum CourseError {
    #[error("catalog fetch failed: {0}")]
    Fetch(#[from] CanvasError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("prune task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Report stale local entries instead of deleting them, and ask the mirror
    /// tool for a trial run.
    pub dry_run: bool,
    /// Push the reconciled tree to the configured destinations.
    pub mirror: bool,
}

#[derive(Debug)]
pub struct CourseReport {
    pub name: String,
    pub dir: PathBuf,
    pub stats: ReconcileStats,
    pub pruned: PruneReport,
    pub mirror_failures: Vec<MirrorFailure>,
}

impl CourseReport {
    pub fn summary_line(&self) -> String {
        format!("{}: {}", self.name, self.stats)
    }
}

/// Runs one course from catalog fetch through pruning and mirroring.
pub struct CourseSync {
    client: CanvasClient,
    transfer: TransferClient,
    stamp: StampFormat,
    base_dir: PathBuf,
}

impl CourseSync {
    pub fn new(
        client: CanvasClient,
        transfer: TransferClient,
        stamp: StampFormat,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            transfer,
            stamp,
            base_dir,
        }
    }

    /// Fills in `course.name` when it is missing so the caller can persist it.
    pub async fn run(
        &self,
        course: &mut CourseConfig,
        options: RunOptions,
        mirror: &MirrorDispatcher,
    ) -> Result<CourseReport, CourseError> {
        let remote = self.client.get_course(course.id).await?;
        info!("{}", remote.name);

        let dir_name = course
            .name
            .get_or_insert_with(|| derive_dir_name(&remote.name, course.modules))
            .clone();
        let course_dir = self.base_dir.join(sanitize_name(&dir_name));
        if !tokio::fs::try_exists(&course_dir).await? {
            info!("creating {}", course_dir.display());
            tokio::fs::create_dir_all(&course_dir).await?;
        }

        info!("syncing {}", course_dir.display());
        let mut reconciler = Reconciler::new(self.transfer.clone(), self.stamp.clone());
        if course.modules {
            self.sync_modules(course.id, &course_dir, &mut reconciler)
                .await?;
        } else {
            self.sync_files(course.id, &course_dir, &mut reconciler)
                .await?;
        }
        let result = reconciler.finish();
        let stats = result.stats;

        let root = course_dir.clone();
        let dry_run = options.dry_run;
        let pruned = tokio::task::spawn_blocking(move || {
            prune(
                &root,
                &result.expected_files,
                &result.protected_files,
                &result.expected_dirs,
                dry_run,
            )
        })
        .await??;

        let mirror_failures = if options.mirror {
            mirror.dispatch(&course_dir, &course.rclone).await
        } else {
            Vec::new()
        };

        Ok(CourseReport {
            name: remote.name,
            dir: course_dir,
            stats,
            pruned,
            mirror_failures,
        })
    }

    /// File-tree catalogs: every folder is mapped before the first file.
    async fn sync_files(
        &self,
        course_id: u64,
        course_dir: &Path,
        reconciler: &mut Reconciler,
    ) -> Result<(), CourseError> {
        let mut folders = pin!(self.client.list_folders(course_id)?);
        while let Some(folder) = folders.try_next().await? {
            match folder_dir_for(course_dir, &folder.full_name) {
                Ok(dir) => reconciler.add_folder(folder.id, dir).await?,
                Err(err) => warn!("skipping folder {}: {err}", folder.id),
            }
        }

        let mut files = pin!(self.client.list_files(course_id)?);
        while let Some(file) = files.try_next().await? {
            match RemoteFile::from_api(&file) {
                Ok(remote) => {
                    reconciler.reconcile(&remote).await;
                }
                Err(err) => {
                    warn!("{}: bad modified_at: {err}", file.display_name);
                    reconciler.record_failure();
                }
            }
        }
        Ok(())
    }

    /// Module catalogs: each module's directory is created right before its
    /// items are walked.
    async fn sync_modules(
        &self,
        course_id: u64,
        course_dir: &Path,
        reconciler: &mut Reconciler,
    ) -> Result<(), CourseError> {
        let mut modules = pin!(self.client.list_modules(course_id)?);
        while let Some(module) = modules.try_next().await? {
            let dir = course_dir.join(sanitize_name(&module.name));
            reconciler.add_folder(module.id, dir).await?;

            let mut items = pin!(self.client.list_module_items(course_id, module.id)?);
            while let Some(item) = items.try_next().await? {
                match self.module_item_file(&item, module.id).await? {
                    Some(remote) => {
                        reconciler.reconcile(&remote).await;
                    }
                    None => reconciler.record_failure(),
                }
            }
        }
        Ok(())
    }

    async fn module_item_file(
        &self,
        item: &ModuleItem,
        module_id: u64,
    ) -> Result<Option<RemoteFile>, CourseError> {
        let now = OffsetDateTime::now_utc();
        let (name, source, modified_at) = match item.kind {
            ModuleItemKind::File => {
                let Some(api_url) = item.url.as_deref() else {
                    warn!("{}: file item without url", item.title);
                    return Ok(None);
                };
                let file = self.client.get_file(api_url).await?;
                let modified_at = match parse_modified(&file.modified_at) {
                    Ok(modified_at) => modified_at,
                    Err(err) => {
                        warn!("{}: bad modified_at: {err}", file.display_name);
                        return Ok(None);
                    }
                };
                (file.display_name, ContentSource::parse(&file.url), modified_at)
            }
            ModuleItemKind::SubHeader => (item.title.clone(), ContentSource::Placeholder, now),
            ModuleItemKind::Link => {
                let source = item
                    .link_target()
                    .map(|target| ContentSource::Shortcut(target.to_string()))
                    .unwrap_or(ContentSource::Unavailable);
                (format!("{}.url", item.title), source, now)
            }
        };

        Ok(Some(RemoteFile {
            folder_id: module_id,
            display_name: module_item_name(item.position, item.indent, &name),
            source,
            modified_at,
        }))
    }
}

/// Prefixes a module item so directory listings keep the module's order:
/// position, one `~` per indent level, a space, then the name.
pub fn module_item_name(position: u32, indent: u32, name: &str) -> String {
    format!("{position}{} {name}", "~".repeat(indent as usize))
}

fn derive_dir_name(remote_name: &str, modules: bool) -> String {
    let name = remote_name.replace(':', "-");
    if modules {
        format!("{name} Modules")
    } else {
        name
    }
}

#[cfg(test)]
#[path = "course_tests.rs"]
mod tests;
