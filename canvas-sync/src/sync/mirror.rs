use std::path::Path;

use tokio::process::Command;
use tracing::{error, info};

use crate::config::MirrorDestination;

const DEFAULT_PROGRAM: &str = "rclone";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub destination: String,
    pub message: String,
}

/// Pushes a reconciled course directory to its cloud destinations through an
/// external `sync`-style tool.
#[derive(Debug, Clone)]
pub struct MirrorDispatcher {
    program: String,
    dry_run: bool,
}

impl MirrorDispatcher {
    pub fn new(dry_run: bool) -> Self {
        Self::with_program(DEFAULT_PROGRAM, dry_run)
    }

    pub fn with_program(program: impl Into<String>, dry_run: bool) -> Self {
        Self {
            program: program.into(),
            dry_run,
        }
    }

    /// Runs every destination in turn; a failing destination is reported and
    /// the rest still run.
    pub async fn dispatch(
        &self,
        source: &Path,
        destinations: &[MirrorDestination],
    ) -> Vec<MirrorFailure> {
        let mut failures = Vec::new();
        for destination in destinations {
            let remote = destination.remote_spec();
            info!("uploading to {}", destination.drive);
            if let Err(message) = self.sync_one(source, &remote).await {
                error!("failed to sync {} to {remote}: {message}", source.display());
                failures.push(MirrorFailure {
                    destination: remote,
                    message,
                });
            }
        }
        failures
    }

    async fn sync_one(&self, source: &Path, remote: &str) -> Result<(), String> {
        let mut command = Command::new(&self.program);
        command.arg("sync").arg(source).arg(remote);
        if self.dry_run {
            command.arg("-n");
        }
        let output = command
            .output()
            .await
            .map_err(|err| format!("failed to run {}: {err}", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Err(stderr.trim().to_string());
        }
        if !output.status.success() {
            return Err(format!("{} exited with {}", self.program, output.status));
        }
        Ok(())
    }
}
