use std::path::PathBuf;

use anyhow::Context;
use canvas_core::{ApiErrorClass, CanvasClient};
use canvas_sync::config::{SettingsFile, default_settings_path};
use canvas_sync::course::{CourseError, CourseSync, RunOptions};
use canvas_sync::logging;
use canvas_sync::sync::mirror::MirrorDispatcher;
use canvas_sync::sync::transfer::TransferClient;
use clap::Parser;
use tracing::error;

/// Syncs Canvas course files into local folders, then uploads them to cloud
/// storage using rclone.
#[derive(Debug, Parser)]
#[command(name = "canvas-sync", version)]
struct Cli {
    /// Increase output verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Report deletions instead of performing them and have rclone do a trial run
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Skip the cloud upload step
    #[arg(long)]
    no_mirror: bool,

    /// Settings file (defaults to <config dir>/canvas-sync/settings.yaml)
    #[arg(short, long, env = "CANVAS_SYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let settings_path = match cli.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let mut file = SettingsFile::load(&settings_path)
        .await
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    file.settings.validate()?;

    let stamp = file.settings.stamp_format()?;
    let base_dir = file.base_dir();
    let options = RunOptions {
        dry_run: cli.dry_run,
        mirror: !cli.no_mirror,
    };
    let mirror = MirrorDispatcher::new(cli.dry_run);

    let mut summary = Vec::new();
    let mut failed = 0usize;
    let mut settings_changed = false;
    let mut courses = std::mem::take(&mut file.settings.courses);
    for course in &mut courses {
        let token = file.settings.token_for(course)?.to_string();
        let client = CanvasClient::new(&file.settings.base_url, token.clone())
            .context("invalid base_url")?;
        let sync = CourseSync::new(
            client,
            TransferClient::new(Some(token)),
            stamp.clone(),
            base_dir.clone(),
        );

        let had_name = course.name.is_some();
        let result = sync.run(course, options, &mirror).await;
        settings_changed |= !had_name && course.name.is_some();
        match result {
            Ok(report) => summary.push(report.summary_line()),
            Err(err) => {
                failed += 1;
                log_course_error(course.id, &err);
                summary.push(format!("course {}: failed ({err})", course.id));
            }
        }
    }
    file.settings.courses = courses;

    println!("SUMMARY:");
    for line in &summary {
        println!("  {line}");
    }

    if settings_changed {
        file.save()
            .await
            .with_context(|| format!("failed to update {}", file.path().display()))?;
    }
    if failed > 0 {
        anyhow::bail!("{failed} course(s) failed to sync");
    }
    Ok(())
}

fn log_course_error(course_id: u64, err: &CourseError) {
    match err {
        CourseError::Fetch(fetch)
            if fetch.classification() == Some(ApiErrorClass::Auth) =>
        {
            error!("course {course_id}: access denied, check its access token: {fetch}");
        }
        other => error!("course {course_id}: {other}"),
    }
}
