//! Garbage collection of stale build artifacts in the scratch directory.
//!
//! A sweep never stops on a single bad entry: each failure is logged, counted, and the scan
//! moves on.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use apalis::prelude::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use super::pipeline::TaskPipeline;
use super::registry::{TaskHandler, TaskInvocation};
use super::types::{TaskFailure, TaskKind, TaskState};

const TARGET: &str = "pressroom::tasks::reaper";

/// Extensions produced by the build toolchain.
pub const REAPED_EXTENSIONS: [&str; 5] = ["pdf", "docx", "tex", "aux", "log"];

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub directory: PathBuf,
    pub max_age: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("pressroom"),
            max_age: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl From<&crate::config::ReaperSettings> for ReaperConfig {
    fn from(settings: &crate::config::ReaperSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            max_age: settings.max_age,
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to scan {}: {source}", dir.display())]
    Scan { dir: PathBuf, source: io::Error },
    #[error("failed to inspect {}: {source}", path.display())]
    Inspect { path: PathBuf, source: io::Error },
    #[error("failed to remove {}: {source}", path.display())]
    Remove { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    pub status: String,
    pub cleaned: u64,
    pub errors: u64,
}

fn is_reapable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| REAPED_EXTENSIONS.contains(&ext))
}

/// Delete artifacts last modified before `now - max_age`. A missing directory is an empty
/// sweep; only failing to list the directory is an error.
pub fn reap(config: &ReaperConfig, now: SystemTime) -> Result<ReapReport, CleanupError> {
    let mut report = ReapReport {
        status: TaskState::Success.as_str().to_string(),
        cleaned: 0,
        errors: 0,
    };

    let entries = match std::fs::read_dir(&config.directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(source) => {
            return Err(CleanupError::Scan {
                dir: config.directory.clone(),
                source,
            });
        }
    };
    let Some(cutoff) = now.checked_sub(config.max_age) else {
        return Ok(report);
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(source) => {
                note_failure(
                    &mut report,
                    CleanupError::Scan {
                        dir: config.directory.clone(),
                        source,
                    },
                );
                continue;
            }
        };
        if !is_reapable(&path) {
            continue;
        }

        let modified = match path.symlink_metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(source) => {
                note_failure(&mut report, CleanupError::Inspect { path, source });
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => report.cleaned += 1,
            Err(source) => note_failure(&mut report, CleanupError::Remove { path, source }),
        }
    }

    metrics::counter!("pressroom_reaper_cleaned_total").increment(report.cleaned);
    metrics::counter!("pressroom_reaper_error_total").increment(report.errors);
    info!(
        target = TARGET,
        op = "reap",
        dir = %config.directory.display(),
        cleaned = report.cleaned,
        errors = report.errors,
        "scratch directory swept"
    );
    Ok(report)
}

fn note_failure(report: &mut ReapReport, error: CleanupError) {
    report.errors += 1;
    warn!(target = TARGET, op = "reap", error = %error, "cleanup failure");
}

/// Runs a sweep as a `cleanup` task.
pub struct CleanupHandler {
    config: ReaperConfig,
}

impl CleanupHandler {
    pub fn new(config: ReaperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    async fn handle(&self, _invocation: &TaskInvocation) -> Result<Value, TaskFailure> {
        let config = self.config.clone();
        let report = tokio::task::spawn_blocking(move || reap(&config, SystemTime::now()))
            .await
            .map_err(|err| TaskFailure::retryable(format!("cleanup aborted: {err}")))?
            .map_err(|err| TaskFailure::terminal(err.to_string()))?;

        serde_json::to_value(report)
            .map_err(|err| TaskFailure::terminal(format!("encode reap report: {err}")))
    }
}

/// Tick of the periodic sweep. apalis-cron builds one per schedule firing.
#[derive(Default, Debug, Clone)]
pub struct ReapJob;

impl From<chrono::DateTime<chrono::Utc>> for ReapJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct ReapJobContext {
    pub pipeline: Arc<TaskPipeline>,
}

/// Queue a `cleanup` task so the sweep runs on a worker like any other task.
pub async fn process_reap_job(
    _job: ReapJob,
    ctx: Data<ReapJobContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.pipeline.submit(TaskKind::Cleanup, json!({})).await {
        Ok(task_id) => {
            info!(target = TARGET, op = "schedule", task_id = %task_id, "cleanup task queued");
        }
        Err(err) => {
            warn!(target = TARGET, op = "schedule", error = %err, "failed to queue cleanup task");
        }
    }
    Ok(())
}
