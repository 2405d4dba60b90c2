use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::json;

use pressroom::application::tasks::{
    Broker, CleanupHandler, HandlerRegistry, PipelineConfig, ReaperConfig, TaskKind, TaskPipeline,
    TaskState, WorkerConfig, WorkerPool, reap,
};
use pressroom::infra::kv::MemoryStore;
use pressroom::util::clock::SystemClock;

const HOUR: Duration = Duration::from_secs(60 * 60);

fn touch(path: &Path, modified: SystemTime) {
    let file = File::create(path).expect("create file");
    file.set_modified(modified).expect("set mtime");
}

fn config(dir: &Path) -> ReaperConfig {
    ReaperConfig {
        directory: dir.to_path_buf(),
        max_age: 2 * HOUR,
    }
}

#[test]
fn failures_are_counted_without_stopping_the_sweep() {
    let dir = tempfile::tempdir().expect("tempdir");
    let now = SystemTime::now() + 3 * HOUR;

    // Old enough to qualify, but a directory cannot be removed as a file.
    fs::create_dir(dir.path().join("stale.pdf")).expect("create dir");
    for name in ["a.pdf", "b.docx", "c.tex", "c.aux", "c.log"] {
        touch(&dir.path().join(name), SystemTime::now());
    }
    touch(&dir.path().join("fresh.pdf"), SystemTime::now() + 2 * HOUR);
    touch(&dir.path().join("notes.txt"), SystemTime::now());

    let report = reap(&config(dir.path()), now).expect("swept");

    assert_eq!(report.status, "SUCCESS");
    assert_eq!(report.cleaned, 5);
    assert_eq!(report.errors, 1);
    assert!(dir.path().join("stale.pdf").is_dir());
    assert!(dir.path().join("fresh.pdf").exists());
    assert!(dir.path().join("notes.txt").exists());
    assert!(!dir.path().join("a.pdf").exists());
}

#[test]
fn age_is_measured_against_the_supplied_instant() {
    let dir = tempfile::tempdir().expect("tempdir");
    let written = SystemTime::now();
    touch(&dir.path().join("report.pdf"), written);

    let early = reap(&config(dir.path()), written + HOUR).expect("swept");
    assert_eq!(early.cleaned, 0);

    let late = reap(&config(dir.path()), written + 2 * HOUR + Duration::from_secs(1))
        .expect("swept");
    assert_eq!(late.cleaned, 1);
}

#[test]
fn unreadable_directory_path_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("not-a-dir");
    touch(&file, SystemTime::now());

    assert!(reap(&config(&file), SystemTime::now()).is_err());
}

#[tokio::test]
async fn cleanup_tasks_report_the_sweep() {
    let dir = tempfile::tempdir().expect("tempdir");
    let long_ago = SystemTime::now() - 3 * HOUR;
    touch(&dir.path().join("old.pdf"), long_ago);
    touch(&dir.path().join("old.tex"), long_ago);
    touch(&dir.path().join("new.pdf"), SystemTime::now());

    let pipeline = Arc::new(TaskPipeline::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Broker::new()),
        Arc::new(SystemClock),
        PipelineConfig::default(),
    ));
    let registry = HandlerRegistry::new().register(
        TaskKind::Cleanup,
        Arc::new(CleanupHandler::new(config(dir.path()))),
    );
    let workers =
        WorkerPool::new(pipeline.clone(), Arc::new(registry), WorkerConfig::default()).spawn();

    let id = pipeline
        .submit(TaskKind::Cleanup, json!({}))
        .await
        .expect("submitted");

    let record = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = pipeline.status(id).await.expect("record exists");
            if record.state.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cleanup finished");

    assert_eq!(record.state, TaskState::Success);
    assert_eq!(
        record.result,
        Some(json!({ "status": "SUCCESS", "cleaned": 2, "errors": 0 }))
    );
    assert!(dir.path().join("new.pdf").exists());

    workers.shutdown().await;
}
