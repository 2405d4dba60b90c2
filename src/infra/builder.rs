//! Builder backed by an external executable.
//!
//! The executable is invoked as
//! `<command> --kind K --template DIR --format F --layout L --input IN.json --output OUT.ext`.
//! It reads the request data from `IN.json`, writes the artifact to `OUT.ext`, and exits with
//! status 2 when it rejects the data. The child is killed and reaped once the build budget is
//! spent.

use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::application::builder::{BuildBudget, BuildError, Builder};
use crate::domain::documents::{Artifact, DocumentRequest};

const TARGET: &str = "pressroom::infra::builder";
const VALIDATION_EXIT_CODE: i32 = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: PathBuf,
    templates_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl CommandBuilder {
    pub fn new(command: PathBuf, templates_dir: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            command,
            templates_dir,
            scratch_dir,
        }
    }

    fn write_input(&self, request: &DocumentRequest) -> Result<NamedTempFile, BuildError> {
        let mut input = tempfile::Builder::new()
            .prefix("input-")
            .suffix(".json")
            .tempfile_in(&self.scratch_dir)?;
        let encoded = serde_json::to_vec(&request.data)
            .map_err(|err| BuildError::validation(format!("data is not valid JSON: {err}")))?;
        input.write_all(&encoded)?;
        input.flush()?;
        Ok(input)
    }
}

/// Wait for `child` while the budget lasts; past it, kill and reap the child.
fn wait_within(child: &mut Child, budget: &BuildBudget) -> Result<ExitStatus, BuildError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if budget.is_spent() {
            let pid = child.id();
            if let Err(err) = child.kill() {
                warn!(target = TARGET, op = "kill", pid, error = %err, "failed to kill build command");
            }
            child.wait()?;
            let reason = if budget.is_cancelled() {
                "caller stopped waiting"
            } else {
                "deadline passed"
            };
            return Err(BuildError::timed_out(format!("build command killed: {reason}")));
        }
        thread::sleep(POLL_INTERVAL.min(budget.remaining()).max(Duration::from_millis(1)));
    }
}

fn read_log(mut log: File) -> String {
    let mut text = String::new();
    if log.seek(SeekFrom::Start(0)).is_ok() {
        let _ = log.read_to_string(&mut text);
    }
    text.trim().to_string()
}

impl Builder for CommandBuilder {
    fn build(
        &self,
        request: &DocumentRequest,
        budget: &BuildBudget,
    ) -> Result<Artifact, BuildError> {
        let started_at = Instant::now();
        fs::create_dir_all(&self.scratch_dir)?;

        let input = self.write_input(request)?;
        let output = tempfile::Builder::new()
            .prefix("build-")
            .suffix(&format!(".{}", request.output_format.extension()))
            .tempfile_in(&self.scratch_dir)?;
        let template_dir = self
            .templates_dir
            .join(&request.document_kind)
            .join(&request.template_name);

        // Stderr goes to a file so a chatty toolchain cannot block on a full pipe.
        let stderr_log = tempfile::tempfile_in(&self.scratch_dir)?;

        let mut child = Command::new(&self.command)
            .arg("--kind")
            .arg(&request.document_kind)
            .arg("--template")
            .arg(&template_dir)
            .arg("--format")
            .arg(request.output_format.as_str())
            .arg("--layout")
            .arg(&request.layout_variant)
            .arg("--input")
            .arg(input.path())
            .arg("--output")
            .arg(output.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_log.try_clone()?))
            .spawn()
            .map_err(|err| {
                warn!(
                    target = TARGET,
                    op = "build",
                    result = "error",
                    error_code = "spawn",
                    command = %self.command.display(),
                    error = %err,
                    "failed to spawn build command"
                );
                if err.kind() == ErrorKind::NotFound {
                    BuildError::unavailable(format!("{}: {err}", self.command.display()))
                } else {
                    BuildError::Io(err)
                }
            })?;

        let status = wait_within(&mut child, budget).inspect_err(|err| {
            warn!(
                target = TARGET,
                op = "build",
                result = "stopped",
                document_kind = %request.document_kind,
                template = %request.template_name,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "build command did not finish within its budget"
            );
        })?;

        if !status.success() {
            let exit_code = status.code();
            let stderr = read_log(stderr_log);
            warn!(
                target = TARGET,
                op = "build",
                result = "error",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                document_kind = %request.document_kind,
                template = %request.template_name,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "build command failed"
            );
            return Err(match exit_code {
                Some(VALIDATION_EXIT_CODE) => BuildError::validation(stderr),
                code => BuildError::toolchain(format!("exit {code:?}: {stderr}")),
            });
        }

        let bytes = fs::read(output.path())?;
        let artifact = if request.output_format.artifact_type().is_binary() {
            Artifact::Binary(bytes)
        } else {
            Artifact::Source(String::from_utf8(bytes).map_err(|err| {
                BuildError::toolchain(format!("source output is not UTF-8: {err}"))
            })?)
        };

        info!(
            target = TARGET,
            op = "build",
            result = "ok",
            document_kind = %request.document_kind,
            template = %request.template_name,
            format = %request.output_format,
            bytes = artifact.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "build command finished"
        );
        Ok(artifact)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::types::OutputFormat;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-builder");
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn builder(dir: &TempDir, body: &str) -> CommandBuilder {
        CommandBuilder::new(
            script(dir.path(), body),
            dir.path().join("templates"),
            dir.path().join("scratch"),
        )
    }

    fn budget() -> BuildBudget {
        BuildBudget::new(Duration::from_secs(30))
    }

    fn is_running(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    const COPY_INPUT: &str = r#"
while [ "$#" -gt 0 ]; do
  case "$1" in
    --input) shift; input="$1" ;;
    --output) shift; out="$1" ;;
  esac
  shift
done
cat "$input" > "$out"
"#;

    #[test]
    fn output_file_becomes_the_artifact() {
        let dir = TempDir::new().expect("temp dir");
        let builder = builder(&dir, COPY_INPUT);
        let request =
            DocumentRequest::new("invoice", "classic", json!({"total": 3}), OutputFormat::Latex);

        let artifact = builder.build(&request, &budget()).expect("built");
        assert_eq!(artifact, Artifact::Source(r#"{"total":3}"#.to_string()));
    }

    #[test]
    fn exit_code_two_is_a_validation_error() {
        let dir = TempDir::new().expect("temp dir");
        let builder = builder(&dir, "echo 'missing field: total' >&2\nexit 2\n");
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Pdf);

        match builder.build(&request, &budget()) {
            Err(BuildError::Validation { message }) => assert!(message.contains("total")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn other_failures_are_toolchain_errors() {
        let dir = TempDir::new().expect("temp dir");
        let builder = builder(&dir, "echo boom >&2\nexit 42\n");
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Pdf);

        let err = builder.build(&request, &budget()).expect_err("failure");
        assert!(matches!(err, BuildError::Toolchain { .. }));
        assert!(err.retryable());
    }

    #[test]
    fn missing_command_is_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let builder = CommandBuilder::new(
            dir.path().join("nope"),
            dir.path().join("templates"),
            dir.path().join("scratch"),
        );
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Pdf);
        assert!(matches!(
            builder.build(&request, &budget()),
            Err(BuildError::Unavailable { .. })
        ));
    }

    #[test]
    fn spent_budget_kills_the_child() {
        let dir = TempDir::new().expect("temp dir");
        let pid_file = dir.path().join("builder.pid");
        let builder = builder(
            &dir,
            &format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        );
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Pdf);

        let started = Instant::now();
        let err = builder
            .build(&request, &BuildBudget::new(Duration::from_millis(300)))
            .expect_err("stopped");
        assert!(matches!(err, BuildError::TimedOut { .. }), "{err:?}");
        assert!(!err.retryable());
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = fs::read_to_string(&pid_file).expect("pid written");
        assert!(!is_running(pid.trim()), "builder {pid} still running");
    }

    #[test]
    fn cancellation_stops_a_running_build() {
        let dir = TempDir::new().expect("temp dir");
        let builder = builder(&dir, "exec sleep 30\n");
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Pdf);
        let budget = BuildBudget::new(Duration::from_secs(60));

        let canceller = {
            let budget = budget.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                budget.cancel();
            })
        };
        let started = Instant::now();
        let err = builder.build(&request, &budget).expect_err("cancelled");
        canceller.join().expect("canceller");

        assert!(err.to_string().contains("caller stopped waiting"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
