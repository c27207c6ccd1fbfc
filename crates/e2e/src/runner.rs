//! Test process execution
//!
//! Generated tests run as a subprocess (by default `npx playwright test`). The caller
//! suspends until the process exits or the timeout elapses; a timed-out process is
//! killed. Spawn failures and timeouts are reported as [`RunStatus`] values, never as
//! errors, so a broken environment degrades into a failed run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use artk_common::config::RunnerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Passed,
    Failed,
    TimedOut,
    SpawnFailed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timedOut",
            RunStatus::SpawnFailed => "spawnFailed",
        }
    }
}

/// Result of running one or more test files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Executions performed, including retries
    pub attempts: u32,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Anything that can execute generated tests
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn run(&self, tests: &[PathBuf]) -> RunOutcome;
}

/// Runs the configured command with the test paths appended
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    retries: u32,
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(settings: &RunnerSettings) -> Self {
        let mut command = settings.command.iter().cloned();
        Self {
            program: command.next().unwrap_or_default(),
            args: command.collect(),
            timeout: Duration::from_secs(settings.timeout_secs),
            retries: settings.retries,
            working_dir: settings.working_dir.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn run_once(&self, tests: &[PathBuf]) -> RunOutcome {
        let start = Instant::now();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(tests)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let failed = |status, stderr: String| RunOutcome {
            status,
            exit_code: None,
            stdout: String::new(),
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts: 1,
        };

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "failed to spawn test runner");
                return failed(
                    RunStatus::SpawnFailed,
                    format!("failed to spawn {}: {e}", self.program),
                );
            }
        };

        // Dropping the future on timeout drops the child, which kills it
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let status = if output.status.success() {
                    RunStatus::Passed
                } else {
                    RunStatus::Failed
                };
                RunOutcome {
                    status,
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    attempts: 1,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "test runner I/O failed");
                failed(RunStatus::Failed, format!("waiting for test runner failed: {e}"))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "test run timed out");
                failed(
                    RunStatus::TimedOut,
                    format!("Test run exceeded timeout of {}ms", self.timeout.as_millis()),
                )
            }
        }
    }
}

#[async_trait]
impl TestExecutor for ProcessRunner {
    async fn run(&self, tests: &[PathBuf]) -> RunOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(program = %self.program, tests = tests.len(), attempt = attempts, "running tests");
            let mut outcome = self.run_once(tests).await;
            outcome.attempts = attempts;

            let retryable = matches!(outcome.status, RunStatus::Failed | RunStatus::TimedOut);
            if !retryable || attempts > self.retries {
                info!(
                    status = outcome.status.as_str(),
                    attempts,
                    duration_ms = outcome.duration_ms,
                    "test run finished"
                );
                return outcome;
            }
            warn!(attempt = attempts, status = outcome.status.as_str(), "test run failed, retrying");
        }
    }
}

/// Run a single test file
pub async fn run_test_file(executor: &dyn TestExecutor, path: &Path) -> RunOutcome {
    executor.run(&[path.to_path_buf()]).await
}
