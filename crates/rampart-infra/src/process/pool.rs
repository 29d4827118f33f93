//! Bounded pool of OS worker processes.
//!
//! Each request spawns one worker, writes the `WorkerRequest` as a JSON line
//! on its stdin, closes stdin, and reads the `WorkerResponse` from the last
//! non-empty stdout line. A semaphore caps how many workers are alive at
//! once. Workers are killed when their request is dropped (timeout or
//! cancellation of the calling node).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use rampart_core::error::WorkerFailure;
use rampart_core::worker::{ProcessExecutor, response_into_result};
use rampart_types::config::WorkerConfig;
use rampart_types::worker::{WorkerRequest, WorkerResponse};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ProcessWorkerPool {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    pool_size: usize,
    permits: Arc<Semaphore>,
}

impl ProcessWorkerPool {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            program: program.into(),
            args,
            timeout: None,
            pool_size,
            permits: Arc::new(Semaphore::new(pool_size)),
        }
    }

    /// Build from `[workers]` config. Without an explicit `program` the
    /// current executable is re-invoked as the worker.
    pub fn from_config(config: &WorkerConfig) -> std::io::Result<Self> {
        let program = match &config.program {
            Some(program) => PathBuf::from(program),
            None => std::env::current_exe()?,
        };
        let mut pool = Self::new(program, config.args.clone(), config.pool_size);
        pool.timeout = config.timeout_secs.map(Duration::from_secs);
        Ok(pool)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Workers currently allowed to start without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn run_worker(&self, request: &WorkerRequest) -> Result<Value, WorkerFailure> {
        let mut line =
            serde_json::to_string(request).map_err(|e| WorkerFailure::Protocol(e.to_string()))?;
        line.push('\n');

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerFailure::Spawn(format!("{}: {e}", self.program.display())))?;
        tracing::debug!(task = %request.task, pid = child.id(), "worker spawned");

        if let Some(mut stdin) = child.stdin.take() {
            // A worker that exits before reading is reported by its exit status below.
            if let Err(err) = stdin.write_all(line.as_bytes()).await {
                tracing::debug!(task = %request.task, "failed to write request: {err}");
            }
        }

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| WorkerFailure::TimedOut(limit))?,
            None => wait.await,
        }
        .map_err(|e| WorkerFailure::Crashed {
            status: "wait failed".to_string(),
            stderr: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());

        match last_line {
            Some(last) => match serde_json::from_str::<WorkerResponse>(last) {
                Ok(response) => response_into_result(&request.task, response),
                Err(_) if !output.status.success() => Err(WorkerFailure::Crashed {
                    status: output.status.to_string(),
                    stderr,
                }),
                Err(err) => Err(WorkerFailure::Protocol(format!(
                    "malformed response from worker: {err}"
                ))),
            },
            None if !output.status.success() => Err(WorkerFailure::Crashed {
                status: output.status.to_string(),
                stderr,
            }),
            None => Err(WorkerFailure::Protocol(
                "worker exited without a response".to_string(),
            )),
        }
    }
}

impl ProcessExecutor for ProcessWorkerPool {
    async fn execute(&self, request: WorkerRequest) -> Result<Value, WorkerFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| WorkerFailure::Spawn("worker pool closed".to_string()))?;
        let result = self.run_worker(&request).await;
        if let Err(err) = &result {
            tracing::warn!(task = %request.task, kind = err.kind(), "worker request failed: {err}");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
