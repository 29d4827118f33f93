//! Error taxonomy for node execution.
//!
//! Units of work return `anyhow::Result`; the engine converts their failures
//! into the typed errors below once retries are settled. Every `ActionError`
//! can be rendered as an `ErrorRecord` for the execution registry.

use std::time::Duration;

use rampart_types::execution::ErrorRecord;
use thiserror::Error;

use crate::action::GroupReport;
use crate::hooks::HookStage;

// ---------------------------------------------------------------------------
// Leaf errors
// ---------------------------------------------------------------------------

/// A hook raised during a stage whose failures are not swallowed.
#[derive(Debug, Clone, Error)]
#[error("{stage} hook '{hook}' failed for '{action}': {message}")]
pub struct HookError {
    pub action: String,
    pub stage: HookStage,
    pub hook: String,
    pub message: String,
}

/// Every allowed attempt of a leaf failed.
#[derive(Debug, Clone, Error)]
#[error("'{action}' failed after {attempts} attempt(s): {}", .cause.message)]
pub struct RetryExhaustedError {
    pub action: String,
    pub attempts: u32,
    pub cause: ErrorRecord,
}

/// Returned by a unit of work to stop the enclosing chain without failing it.
///
/// Never retried. The chain rolls back its completed steps and returns null.
#[derive(Debug, Clone, Error)]
#[error("break chain: {reason}")]
pub struct BreakChain {
    pub reason: String,
}

impl BreakChain {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Composite errors
// ---------------------------------------------------------------------------

/// A rollback callback failed. Recorded on the chain, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rollback of '{step}' (step {position}) failed: {message}")]
pub struct RollbackError {
    pub step: String,
    pub position: usize,
    pub message: String,
}

/// A chain member failed after its own retries.
#[derive(Debug, Error)]
#[error("chain '{chain}' failed at step {failed_step} ('{step_name}'): {cause}")]
pub struct ChainError {
    pub chain: String,
    /// 1-based position of the failing step.
    pub failed_step: usize,
    pub step_name: String,
    #[source]
    pub cause: Box<ActionError>,
    pub rollback_failures: Vec<RollbackError>,
}

/// One or more group members failed while fail-fast was enabled.
#[derive(Debug, Clone, Error)]
#[error("group '{group}': {} of {total} member(s) failed ({})", .failed.len(), .failed.join(", "))]
pub struct GroupPartialFailure {
    pub group: String,
    pub failed: Vec<String>,
    pub total: usize,
    /// Outcomes of every member, in declaration order.
    pub report: GroupReport,
}

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

/// Terminal failure of one node invocation.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhaustedError),

    /// The body failed with an error the retry policy does not retry.
    #[error("'{action}' failed: {}", .cause.message)]
    Failed { action: String, cause: ErrorRecord },

    #[error(transparent)]
    Chain(Box<ChainError>),

    #[error(transparent)]
    GroupPartialFailure(#[from] GroupPartialFailure),

    #[error("chain '{0}' has no actions")]
    EmptyChain(String),

    #[error("group '{0}' has no actions")]
    EmptyGroup(String),

    #[error("'{action}' broke the chain: {reason}")]
    Break { action: String, reason: String },

    #[error("'{action}' timed out after {after:?}")]
    TimedOut { action: String, after: Duration },

    #[error("'{0}' was cancelled")]
    Cancelled(String),
}

impl From<ChainError> for ActionError {
    fn from(err: ChainError) -> Self {
        Self::Chain(Box::new(err))
    }
}

impl ActionError {
    /// Stable classifier stored as `ErrorRecord::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hook(_) => "hook",
            Self::RetryExhausted(_) => "retry_exhausted",
            Self::Failed { .. } => "failed",
            Self::Chain(_) => "chain",
            Self::GroupPartialFailure(_) => "group_partial_failure",
            Self::EmptyChain(_) => "empty_chain",
            Self::EmptyGroup(_) => "empty_group",
            Self::Break { .. } => "break",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Render for the execution registry, carrying the underlying trace
    /// (e.g. a worker's stderr) when one was captured.
    pub fn to_record(&self) -> ErrorRecord {
        let record = ErrorRecord::new(self.kind(), self.to_string());
        let trace = match self {
            Self::RetryExhausted(e) => e.cause.trace.clone(),
            Self::Failed { cause, .. } => cause.trace.clone(),
            Self::Chain(e) => e.cause.to_record().trace,
            _ => None,
        };
        match trace {
            Some(trace) => record.with_trace(trace),
            None => record,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker failures
// ---------------------------------------------------------------------------

/// Failure of work executed through a `ProcessExecutor`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFailure {
    /// The task ran and reported an error.
    #[error("task '{task}' failed: {message}")]
    TaskFailed {
        task: String,
        kind: String,
        message: String,
    },

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    /// The worker exited without producing a response.
    #[error("worker crashed ({status})")]
    Crashed { status: String, stderr: String },

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("worker timed out after {0:?}")]
    TimedOut(Duration),
}

impl WorkerFailure {
    pub fn kind(&self) -> &str {
        match self {
            Self::TaskFailed { kind, .. } => kind,
            Self::UnknownTask(_) => "unknown_task",
            Self::Crashed { .. } => "worker_crashed",
            Self::Protocol(_) => "protocol",
            Self::Spawn(_) => "spawn",
            Self::TimedOut(_) => "worker_timeout",
        }
    }
}

/// Classify an arbitrary failure from a unit of work.
pub fn error_record(err: &anyhow::Error) -> ErrorRecord {
    if let Some(failure) = err.downcast_ref::<WorkerFailure>() {
        let record = ErrorRecord::new(failure.kind(), format!("{err:#}"));
        return match failure {
            WorkerFailure::Crashed { stderr, .. } if !stderr.is_empty() => {
                record.with_trace(stderr.clone())
            }
            _ => record,
        };
    }
    if let Some(action) = err.downcast_ref::<ActionError>() {
        return action.to_record();
    }
    ErrorRecord::new("error", format!("{err:#}"))
}

// ---------------------------------------------------------------------------
// Registry and policy errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no execution at index {index} (registry holds {len})")]
    NotFound { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("backoff_multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(String),

    #[error("{field} must be finite and >= 0, got {value}")]
    InvalidDelay { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown hook stage '{0}'")]
pub struct UnknownHookStage(pub String);
