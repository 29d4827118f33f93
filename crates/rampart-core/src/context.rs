//! Per-invocation execution record.
//!
//! An `ExecutionContext` is created when a node begins an invocation, mutated
//! only by that invocation's own lifecycle driver, and frozen once it is
//! pushed into the `ExecutionRegistry` (the registry hands out `Arc`s, so no
//! mutation is possible afterwards).
//!
//! Timing uses `tokio::time::Instant` so durations follow the runtime clock
//! (including paused test time); wall-clock timestamps are kept alongside for
//! display.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rampart_types::args::ActionArgs;
use rampart_types::execution::{
    ErrorRecord, ExecutionStatus, ExecutionSummary, HookFailureRecord, NodeKind, RollbackRecord,
};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::HookError;

/// Record of one node invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: Uuid,
    index: Option<usize>,
    name: String,
    kind: NodeKind,
    args: ActionArgs,
    status: ExecutionStatus,
    result: Option<Value>,
    error: Option<ErrorRecord>,
    start: Instant,
    end: Option<Instant>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    attempts: u32,
    retry_delays: Vec<Duration>,
    rollbacks: Vec<RollbackRecord>,
    hook_failures: Vec<HookFailureRecord>,
}

impl ExecutionContext {
    /// Create a pending record. Arguments are captured by value.
    pub fn new(name: impl Into<String>, kind: NodeKind, args: ActionArgs) -> Self {
        Self {
            id: Uuid::now_v7(),
            index: None,
            name: name.into(),
            kind,
            args,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            start: Instant::now(),
            end: None,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            retry_delays: Vec::new(),
            rollbacks: Vec::new(),
            hook_failures: Vec::new(),
        }
    }

    // -- Accessors -----------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Position in the registry; `None` until recorded.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn args(&self) -> &ActionArgs {
        &self.args
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn start_time(&self) -> Instant {
        self.start
    }

    pub fn end_time(&self) -> Option<Instant> {
        self.end
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Elapsed time between start and end; `None` while still running.
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_duration_since(self.start))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_delays(&self) -> &[Duration] {
        &self.retry_delays
    }

    pub fn rollbacks(&self) -> &[RollbackRecord] {
        &self.rollbacks
    }

    pub fn hook_failures(&self) -> &[HookFailureRecord] {
        &self.hook_failures
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    // -- Lifecycle (driver only) ---------------------------------------------

    pub(crate) fn begin(&mut self) {
        self.status = ExecutionStatus::Running;
        self.start = Instant::now();
        self.started_at = Utc::now();
    }

    pub(crate) fn succeed(&mut self, value: Value) {
        self.status = ExecutionStatus::Success;
        self.result = Some(value);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: ErrorRecord) {
        self.status = ExecutionStatus::Error;
        self.error = Some(error);
        self.result = None;
    }

    pub(crate) fn finish(&mut self) {
        let now = Instant::now();
        self.end = Some(now.max(self.start));
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = Some(index);
    }

    pub(crate) fn set_trail(
        &mut self,
        attempts: u32,
        retry_delays: Vec<Duration>,
        rollbacks: Vec<RollbackRecord>,
    ) {
        self.attempts = attempts;
        self.retry_delays = retry_delays;
        self.rollbacks = rollbacks;
    }

    pub(crate) fn push_hook_failure(&mut self, failure: &HookError) {
        self.hook_failures.push(HookFailureRecord {
            stage: failure.stage.to_string(),
            hook: failure.hook.clone(),
            message: failure.message.clone(),
        });
    }

    /// Serializable view for history display.
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id,
            index: self.index.unwrap_or_default(),
            name: self.name.clone(),
            kind: self.kind,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration().map(|d| d.as_millis() as u64),
            attempts: self.attempts,
            retry_delays_ms: self
                .retry_delays
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect(),
            result: self.result.clone(),
            error: self.error.clone(),
            rollbacks: self.rollbacks.clone(),
            hook_failures: self.hook_failures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("deploy", NodeKind::Action, ActionArgs::new().with_arg("v1"))
    }

    #[test]
    fn new_context_is_pending_without_outcome() {
        let ctx = ctx();
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
        assert!(ctx.result().is_none());
        assert!(ctx.error().is_none());
        assert!(ctx.duration().is_none());
        assert_eq!(ctx.args().arg(0), Some(&json!("v1")));
    }

    #[test]
    fn success_and_error_are_mutually_exclusive() {
        let mut ctx = ctx();
        ctx.begin();
        ctx.fail(ErrorRecord::new("hook", "boom"));
        assert_eq!(ctx.status(), ExecutionStatus::Error);
        assert!(ctx.result().is_none());

        ctx.succeed(json!("ok"));
        assert_eq!(ctx.status(), ExecutionStatus::Success);
        assert!(ctx.error().is_none());
        assert_eq!(ctx.result(), Some(&json!("ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_follows_runtime_clock() {
        let mut ctx = ctx();
        ctx.begin();
        tokio::time::sleep(Duration::from_millis(250)).await;
        ctx.succeed(Value::Null);
        ctx.finish();
        assert_eq!(ctx.duration(), Some(Duration::from_millis(250)));
        assert!(ctx.end_time().unwrap() >= ctx.start_time());
    }

    #[test]
    fn summary_reflects_trail() {
        let mut ctx = ctx();
        ctx.begin();
        ctx.set_trail(3, vec![Duration::from_secs(1), Duration::from_secs(2)], Vec::new());
        ctx.succeed(json!(1));
        ctx.finish();
        ctx.set_index(7);

        let summary = ctx.summary();
        assert_eq!(summary.index, 7);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.retry_delays_ms, vec![1000, 2000]);
        assert_eq!(summary.status, ExecutionStatus::Success);
        assert!(summary.finished_at.is_some());
    }
}
