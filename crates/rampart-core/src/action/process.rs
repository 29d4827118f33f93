//! `ProcessAction`: a leaf whose unit of work runs on a `ProcessExecutor`.
//!
//! The task is named, not captured, so it can cross a process boundary.
//! Everything around the work (hooks, retries, context, registry) happens
//! on the calling task exactly as for `Action`.

use std::future::Future;
use std::sync::Arc;

use rampart_types::execution::NodeKind;
use rampart_types::worker::WorkerRequest;
use serde_json::Value;

use super::lifecycle::{self, BodyReport, NodeMeta};
use super::{
    ActionFuture, ActionNode, Call, Injection, RollbackFn, RollbackFuture, Runtime, rollback_fn,
};
use crate::hooks::HookManager;
use crate::retry::{self, RetryPolicy};
use crate::worker::{BoxProcessExecutor, ProcessExecutor};

pub struct ProcessAction {
    name: String,
    task: String,
    executor: BoxProcessExecutor,
    rollback: Option<RollbackFn>,
    retry: Arc<RetryPolicy>,
    hooks: HookManager,
    injection: Injection,
}

impl ProcessAction {
    pub fn new(
        name: impl Into<String>,
        task: impl Into<String>,
        executor: BoxProcessExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            executor,
            rollback: None,
            retry: Arc::new(RetryPolicy::default()),
            hooks: HookManager::new(),
            injection: Injection::default(),
        }
    }

    /// Convenience for a single-owner executor.
    pub fn on<E: ProcessExecutor + 'static>(
        name: impl Into<String>,
        task: impl Into<String>,
        executor: E,
    ) -> Self {
        Self::new(name, task, BoxProcessExecutor::new(executor))
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Arc::new(policy);
        self
    }

    pub fn with_shared_retry(mut self, policy: Arc<RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    /// Compensation runs in the caller, not on the executor.
    pub fn with_rollback<F, Fut>(mut self, rollback: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.rollback = Some(rollback_fn(rollback));
        self
    }

    pub fn with_injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl ActionNode for ProcessAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Process
    }

    fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    fn hooks_mut(&mut self) -> &mut HookManager {
        &mut self.hooks
    }

    fn injection(&self) -> &Injection {
        &self.injection
    }

    fn injection_mut(&mut self) -> &mut Injection {
        &mut self.injection
    }

    fn invoke<'a>(&'a self, call: Call, runtime: &'a Runtime) -> ActionFuture<'a> {
        Box::pin(async move {
            let args = self.injection.apply(call, &self.name);
            let meta = NodeMeta {
                name: &self.name,
                kind: NodeKind::Process,
                hooks: &self.hooks,
            };
            lifecycle::drive(meta, runtime, args, |args, id| async move {
                let run = retry::run_with_retry(&self.retry, &self.name, id, runtime.events(), |_| {
                    let request = WorkerRequest {
                        task: self.task.clone(),
                        args: args.clone(),
                    };
                    let executor = self.executor.clone();
                    async move { executor.execute(request).await.map_err(anyhow::Error::new) }
                });
                BodyReport::retried(run.await)
            })
            .await
        })
    }

    fn rollback<'a>(&'a self, result: &'a Value) -> Option<RollbackFuture<'a>> {
        let rollback = self.rollback.as_ref()?;
        Some(rollback(result.clone()))
    }

    fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    fn apply_retry_policy(&mut self, policy: &Arc<RetryPolicy>) {
        self.retry = Arc::clone(policy);
    }
}

impl std::fmt::Debug for ProcessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessAction")
            .field("name", &self.name)
            .field("task", &self.task)
            .field("retry", &self.retry)
            .finish()
    }
}
