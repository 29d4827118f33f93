//! `Action`: a leaf node wrapping one unit of work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rampart_types::args::ActionArgs;
use rampart_types::execution::NodeKind;
use serde_json::Value;

use super::lifecycle::{self, BodyReport, NodeMeta};
use super::{
    ActionFuture, ActionNode, Call, Injection, RollbackFn, RollbackFuture, Runtime, rollback_fn,
};
use crate::hooks::HookManager;
use crate::retry::{self, RetryPolicy};

type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
type WorkFn = Arc<dyn Fn(ActionArgs) -> WorkFuture + Send + Sync>;

/// A unit of work with its own hooks, retry policy and optional rollback.
///
/// ```no_run
/// use rampart_core::{Action, Runtime};
/// use rampart_types::args::ActionArgs;
///
/// # async fn demo() -> Result<(), rampart_core::ActionError> {
/// let greet = Action::from_fn("greet", |args| {
///     let who = args.get("who").and_then(|v| v.as_str()).unwrap_or("world");
///     Ok(format!("hello {who}").into())
/// });
/// let runtime = Runtime::new();
/// let out = runtime.run(&greet, ActionArgs::new().with_named("who", "ops")).await?;
/// assert_eq!(out, "hello ops");
/// # Ok(())
/// # }
/// ```
pub struct Action {
    name: String,
    work: WorkFn,
    rollback: Option<RollbackFn>,
    retry: Arc<RetryPolicy>,
    hooks: HookManager,
    injection: Injection,
}

impl Action {
    /// Wrap an async unit of work.
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(ActionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Arc::new(move |args| Box::pin(work(args))),
            rollback: None,
            retry: Arc::new(RetryPolicy::default()),
            hooks: HookManager::new(),
            injection: Injection::default(),
        }
    }

    /// Wrap a synchronous unit of work. It runs inline on the scheduler, so
    /// keep it short; CPU-heavy work belongs in a `ProcessAction`.
    pub fn from_fn<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(ActionArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        Self::new(name, move |args| {
            let work = Arc::clone(&work);
            async move { work(args) }
        })
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Arc::new(policy);
        self
    }

    pub fn with_shared_retry(mut self, policy: Arc<RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    /// Compensating callback receiving this action's own result.
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

    pub fn with_hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl ActionNode for Action {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Action
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
                kind: NodeKind::Action,
                hooks: &self.hooks,
            };
            lifecycle::drive(meta, runtime, args, |args, id| async move {
                let run = retry::run_with_retry(&self.retry, &self.name, id, runtime.events(), |_| {
                    (self.work)(args.clone())
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

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("has_rollback", &self.rollback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use rampart_types::execution::ExecutionStatus;
    use serde_json::json;

    use crate::error::ActionError;
    use crate::hooks::{Hook, HookId, HookStage};

    fn stage_log(action: &mut Action) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for stage in HookStage::ALL {
            let log = Arc::clone(&log);
            action.hooks_mut().on(stage, stage.as_str(), move |_| {
                log.lock().unwrap().push(stage.as_str().to_string());
                Ok(())
            });
        }
        log
    }

    #[tokio::test]
    async fn success_runs_success_path_hooks() {
        let mut action = Action::from_fn("double", |args| {
            let n = args.arg(0).and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!(n * 2))
        });
        let log = stage_log(&mut action);
        let runtime = Runtime::new();

        let out = runtime
            .run(&action, ActionArgs::new().with_arg(21))
            .await
            .unwrap();

        assert_eq!(out, json!(42));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before", "on_success", "after", "on_teardown"]
        );
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Success);
        assert_eq!(ctx.result(), Some(&json!(42)));
        assert_eq!(ctx.args().arg(0), Some(&json!(21)));
        assert_eq!(ctx.attempts(), 1);
        assert!(ctx.duration().is_some());
    }

    #[tokio::test]
    async fn failure_runs_error_path_hooks() {
        let mut action = Action::from_fn("broken", |_| anyhow::bail!("exploded"));
        let log = stage_log(&mut action);
        let runtime = Runtime::new();

        let err = runtime.run(&action, ActionArgs::new()).await.unwrap_err();

        assert!(matches!(err, ActionError::RetryExhausted(_)));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before", "on_error", "after", "on_teardown"]
        );
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Error);
        assert!(ctx.result().is_none());
        assert_eq!(ctx.error().unwrap().kind, "retry_exhausted");
    }

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let action = Action::from_fn("step1", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient")
            }
            Ok(json!("ok"))
        })
        .with_retry(RetryPolicy::new(3, Duration::from_secs(1), 2.0).unwrap());
        let runtime = Runtime::new();

        let out = runtime.run(&action, ActionArgs::new()).await.unwrap();

        assert_eq!(out, json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(runtime.registry().len(), 1);
        let ctx = runtime.registry().by_index(0).unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Success);
        assert_eq!(ctx.attempts(), 3);
        assert_eq!(
            ctx.retry_delays(),
            &[Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_body_invoked_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let action = Action::new("never", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("still down")) }
        })
        .with_retry(RetryPolicy::new(5, Duration::from_millis(10), 1.5).unwrap());

        let err = Runtime::new()
            .run(&action, ActionArgs::new())
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match err {
            ActionError::RetryExhausted(e) => assert_eq!(e.attempts, 5),
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn before_hook_failure_skips_body_and_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut action = Action::from_fn("guarded", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .with_retry(RetryPolicy::new(3, Duration::ZERO, 1.0).unwrap());
        action
            .hooks_mut()
            .on(HookStage::Before, "require-token", |_| anyhow::bail!("missing token"));
        let teardowns = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&teardowns);
        action.hooks_mut().on(HookStage::OnTeardown, "count", move |_| {
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let runtime = Runtime::new();

        let err = runtime.run(&action, ActionArgs::new()).await.unwrap_err();

        assert!(matches!(err, ActionError::Hook(ref h) if h.hook == "require-token"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.error().unwrap().kind, "hook");
        assert_eq!(ctx.attempts(), 0);
    }

    #[tokio::test]
    async fn on_success_hook_failure_becomes_terminal_error() {
        let mut action = Action::from_fn("checked", |_| Ok(json!(1)));
        action
            .hooks_mut()
            .on(HookStage::OnSuccess, "validate", |_| anyhow::bail!("result rejected"));
        let runtime = Runtime::new();

        let err = runtime.run(&action, ActionArgs::new()).await.unwrap_err();

        assert!(matches!(err, ActionError::Hook(_)));
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Error);
        assert!(ctx.result().is_none());
    }

    #[tokio::test]
    async fn cleanup_hook_failures_are_recorded_not_raised() {
        let mut action = Action::from_fn("tidy", |_| Ok(json!("done")));
        action
            .hooks_mut()
            .on(HookStage::After, "audit", |_| anyhow::bail!("audit log offline"));
        let teardown_ran = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&teardown_ran);
        action.hooks_mut().on(HookStage::OnTeardown, "release", move |_| {
            t.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("release failed")
        });
        let runtime = Runtime::new();

        let out = runtime.run(&action, ActionArgs::new()).await.unwrap();

        assert_eq!(out, json!("done"));
        assert_eq!(teardown_ran.load(Ordering::SeqCst), 1);
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Success);
        let stages: Vec<_> = ctx.hook_failures().iter().map(|f| f.stage.as_str()).collect();
        assert_eq!(stages, vec!["after", "on_teardown"]);
    }

    #[tokio::test]
    async fn on_error_hook_failure_keeps_original_error() {
        let mut action = Action::from_fn("orig", |_| anyhow::bail!("root cause"));
        action
            .hooks_mut()
            .on(HookStage::OnError, "notify", |_| anyhow::bail!("pager down"));
        let runtime = Runtime::new();

        let err = runtime.run(&action, ActionArgs::new()).await.unwrap_err();

        assert!(err.to_string().contains("root cause"));
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.hook_failures().len(), 1);
        assert_eq!(ctx.hook_failures()[0].hook, "notify");
    }

    #[tokio::test]
    async fn hooks_observe_terminal_context() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let mut action = Action::from_fn("observed", |_| Ok(json!("v")));
        action.hooks_mut().on(HookStage::After, "capture", move |ctx| {
            *s.lock().unwrap() = Some((ctx.status(), ctx.result().cloned()));
            Ok(())
        });

        Runtime::new().run(&action, ActionArgs::new()).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            Some((ExecutionStatus::Success, Some(json!("v"))))
        );
    }

    #[tokio::test]
    async fn injection_merges_previous_result() {
        let action = Action::from_fn("echo", |args| {
            Ok(args.get("last_result").cloned().unwrap_or(Value::Null))
        })
        .with_injection(Injection::enabled(Default::default()));
        let runtime = Runtime::new();

        let out = action
            .invoke(Call::new(ActionArgs::new()).with_last_result(json!(7)), &runtime)
            .await
            .unwrap();

        assert_eq!(out, json!(7));
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.args().get("last_result"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn rollback_receives_own_result() {
        let undone = Arc::new(Mutex::new(Vec::new()));
        let u = Arc::clone(&undone);
        let action = Action::from_fn("create", |_| Ok(json!({"id": 9}))).with_rollback(
            move |result| {
                let u = Arc::clone(&u);
                async move {
                    u.lock().unwrap().push(result);
                    Ok(())
                }
            },
        );
        assert!(action.has_rollback());

        let result = json!({"id": 9});
        action.rollback(&result).unwrap().await.unwrap();
        assert_eq!(*undone.lock().unwrap(), vec![json!({"id": 9})]);
    }

    #[tokio::test]
    async fn hook_ids_detach_from_node() {
        let mut action = Action::from_fn("quiet", |_| Ok(Value::Null));
        let id = HookId::fresh();
        action.register_hook_recursive(
            HookStage::Before,
            id,
            Hook::new("noisy", |_| anyhow::bail!("should be detached")),
        );
        action.detach_hook_recursive(id);

        assert!(Runtime::new().run(&action, ActionArgs::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_and_still_tears_down() {
        let torn_down = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&torn_down);
        let mut action = Action::new("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        action.hooks_mut().on(HookStage::OnTeardown, "release", move |_| {
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let runtime = Runtime::new();

        let err = runtime
            .run_with_timeout(&action, ActionArgs::new(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::TimedOut { .. }));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        let ctx = runtime.registry().latest().unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Error);
        assert_eq!(ctx.error().unwrap().kind, "cancelled");
    }
}
