//! Isolated execution substrate for `ProcessAction`.
//!
//! `ProcessExecutor` is the port: given a `WorkerRequest`, produce the task's
//! result or a `WorkerFailure`. `rampart-infra` implements it with a bounded
//! pool of OS worker processes; `LocalExecutor` here runs the same tasks on
//! tokio's blocking pool, which is enough for tests and single-binary use.
//!
//! `ProcessExecutor` uses RPITIT, so it cannot be a trait object directly.
//! Following the same blanket-impl pattern as the node futures:
//! 1. `ProcessExecutorDyn` is the object-safe version with boxed futures
//! 2. It is blanket-implemented for every `T: ProcessExecutor`
//! 3. `BoxProcessExecutor` wraps `Arc<dyn ProcessExecutorDyn>` and delegates

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;

use rampart_types::args::ActionArgs;
use rampart_types::worker::{WorkerRequest, WorkerResponse};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::WorkerFailure;

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

pub type TaskFn = Arc<dyn Fn(ActionArgs) -> anyhow::Result<Value> + Send + Sync>;

/// Named synchronous tasks a worker can run.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, task: F) -> &mut Self
    where
        F: Fn(ActionArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(task));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, task: F) -> Self
    where
        F: Fn(ActionArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, task);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Run one request to completion. Task errors and panics become
    /// `Failure` responses; this never panics itself.
    pub fn handle(&self, request: WorkerRequest) -> WorkerResponse {
        let Some(task) = self.tasks.get(&request.task) else {
            return WorkerResponse::failure("unknown_task", format!("unknown task '{}'", request.task));
        };
        match catch_unwind(AssertUnwindSafe(|| task(request.args))) {
            Ok(Ok(result)) => WorkerResponse::Success { result },
            Ok(Err(err)) => WorkerResponse::failure("task_failed", format!("{err:#}")),
            Err(payload) => WorkerResponse::failure("panic", panic_message(payload.as_ref())),
        }
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Map a worker's response for `task` onto the executor result.
pub fn response_into_result(task: &str, response: WorkerResponse) -> Result<Value, WorkerFailure> {
    match response {
        WorkerResponse::Success { result } => Ok(result),
        WorkerResponse::Failure { kind, .. } if kind == "unknown_task" => {
            Err(WorkerFailure::UnknownTask(task.to_string()))
        }
        WorkerResponse::Failure { kind, message } => Err(WorkerFailure::TaskFailed {
            task: task.to_string(),
            kind,
            message,
        }),
    }
}

// ---------------------------------------------------------------------------
// ProcessExecutor port
// ---------------------------------------------------------------------------

/// Executes worker requests off the cooperative scheduler.
pub trait ProcessExecutor: Send + Sync {
    fn execute(
        &self,
        request: WorkerRequest,
    ) -> impl Future<Output = Result<Value, WorkerFailure>> + Send;
}

/// Object-safe version of [`ProcessExecutor`] with boxed futures.
pub trait ProcessExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        request: WorkerRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, WorkerFailure>> + Send + 'a>>;
}

impl<T: ProcessExecutor> ProcessExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        request: WorkerRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, WorkerFailure>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Type-erased executor shared by many `ProcessAction`s.
#[derive(Clone)]
pub struct BoxProcessExecutor {
    inner: Arc<dyn ProcessExecutorDyn>,
}

impl BoxProcessExecutor {
    pub fn new<T: ProcessExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub async fn execute(&self, request: WorkerRequest) -> Result<Value, WorkerFailure> {
        self.inner.execute_boxed(request).await
    }
}

impl std::fmt::Debug for BoxProcessExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxProcessExecutor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// LocalExecutor
// ---------------------------------------------------------------------------

/// Runs registered tasks on tokio's blocking thread pool, at most
/// `max_concurrency` at a time.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    tasks: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
}

impl LocalExecutor {
    pub fn new(tasks: TaskRegistry, max_concurrency: usize) -> Self {
        Self {
            tasks: Arc::new(tasks),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }
}

impl ProcessExecutor for LocalExecutor {
    async fn execute(&self, request: WorkerRequest) -> Result<Value, WorkerFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| WorkerFailure::Spawn("executor closed".to_string()))?;
        let tasks = Arc::clone(&self.tasks);
        let task = request.task.clone();
        let response = tokio::task::spawn_blocking(move || tasks.handle(request))
            .await
            .map_err(|err| WorkerFailure::Crashed {
                status: "join error".to_string(),
                stderr: err.to_string(),
            })?;
        response_into_result(&task, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tasks() -> TaskRegistry {
        TaskRegistry::new()
            .with("sum", |args| {
                let total: i64 = args.positional.iter().filter_map(Value::as_i64).sum();
                Ok(json!(total))
            })
            .with("fail", |_| anyhow::bail!("bad input"))
            .with("explode", |_| panic!("kaboom"))
    }

    fn request(task: &str, args: ActionArgs) -> WorkerRequest {
        WorkerRequest {
            task: task.to_string(),
            args,
        }
    }

    #[test]
    fn handle_maps_outcomes_to_responses() {
        let tasks = tasks();
        assert_eq!(
            tasks.handle(request("sum", ActionArgs::from_positional([json!(2), json!(3)]))),
            WorkerResponse::Success { result: json!(5) }
        );
        assert_eq!(
            tasks.handle(request("fail", ActionArgs::new())),
            WorkerResponse::failure("task_failed", "bad input")
        );
        assert_eq!(
            tasks.handle(request("explode", ActionArgs::new())),
            WorkerResponse::failure("panic", "kaboom")
        );
        assert!(matches!(
            tasks.handle(request("missing", ActionArgs::new())),
            WorkerResponse::Failure { ref kind, .. } if kind == "unknown_task"
        ));
    }

    #[test]
    fn names_are_sorted() {
        let names: Vec<_> = tasks().names().map(str::to_string).collect();
        assert_eq!(names, vec!["explode", "fail", "sum"]);
    }

    #[tokio::test]
    async fn local_executor_runs_tasks_off_scheduler() {
        let executor = BoxProcessExecutor::new(LocalExecutor::new(tasks(), 2));
        let out = executor
            .execute(request("sum", ActionArgs::from_positional([json!(40), json!(2)])))
            .await
            .unwrap();
        assert_eq!(out, json!(42));

        let err = executor
            .execute(request("missing", ActionArgs::new()))
            .await
            .unwrap_err();
        assert_eq!(err, WorkerFailure::UnknownTask("missing".to_string()));

        let err = executor
            .execute(request("fail", ActionArgs::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "task_failed");
    }
}
