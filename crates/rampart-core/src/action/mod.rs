//! Action-compatible nodes.
//!
//! Every node implements [`ActionNode`]: a name, its own hooks, an injection
//! setting, and `invoke`, which runs the node's full lifecycle and records
//! one `ExecutionContext`. Composite nodes own their children as
//! `Box<dyn ActionNode>`.
//!
//! The trait is object-safe: `invoke` and `rollback` return boxed futures so
//! chains and groups can hold heterogeneous children.

mod chain;
mod fallback;
mod group;
mod leaf;
mod lifecycle;
mod process;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rampart_types::args::{ActionArgs, InjectMode};
use rampart_types::execution::NodeKind;
use serde_json::Value;

use crate::error::ActionError;
use crate::event::EventBus;
use crate::hooks::{Hook, HookId, HookManager, HookStage};
use crate::registry::ExecutionRegistry;
use crate::retry::RetryPolicy;

pub use chain::ChainedAction;
pub use fallback::{FallbackAction, LiteralAction};
pub use group::{ActionGroup, GroupReport, MemberOutcome};
pub use leaf::Action;
pub use process::ProcessAction;

/// Future returned by [`ActionNode::invoke`].
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>>;

/// Future returned by [`ActionNode::rollback`].
pub type RollbackFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Call and injection
// ---------------------------------------------------------------------------

/// Input to one invocation: arguments plus the previous chain result, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    pub args: ActionArgs,
    pub last_result: Option<Value>,
}

impl Call {
    pub fn new(args: ActionArgs) -> Self {
        Self {
            args,
            last_result: None,
        }
    }

    pub fn with_last_result(mut self, value: Value) -> Self {
        self.last_result = Some(value);
        self
    }
}

impl From<ActionArgs> for Call {
    fn from(args: ActionArgs) -> Self {
        Self::new(args)
    }
}

/// Whether and how a node accepts the previous result as an argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Injection {
    pub enabled: bool,
    pub mode: InjectMode,
}

impl Injection {
    pub fn enabled(mode: InjectMode) -> Self {
        Self {
            enabled: true,
            mode,
        }
    }

    /// The previous result a composite forwards to its children. A composite
    /// that injects has already consumed it, so its children see none.
    pub fn pass_through(&self, call: &Call) -> Option<Value> {
        if self.enabled {
            None
        } else {
            call.last_result.clone()
        }
    }

    /// Merge the call's previous result into its arguments when enabled.
    pub fn apply(&self, call: Call, action: &str) -> ActionArgs {
        let Call {
            mut args,
            last_result,
        } = call;
        if let (true, Some(value)) = (self.enabled, last_result) {
            if args.inject(&self.mode, value).is_some() {
                tracing::warn!(action, mode = ?self.mode, "injected result replaced an existing argument");
            }
        }
        args
    }
}

// ---------------------------------------------------------------------------
// ActionNode
// ---------------------------------------------------------------------------

/// The capability set shared by every node.
pub trait ActionNode: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    fn hooks(&self) -> &HookManager;

    fn hooks_mut(&mut self) -> &mut HookManager;

    fn injection(&self) -> &Injection;

    fn injection_mut(&mut self) -> &mut Injection;

    /// Run the node's lifecycle and record its execution context.
    fn invoke<'a>(&'a self, call: Call, runtime: &'a Runtime) -> ActionFuture<'a>;

    /// Compensate a previous successful invocation that produced `result`.
    /// `None` when the node defines no rollback.
    fn rollback<'a>(&'a self, _result: &'a Value) -> Option<RollbackFuture<'a>> {
        None
    }

    fn has_rollback(&self) -> bool {
        false
    }

    /// Attach `hook` to this node and every descendant under one id.
    fn register_hook_recursive(&mut self, stage: HookStage, id: HookId, hook: Hook) {
        self.hooks_mut().register_with_id(stage, id, hook);
    }

    /// Detach the hook registered under `id` from this node and every descendant.
    fn detach_hook_recursive(&mut self, id: HookId) {
        self.hooks_mut().detach(id);
    }

    /// Apply `policy` to every retrying leaf in this subtree.
    fn apply_retry_policy(&mut self, _policy: &Arc<RetryPolicy>) {}

    fn is_fallback(&self) -> bool {
        false
    }
}

/// Stored rollback callback for leaf nodes.
pub(crate) type RollbackFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

pub(crate) fn rollback_fn<F, Fut>(f: F) -> RollbackFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |value| Box::pin(f(value)))
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Shared collaborators handed to every invocation.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    registry: Arc<ExecutionRegistry>,
    events: EventBus,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing registry, e.g. one created at process start.
    pub fn with_registry(registry: Arc<ExecutionRegistry>) -> Self {
        Self {
            registry,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Invoke `node` as a tree root.
    pub async fn run(&self, node: &dyn ActionNode, args: ActionArgs) -> Result<Value, ActionError> {
        node.invoke(Call::new(args), self).await
    }

    /// Invoke `node`, cancelling it when `timeout` elapses. Every in-flight
    /// node is recorded as cancelled and still runs its `after` and
    /// `on_teardown` hooks.
    pub async fn run_with_timeout(
        &self,
        node: &dyn ActionNode,
        args: ActionArgs,
        timeout: Duration,
    ) -> Result<Value, ActionError> {
        match tokio::time::timeout(timeout, self.run(node, args)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(action = %node.name(), ?timeout, "invocation timed out");
                Err(ActionError::TimedOut {
                    action: node.name().to_string(),
                    after: timeout,
                })
            }
        }
    }
}
