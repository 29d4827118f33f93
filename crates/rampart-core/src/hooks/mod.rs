//! Lifecycle hooks.
//!
//! A `HookManager` holds, per `HookStage`, an ordered list of callables that
//! receive the invocation's `ExecutionContext`. Hooks run synchronously in
//! registration order. Two dispatch modes exist:
//!
//! - [`HookManager::trigger`] stops at the first failure and returns it
//!   (used for `before` and `on_success`).
//! - [`HookManager::trigger_all`] runs every hook, logs each failure, and
//!   returns them for recording (used for `on_error`, `after`, `on_teardown`).

pub mod circuit_breaker;
pub mod logging;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::ExecutionContext;
use crate::error::{HookError, UnknownHookStage};

// ---------------------------------------------------------------------------
// HookStage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    Before,
    OnSuccess,
    OnError,
    After,
    OnTeardown,
}

impl HookStage {
    /// Every stage in lifecycle order.
    pub const ALL: [HookStage; 5] = [
        Self::Before,
        Self::OnSuccess,
        Self::OnError,
        Self::After,
        Self::OnTeardown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::OnSuccess => "on_success",
            Self::OnError => "on_error",
            Self::After => "after",
            Self::OnTeardown => "on_teardown",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookStage {
    type Err = UnknownHookStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "on_success" | "success" => Ok(Self::OnSuccess),
            "on_error" | "error" => Ok(Self::OnError),
            "after" => Ok(Self::After),
            "on_teardown" | "teardown" => Ok(Self::OnTeardown),
            other => Err(UnknownHookStage(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

pub type HookFn = Arc<dyn Fn(&ExecutionContext) -> anyhow::Result<()> + Send + Sync>;

/// A named hook callable. Cheap to clone; clones share the callable.
#[derive(Clone)]
pub struct Hook {
    name: String,
    func: HookFn,
}

impl Hook {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, ctx: &ExecutionContext) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

/// Handle returned by [`HookManager::register`], used to detach a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

impl HookId {
    /// Allocate an id not yet used by any manager.
    pub fn fresh() -> Self {
        Self(NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// HookManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HookManager {
    stages: HashMap<HookStage, Vec<(HookId, Hook)>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to `stage`. Hooks run in registration order.
    pub fn register(&mut self, stage: HookStage, hook: Hook) -> HookId {
        let id = HookId::fresh();
        self.register_with_id(stage, id, hook);
        id
    }

    /// Shorthand for `register(stage, Hook::new(name, func))`.
    pub fn on<F>(&mut self, stage: HookStage, name: impl Into<String>, func: F) -> HookId
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(stage, Hook::new(name, func))
    }

    /// Register under an existing id. Used when one hook is attached to a
    /// whole node tree so a single id detaches it everywhere.
    pub fn register_with_id(&mut self, stage: HookStage, id: HookId, hook: Hook) {
        self.stages.entry(stage).or_default().push((id, hook));
    }

    /// Remove the hook registered under `id`. Returns whether one was found.
    pub fn detach(&mut self, id: HookId) -> bool {
        let mut found = false;
        for hooks in self.stages.values_mut() {
            let before = hooks.len();
            hooks.retain(|(hook_id, _)| *hook_id != id);
            found |= hooks.len() != before;
        }
        found
    }

    /// Remove every hook of `stage`, or of every stage when `None`.
    pub fn clear(&mut self, stage: Option<HookStage>) {
        match stage {
            Some(stage) => {
                self.stages.remove(&stage);
            }
            None => self.stages.clear(),
        }
    }

    pub fn hooks(&self, stage: HookStage) -> impl Iterator<Item = &Hook> {
        self.stages
            .get(&stage)
            .into_iter()
            .flat_map(|hooks| hooks.iter().map(|(_, hook)| hook))
    }

    pub fn len(&self, stage: HookStage) -> usize {
        self.stages.get(&stage).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.values().all(Vec::is_empty)
    }

    /// Run `stage`'s hooks in order, stopping at the first failure.
    pub fn trigger(&self, stage: HookStage, ctx: &ExecutionContext) -> Result<(), HookError> {
        for hook in self.hooks(stage) {
            hook.call(ctx).map_err(|err| hook_error(stage, hook, ctx, &err))?;
        }
        Ok(())
    }

    /// Run every hook of `stage`, logging and collecting failures.
    pub fn trigger_all(&self, stage: HookStage, ctx: &ExecutionContext) -> Vec<HookError> {
        let mut failures = Vec::new();
        for hook in self.hooks(stage) {
            if let Err(err) = hook.call(ctx) {
                let failure = hook_error(stage, hook, ctx, &err);
                tracing::warn!(
                    action = %ctx.name(),
                    stage = %stage,
                    hook = %hook.name(),
                    error = %failure.message,
                    "hook failed"
                );
                failures.push(failure);
            }
        }
        failures
    }
}

fn hook_error(
    stage: HookStage,
    hook: &Hook,
    ctx: &ExecutionContext,
    err: &anyhow::Error,
) -> HookError {
    HookError {
        action: ctx.name().to_string(),
        stage,
        hook: hook.name().to_string(),
        message: format!("{err:#}"),
    }
}
