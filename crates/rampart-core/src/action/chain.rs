//! `ChainedAction`: run nodes in order, rolling back on failure.
//!
//! Only the first step receives the chain's arguments; every later step
//! receives empty arguments plus the previous step's result, which it merges
//! according to its own injection setting. With `auto_inject` the chain
//! enables injection on every step it holds.
//!
//! When step *k* fails, the rollbacks of steps 1..k-1 run in reverse order,
//! each receiving its own step's result. Rollback failures are recorded on
//! the chain's context and on the returned `ChainError`, never raised.

use std::sync::Arc;

use rampart_types::args::{ActionArgs, InjectMode};
use rampart_types::config::ChainConfig;
use rampart_types::event::EngineEvent;
use rampart_types::execution::{NodeKind, RollbackRecord};
use serde_json::Value;

use super::lifecycle::{self, BodyReport, NodeMeta};
use super::{ActionFuture, ActionNode, Call, Injection, Runtime};
use crate::error::{ActionError, ChainError, RollbackError};
use crate::hooks::{Hook, HookId, HookManager, HookStage};
use crate::retry::RetryPolicy;

pub struct ChainedAction {
    name: String,
    steps: Vec<Box<dyn ActionNode>>,
    hooks: HookManager,
    injection: Injection,
    auto_inject: bool,
    inject_mode: InjectMode,
    return_list: bool,
}

impl ChainedAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            hooks: HookManager::new(),
            injection: Injection::default(),
            auto_inject: false,
            inject_mode: InjectMode::default(),
            return_list: false,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &ChainConfig) -> Self {
        Self::new(name)
            .with_inject_mode(config.inject_mode())
            .with_auto_inject(config.auto_inject)
            .with_return_list(config.return_list)
    }

    /// Forward each step's result into the next step.
    pub fn with_auto_inject(mut self, auto_inject: bool) -> Self {
        self.auto_inject = auto_inject;
        if auto_inject {
            let mode = self.inject_mode.clone();
            for step in &mut self.steps {
                enable_injection(step.as_mut(), &mode);
            }
        }
        self
    }

    /// How auto-injected results are merged. Set before adding steps.
    pub fn with_inject_mode(mut self, mode: InjectMode) -> Self {
        self.inject_mode = mode;
        self
    }

    /// Return every step's result as an array instead of only the last.
    pub fn with_return_list(mut self, return_list: bool) -> Self {
        self.return_list = return_list;
        self
    }

    pub fn with_injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    pub fn then(mut self, step: impl ActionNode + 'static) -> Self {
        self.push(Box::new(step));
        self
    }

    pub fn push(&mut self, mut step: Box<dyn ActionNode>) {
        if self.auto_inject {
            enable_injection(step.as_mut(), &self.inject_mode);
        }
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Box<dyn ActionNode>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run_steps(
        &self,
        args: ActionArgs,
        last_result: Option<Value>,
        runtime: &Runtime,
    ) -> BodyReport {
        if self.steps.is_empty() {
            return BodyReport::once(Err(ActionError::EmptyChain(self.name.clone())));
        }

        let mut completed: Vec<(usize, &dyn ActionNode, Value)> = Vec::new();
        let mut results = Vec::with_capacity(self.steps.len());
        let mut call = Call { args, last_result };

        let mut index = 0;
        while index < self.steps.len() {
            let step = self.steps[index].as_ref();
            let outcome = step.invoke(std::mem::take(&mut call), runtime).await;

            match outcome {
                Ok(value) => {
                    completed.push((index, step, value.clone()));
                    results.push(value.clone());
                    call.last_result = Some(value);
                    index += 1;
                }
                Err(ActionError::Break { action, reason }) => {
                    tracing::info!(chain = %self.name, step = %action, %reason, "chain stopped by break signal");
                    let rollbacks = self.roll_back(&completed, runtime).await;
                    return BodyReport::once(Ok(Value::Null)).with_rollbacks(rollbacks);
                }
                Err(err) if self.next_is_fallback(index) => {
                    tracing::warn!(
                        chain = %self.name,
                        step = %step.name(),
                        error = %err,
                        "step failed, continuing with fallback"
                    );
                    results.push(Value::Null);
                    call.last_result = Some(Value::Null);
                    index += 1;
                }
                Err(err) => {
                    tracing::error!(
                        chain = %self.name,
                        step = %step.name(),
                        position = index + 1,
                        error = %err,
                        "step failed, rolling back"
                    );
                    let rollbacks = self.roll_back(&completed, runtime).await;
                    let rollback_failures = rollbacks
                        .iter()
                        .filter(|r| !r.succeeded)
                        .map(|r| RollbackError {
                            step: r.step.clone(),
                            position: r.position,
                            message: r.error.clone().unwrap_or_default(),
                        })
                        .collect();
                    let err = ActionError::from(ChainError {
                        chain: self.name.clone(),
                        failed_step: index + 1,
                        step_name: step.name().to_string(),
                        cause: Box::new(err),
                        rollback_failures,
                    });
                    return BodyReport::once(Err(err)).with_rollbacks(rollbacks);
                }
            }
        }

        let value = if self.return_list {
            Value::Array(results)
        } else {
            call.last_result.unwrap_or(Value::Null)
        };
        BodyReport::once(Ok(value))
    }

    fn next_is_fallback(&self, index: usize) -> bool {
        self.steps.get(index + 1).is_some_and(|s| s.is_fallback())
    }

    /// Best-effort reverse rollback of completed steps. Steps without a
    /// rollback callback are skipped and leave no record.
    async fn roll_back(
        &self,
        completed: &[(usize, &dyn ActionNode, Value)],
        runtime: &Runtime,
    ) -> Vec<RollbackRecord> {
        let mut records = Vec::new();
        for (index, step, result) in completed.iter().rev() {
            let Some(rollback) = step.rollback(result) else {
                continue;
            };
            let position = index + 1;
            match rollback.await {
                Ok(()) => {
                    tracing::info!(chain = %self.name, step = %step.name(), "rolled back");
                    records.push(RollbackRecord {
                        step: step.name().to_string(),
                        position,
                        succeeded: true,
                        error: None,
                    });
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    tracing::error!(
                        chain = %self.name,
                        step = %step.name(),
                        error = %message,
                        "rollback failed"
                    );
                    runtime.events().publish(EngineEvent::RollbackFailed {
                        chain: self.name.clone(),
                        step: step.name().to_string(),
                        error: message.clone(),
                    });
                    records.push(RollbackRecord {
                        step: step.name().to_string(),
                        position,
                        succeeded: false,
                        error: Some(message),
                    });
                }
            }
        }
        records
    }
}

fn enable_injection(step: &mut dyn ActionNode, mode: &InjectMode) {
    let injection = step.injection_mut();
    if !injection.enabled {
        *injection = Injection::enabled(mode.clone());
    }
}

impl ActionNode for ChainedAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Chain
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
            let last_result = self.injection.pass_through(&call);
            let args = self.injection.apply(call, &self.name);
            let meta = NodeMeta {
                name: &self.name,
                kind: NodeKind::Chain,
                hooks: &self.hooks,
            };
            lifecycle::drive(meta, runtime, args, |args, _| {
                self.run_steps(args, last_result, runtime)
            })
            .await
        })
    }

    fn register_hook_recursive(&mut self, stage: HookStage, id: HookId, hook: Hook) {
        self.hooks.register_with_id(stage, id, hook.clone());
        for step in &mut self.steps {
            step.register_hook_recursive(stage, id, hook.clone());
        }
    }

    fn detach_hook_recursive(&mut self, id: HookId) {
        self.hooks.detach(id);
        for step in &mut self.steps {
            step.detach_hook_recursive(id);
        }
    }

    fn apply_retry_policy(&mut self, policy: &Arc<RetryPolicy>) {
        for step in &mut self.steps {
            step.apply_retry_policy(policy);
        }
    }
}

impl std::fmt::Debug for ChainedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("ChainedAction")
            .field("name", &self.name)
            .field("steps", &steps)
            .field("auto_inject", &self.auto_inject)
            .field("return_list", &self.return_list)
            .finish()
    }
}
