//! Tracing hooks for node lifecycles.

use super::{Hook, HookId, HookManager, HookStage};
use crate::action::ActionNode;
use crate::context::ExecutionContext;

fn logging_hooks() -> [(HookStage, Hook); 4] {
    [
        (HookStage::Before, Hook::new("log:before", log_before)),
        (HookStage::OnSuccess, Hook::new("log:success", log_success)),
        (HookStage::OnError, Hook::new("log:error", log_error)),
        (HookStage::After, Hook::new("log:after", log_after)),
    ]
}

/// Attach `before`, `on_success`, `on_error` and `after` hooks that emit
/// tracing events with the context's name, status and timing.
pub fn register_logging_hooks(hooks: &mut HookManager) -> Vec<HookId> {
    logging_hooks()
        .into_iter()
        .map(|(stage, hook)| hooks.register(stage, hook))
        .collect()
}

/// Same hooks, attached to `node` and every descendant. Detach with
/// [`ActionNode::detach_hook_recursive`].
pub fn install_logging_hooks(node: &mut dyn ActionNode) -> Vec<HookId> {
    logging_hooks()
        .into_iter()
        .map(|(stage, hook)| {
            let id = HookId::fresh();
            node.register_hook_recursive(stage, id, hook);
            id
        })
        .collect()
}

fn log_before(ctx: &ExecutionContext) -> anyhow::Result<()> {
    tracing::debug!(
        action = %ctx.name(),
        kind = %ctx.kind(),
        args = ?ctx.args(),
        "starting"
    );
    Ok(())
}

fn log_success(ctx: &ExecutionContext) -> anyhow::Result<()> {
    tracing::debug!(
        action = %ctx.name(),
        result = ?ctx.result(),
        "completed"
    );
    Ok(())
}

fn log_error(ctx: &ExecutionContext) -> anyhow::Result<()> {
    if let Some(error) = ctx.error() {
        tracing::error!(
            action = %ctx.name(),
            kind = %error.kind,
            error = %error.message,
            "failed"
        );
    }
    Ok(())
}

fn log_after(ctx: &ExecutionContext) -> anyhow::Result<()> {
    let elapsed_ms = ctx.start_time().elapsed().as_millis() as u64;
    tracing::info!(
        action = %ctx.name(),
        status = %ctx.status(),
        attempts = ctx.attempts(),
        elapsed_ms,
        "finished"
    );
    Ok(())
}
