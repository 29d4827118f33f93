//! The invocation lifecycle shared by every node.
//!
//! `drive` builds the execution context, runs `before` hooks, runs the
//! node-specific body, settles the outcome through `on_success`/`on_error`,
//! runs `after` and `on_teardown`, and records the context.
//!
//! If the invocation future is dropped mid-flight (a root timeout), the
//! `InFlight` guard finalizes the context as cancelled from `Drop`, so
//! cleanup hooks still run and the registry still gets the record.

use std::future::Future;
use std::time::Duration;

use rampart_types::args::ActionArgs;
use rampart_types::event::EngineEvent;
use rampart_types::execution::{ErrorRecord, NodeKind, RollbackRecord};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use super::Runtime;
use crate::context::ExecutionContext;
use crate::error::{ActionError, HookError};
use crate::hooks::{HookManager, HookStage};
use crate::retry::AttemptTrail;

/// Identity of the node being driven.
#[derive(Clone, Copy)]
pub(crate) struct NodeMeta<'a> {
    pub name: &'a str,
    pub kind: NodeKind,
    pub hooks: &'a HookManager,
}

/// What a node body produced, plus the trail to store on the context.
pub(crate) struct BodyReport {
    pub outcome: Result<Value, ActionError>,
    pub attempts: u32,
    pub retry_delays: Vec<Duration>,
    pub rollbacks: Vec<RollbackRecord>,
}

impl BodyReport {
    pub fn once(outcome: Result<Value, ActionError>) -> Self {
        Self {
            outcome,
            attempts: 1,
            retry_delays: Vec::new(),
            rollbacks: Vec::new(),
        }
    }

    pub fn retried((outcome, trail): (Result<Value, ActionError>, AttemptTrail)) -> Self {
        Self {
            outcome,
            attempts: trail.attempts,
            retry_delays: trail.retry_delays,
            rollbacks: Vec::new(),
        }
    }

    pub fn with_rollbacks(mut self, rollbacks: Vec<RollbackRecord>) -> Self {
        self.rollbacks = rollbacks;
        self
    }
}

/// Run one invocation of a node around `body`.
pub(crate) async fn drive<F, Fut>(
    meta: NodeMeta<'_>,
    runtime: &Runtime,
    args: ActionArgs,
    body: F,
) -> Result<Value, ActionError>
where
    F: FnOnce(ActionArgs, Uuid) -> Fut,
    Fut: Future<Output = BodyReport>,
{
    let flight = InFlight::start(meta, runtime, args.clone());
    let report = match flight.before() {
        Ok(()) => {
            let span = tracing::debug_span!("action", name = %meta.name, kind = %meta.kind);
            body(args, flight.id).instrument(span).await
        }
        Err(err) => BodyReport {
            attempts: 0,
            ..BodyReport::once(Err(ActionError::Hook(err)))
        },
    };
    flight.complete(report)
}

// ---------------------------------------------------------------------------
// InFlight guard
// ---------------------------------------------------------------------------

struct InFlight<'a> {
    meta: NodeMeta<'a>,
    runtime: &'a Runtime,
    id: Uuid,
    ctx: Option<ExecutionContext>,
}

impl<'a> InFlight<'a> {
    fn start(meta: NodeMeta<'a>, runtime: &'a Runtime, args: ActionArgs) -> Self {
        let mut ctx = ExecutionContext::new(meta.name, meta.kind, args);
        ctx.begin();
        runtime.events().publish(EngineEvent::ActionStarted {
            execution_id: ctx.id(),
            name: meta.name.to_string(),
            kind: meta.kind,
        });
        Self {
            meta,
            runtime,
            id: ctx.id(),
            ctx: Some(ctx),
        }
    }

    /// `before` hooks are fatal: the first failure skips the body.
    fn before(&self) -> Result<(), HookError> {
        match &self.ctx {
            Some(ctx) => self.meta.hooks.trigger(HookStage::Before, ctx),
            None => Ok(()),
        }
    }

    fn complete(mut self, report: BodyReport) -> Result<Value, ActionError> {
        let Some(mut ctx) = self.ctx.take() else {
            return report.outcome;
        };
        ctx.set_trail(report.attempts, report.retry_delays, report.rollbacks);

        let outcome = match report.outcome {
            Ok(value) => {
                ctx.succeed(value.clone());
                match self.meta.hooks.trigger(HookStage::OnSuccess, &ctx) {
                    Ok(()) => Ok(value),
                    Err(hook_err) => {
                        let err = ActionError::Hook(hook_err);
                        ctx.fail(err.to_record());
                        self.on_error(&mut ctx);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                ctx.fail(err.to_record());
                self.on_error(&mut ctx);
                Err(err)
            }
        };

        self.finalize(ctx);
        outcome
    }

    /// `on_error` failures never replace the error already being raised.
    fn on_error(&self, ctx: &mut ExecutionContext) {
        let failures = self.meta.hooks.trigger_all(HookStage::OnError, ctx);
        for failure in &failures {
            ctx.push_hook_failure(failure);
        }
    }

    fn finalize(&self, mut ctx: ExecutionContext) {
        for stage in [HookStage::After, HookStage::OnTeardown] {
            let failures = self.meta.hooks.trigger_all(stage, &ctx);
            for failure in &failures {
                ctx.push_hook_failure(failure);
            }
        }
        ctx.finish();

        let duration_ms = ctx.duration().unwrap_or_default().as_millis() as u64;
        match ctx.error() {
            Some(error) => tracing::debug!(
                action = %ctx.name(),
                kind = %error.kind,
                duration_ms,
                "invocation failed"
            ),
            None => tracing::debug!(action = %ctx.name(), duration_ms, "invocation succeeded"),
        }

        let recorded = self.runtime.registry().record(ctx);
        self.runtime.events().publish(EngineEvent::ActionFinished {
            execution_id: recorded.id(),
            index: recorded.index().unwrap_or_default(),
            name: recorded.name().to_string(),
            status: recorded.status(),
            duration_ms,
        });
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            tracing::warn!(action = %ctx.name(), "invocation cancelled");
            let err = ActionError::Cancelled(ctx.name().to_string());
            ctx.fail(ErrorRecord::new(err.kind(), err.to_string()));
            self.on_error(&mut ctx);
            self.finalize(ctx);
        }
    }
}
