//! `ActionGroup`: run independent nodes concurrently.
//!
//! Members are polled together on the invoking task (no spawning), so a
//! group interleaves members cooperatively at their suspension points. One
//! member failing never cancels its siblings; the group waits for every
//! member and reports each outcome in declaration order.

use std::sync::Arc;

use futures_util::future::join_all;
use rampart_types::args::ActionArgs;
use rampart_types::config::GroupConfig;
use rampart_types::execution::{ErrorRecord, ExecutionStatus, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lifecycle::{self, BodyReport, NodeMeta};
use super::{ActionFuture, ActionNode, Call, Injection, Runtime};
use crate::error::{ActionError, GroupPartialFailure};
use crate::hooks::{Hook, HookId, HookManager, HookStage};
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one group member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberOutcome {
    pub name: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl MemberOutcome {
    fn from_outcome(name: &str, outcome: Result<Value, ActionError>) -> Self {
        match outcome {
            Ok(value) => Self {
                name: name.to_string(),
                status: ExecutionStatus::Success,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                name: name.to_string(),
                status: ExecutionStatus::Error,
                result: None,
                error: Some(err.to_record()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Every member's outcome, in declaration order.
///
/// Serialized as a JSON array of `{"name", "status", "result" | "error"}`;
/// that array is the group's result value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupReport {
    members: Vec<MemberOutcome>,
}

impl GroupReport {
    pub fn members(&self) -> &[MemberOutcome] {
        &self.members
    }

    /// First member with this name.
    pub fn get(&self, name: &str) -> Option<&MemberOutcome> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn failed(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.members.iter().filter(|m| !m.is_success())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.members.iter().filter(|m| m.is_success())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

// ---------------------------------------------------------------------------
// ActionGroup
// ---------------------------------------------------------------------------

pub struct ActionGroup {
    name: String,
    members: Vec<Box<dyn ActionNode>>,
    hooks: HookManager,
    injection: Injection,
    fail_fast: bool,
}

impl ActionGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            hooks: HookManager::new(),
            injection: Injection::default(),
            fail_fast: false,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &GroupConfig) -> Self {
        Self::new(name).with_fail_fast(config.fail_fast)
    }

    /// Fail the group call when any member failed.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    pub fn with(mut self, member: impl ActionNode + 'static) -> Self {
        self.members.push(Box::new(member));
        self
    }

    pub fn push(&mut self, member: Box<dyn ActionNode>) {
        self.members.push(member);
    }

    pub fn members(&self) -> &[Box<dyn ActionNode>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Invoke and decode the per-member report.
    pub async fn invoke_report(
        &self,
        call: Call,
        runtime: &Runtime,
    ) -> Result<GroupReport, ActionError> {
        let value = self.invoke(call, runtime).await?;
        Ok(GroupReport::from_value(value).unwrap_or_default())
    }

    async fn run_members(
        &self,
        args: ActionArgs,
        last_result: Option<Value>,
        runtime: &Runtime,
    ) -> BodyReport {
        if self.members.is_empty() {
            return BodyReport::once(Err(ActionError::EmptyGroup(self.name.clone())));
        }

        let calls = self.members.iter().map(|member| {
            let call = Call {
                args: args.clone(),
                last_result: last_result.clone(),
            };
            member.invoke(call, runtime)
        });
        let outcomes = join_all(calls).await;

        let report = GroupReport {
            members: self
                .members
                .iter()
                .zip(outcomes)
                .map(|(member, outcome)| MemberOutcome::from_outcome(member.name(), outcome))
                .collect(),
        };
        let failed: Vec<String> = report.failed().map(|m| m.name.clone()).collect();
        if !failed.is_empty() {
            tracing::warn!(
                group = %self.name,
                failed = failed.len(),
                total = report.len(),
                "group members failed"
            );
        }

        if self.fail_fast && !failed.is_empty() {
            let total = report.len();
            return BodyReport::once(Err(ActionError::from(GroupPartialFailure {
                group: self.name.clone(),
                failed,
                total,
                report,
            })));
        }
        BodyReport::once(Ok(report.to_value()))
    }
}

impl ActionNode for ActionGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Group
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
                kind: NodeKind::Group,
                hooks: &self.hooks,
            };
            lifecycle::drive(meta, runtime, args, |args, _| {
                self.run_members(args, last_result, runtime)
            })
            .await
        })
    }

    fn register_hook_recursive(&mut self, stage: HookStage, id: HookId, hook: Hook) {
        self.hooks.register_with_id(stage, id, hook.clone());
        for member in &mut self.members {
            member.register_hook_recursive(stage, id, hook.clone());
        }
    }

    fn detach_hook_recursive(&mut self, id: HookId) {
        self.hooks.detach(id);
        for member in &mut self.members {
            member.detach_hook_recursive(id);
        }
    }

    fn apply_retry_policy(&mut self, policy: &Arc<RetryPolicy>) {
        for member in &mut self.members {
            member.apply_retry_policy(policy);
        }
    }
}
