//! Value-producing nodes: `LiteralAction` and `FallbackAction`.

use rampart_types::execution::NodeKind;
use serde_json::Value;

use super::lifecycle::{self, BodyReport, NodeMeta};
use super::{ActionFuture, ActionNode, Call, Injection, Runtime};
use crate::hooks::HookManager;

// ---------------------------------------------------------------------------
// LiteralAction
// ---------------------------------------------------------------------------

/// Yields a fixed value. Typically seeds a chain.
pub struct LiteralAction {
    name: String,
    value: Value,
    hooks: HookManager,
    injection: Injection,
}

impl LiteralAction {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            hooks: HookManager::new(),
            injection: Injection::default(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl ActionNode for LiteralAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Literal
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
                kind: NodeKind::Literal,
                hooks: &self.hooks,
            };
            lifecycle::drive(meta, runtime, args, |_, _| async move {
                BodyReport::once(Ok(self.value.clone()))
            })
            .await
        })
    }
}

// ---------------------------------------------------------------------------
// FallbackAction
// ---------------------------------------------------------------------------

/// Passes a non-null previous result through, otherwise yields its fallback.
///
/// Inside a chain, a `FallbackAction` directly after a failing step recovers
/// the chain: the failed step counts as a null result and the chain goes on.
pub struct FallbackAction {
    name: String,
    fallback: Value,
    hooks: HookManager,
    injection: Injection,
}

impl FallbackAction {
    pub fn new(name: impl Into<String>, fallback: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            fallback: fallback.into(),
            hooks: HookManager::new(),
            injection: Injection::enabled(Default::default()),
        }
    }

    pub fn fallback(&self) -> &Value {
        &self.fallback
    }
}

impl ActionNode for FallbackAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Fallback
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
            let previous = call.last_result.clone().filter(|v| !v.is_null());
            let args = self.injection.apply(call, &self.name);
            let meta = NodeMeta {
                name: &self.name,
                kind: NodeKind::Fallback,
                hooks: &self.hooks,
            };
            lifecycle::drive(meta, runtime, args, |_, _| async move {
                let value = match previous {
                    Some(value) => value,
                    None => {
                        tracing::info!(action = %self.name, "using fallback value");
                        self.fallback.clone()
                    }
                };
                BodyReport::once(Ok(value))
            })
            .await
        })
    }

    fn is_fallback(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_types::args::ActionArgs;
    use rampart_types::execution::ExecutionStatus;
    use serde_json::json;

    #[tokio::test]
    async fn literal_ignores_arguments() {
        let literal = LiteralAction::new("seed", json!([1, 2]));
        let runtime = Runtime::new();
        let out = runtime
            .run(&literal, ActionArgs::new().with_arg("ignored"))
            .await
            .unwrap();
        assert_eq!(out, json!([1, 2]));
        assert_eq!(runtime.registry().latest().unwrap().kind(), NodeKind::Literal);
    }

    #[tokio::test]
    async fn fallback_passes_through_real_results() {
        let fallback = FallbackAction::new("default", "none");
        let runtime = Runtime::new();
        let out = fallback
            .invoke(Call::default().with_last_result(json!("real")), &runtime)
            .await
            .unwrap();
        assert_eq!(out, json!("real"));
    }

    #[tokio::test]
    async fn fallback_substitutes_null_or_missing() {
        let fallback = FallbackAction::new("default", "none");
        let runtime = Runtime::new();

        let from_null = fallback
            .invoke(Call::default().with_last_result(Value::Null), &runtime)
            .await
            .unwrap();
        let from_missing = fallback.invoke(Call::default(), &runtime).await.unwrap();

        assert_eq!(from_null, json!("none"));
        assert_eq!(from_missing, json!("none"));
        assert!(fallback.is_fallback());
        assert_eq!(
            runtime.registry().latest().unwrap().status(),
            ExecutionStatus::Success
        );
    }
}
