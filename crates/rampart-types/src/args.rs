//! Invocation arguments and result injection.
//!
//! Every node is invoked with an `ActionArgs`: an ordered list of positional
//! values plus a map of named values. Arguments are captured by value into
//! the execution record at invocation start, so everything here is plain
//! serializable data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named key used when a previous result is injected without an explicit key.
pub const DEFAULT_INJECT_KEY: &str = "last_result";

/// Positional and named arguments for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionArgs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positional: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named: BTreeMap<String, Value>,
}

impl ActionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build arguments from positional values only.
    pub fn from_positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            named: BTreeMap::new(),
        }
    }

    /// Append a positional value.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named value, replacing any previous value under that key.
    pub fn with_named(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.named.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Merge `other` into `self`: positional values are appended, named
    /// values from `other` win on key collisions.
    pub fn merge(mut self, other: ActionArgs) -> Self {
        self.positional.extend(other.positional);
        self.named.extend(other.named);
        self
    }

    /// Inject a value according to `mode`.
    ///
    /// Returns the value that was displaced when a named key was already
    /// present. Positional injection never displaces anything.
    pub fn inject(&mut self, mode: &InjectMode, value: Value) -> Option<Value> {
        match mode {
            InjectMode::Named(key) => self.named.insert(key.clone(), value),
            InjectMode::Positional => {
                self.positional.push(value);
                None
            }
        }
    }
}

/// How an injected result is merged into a node's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "key", rename_all = "snake_case")]
pub enum InjectMode {
    /// Insert under a named key (default `last_result`).
    Named(String),
    /// Append as the last positional argument.
    Positional,
}

impl Default for InjectMode {
    fn default() -> Self {
        Self::Named(DEFAULT_INJECT_KEY.to_string())
    }
}
