//! Event types for the engine event bus.
//!
//! `EngineEvent` is broadcast while nodes run. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionStatus, NodeKind};

/// Events emitted during node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A node began an invocation.
    ActionStarted {
        execution_id: Uuid,
        name: String,
        kind: NodeKind,
    },

    /// A failed attempt will be retried after `delay_ms`.
    RetryScheduled {
        execution_id: Uuid,
        name: String,
        /// The attempt that just failed (1-based).
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// A node's invocation reached a terminal state and was recorded.
    ActionFinished {
        execution_id: Uuid,
        /// Registry index of the recorded execution.
        index: usize,
        name: String,
        status: ExecutionStatus,
        duration_ms: u64,
    },

    /// A chain step's rollback callback failed.
    RollbackFailed {
        chain: String,
        step: String,
        error: String,
    },
}

impl EngineEvent {
    /// Name of the node this event refers to.
    pub fn name(&self) -> &str {
        match self {
            Self::ActionStarted { name, .. }
            | Self::RetryScheduled { name, .. }
            | Self::ActionFinished { name, .. } => name,
            Self::RollbackFailed { chain, .. } => chain,
        }
    }
}
