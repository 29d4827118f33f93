//! Action orchestration engine for Rampart.
//!
//! Nodes (`Action`, `ChainedAction`, `ActionGroup`, `ProcessAction`) share one
//! object-safe contract, `ActionNode`. Every invocation runs through the same
//! lifecycle: hooks around the body, retry with backoff for leaves, rollback
//! for chains, and one `ExecutionContext` recorded into the shared
//! `ExecutionRegistry`.
//!
//! This crate defines the `ProcessExecutor` port that `rampart-infra`
//! implements with OS worker processes. It never depends on infra crates.

pub mod action;
pub mod context;
pub mod error;
pub mod event;
pub mod hooks;
pub mod registry;
pub mod retry;
pub mod worker;

pub use action::{
    ActionGroup, ActionNode, Action, Call, ChainedAction, FallbackAction, GroupReport,
    Injection, LiteralAction, ProcessAction, Runtime,
};
pub use context::ExecutionContext;
pub use error::{ActionError, BreakChain, ChainError, HookError, RetryExhaustedError};
pub use hooks::{Hook, HookManager, HookStage};
pub use registry::{ExecutionFilter, ExecutionRegistry};
pub use retry::RetryPolicy;
pub use worker::{BoxProcessExecutor, LocalExecutor, ProcessExecutor, TaskRegistry};
