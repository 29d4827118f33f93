//! Shared value types for Rampart.
//!
//! This crate contains the serializable types exchanged between the engine,
//! its adapters, and the CLI: invocation arguments, execution records,
//! engine events, worker wire messages, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod args;
pub mod config;
pub mod event;
pub mod execution;
pub mod worker;
