//! Infrastructure layer for Rampart.
//!
//! Implements the `ProcessExecutor` port from `rampart-core` with real OS
//! worker processes, provides the worker-side stdio loop, and loads
//! `config.toml` from disk.

pub mod config;
pub mod process;
