//! Observability setup for Rampart binaries.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! binary's job.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
