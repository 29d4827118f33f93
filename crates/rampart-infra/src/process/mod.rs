//! Worker process plumbing: the parent-side pool and the child-side loop.

pub mod pool;
pub mod worker;

pub use pool::ProcessWorkerPool;
pub use worker::{serve, serve_stdio};
