//! Tasks served by `rampart worker`.
//!
//! These run inside worker processes (or on the blocking pool with
//! `run --local`), so they are plain synchronous functions of their args.

use std::time::Duration;

use anyhow::Context;
use console::style;
use rampart_core::worker::TaskRegistry;
use rampart_types::args::ActionArgs;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

pub fn worker_tasks() -> TaskRegistry {
    TaskRegistry::new()
        .with("checksum", checksum)
        .with("sleep", sleep)
}

/// Print the registered task names.
pub fn list(json: bool) {
    let tasks = worker_tasks();
    let names: Vec<&str> = tasks.names().collect();
    if json {
        println!("{}", json!(names));
        return;
    }
    println!();
    println!("  {}", style("── Worker tasks ──").dim());
    for name in names {
        println!("  {}", style(name).cyan());
    }
    println!();
}

/// SHA-256 of the canonical JSON encoding of the arguments.
fn checksum(args: ActionArgs) -> anyhow::Result<Value> {
    let payload = serde_json::to_vec(&args).context("failed to encode arguments")?;
    Ok(json!({
        "sha256": format!("{:x}", Sha256::digest(&payload)),
        "bytes": payload.len(),
    }))
}

/// Block the worker for `args[0]` milliseconds.
fn sleep(args: ActionArgs) -> anyhow::Result<Value> {
    let millis = args
        .arg(0)
        .and_then(Value::as_u64)
        .context("sleep expects a duration in milliseconds")?;
    std::thread::sleep(Duration::from_millis(millis));
    Ok(json!(millis))
}
