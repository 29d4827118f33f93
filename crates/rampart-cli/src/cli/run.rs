//! `rampart run`: the built-in release pipeline.
//!
//! ```text
//! release (chain, auto-inject)
//!   manifest   literal release manifest
//!   validate   checks the manifest; rollback releases the deploy lock
//!   checks     group: ping, warm-cache (fails once, retried), checksum (worker)
//!   deploy     reads the check report; rollback reverts the rollout
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use rampart_core::hooks::logging::install_logging_hooks;
use rampart_core::worker::{BoxProcessExecutor, LocalExecutor};
use rampart_core::{
    Action, ActionGroup, ChainedAction, GroupReport, LiteralAction, ProcessAction,
    RetryPolicy, Runtime,
};
use rampart_infra::process::ProcessWorkerPool;
use rampart_types::args::{ActionArgs, InjectMode};
use rampart_types::config::EngineConfig;
use rampart_types::event::EngineEvent;
use rampart_types::execution::{ExecutionStatus, ExecutionSummary};
use serde_json::{Value, json};

use super::tasks::worker_tasks;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub fail: bool,
    pub timeout: Option<Duration>,
    pub local: bool,
}

pub async fn run(config: &EngineConfig, options: RunOptions, json: bool) -> Result<()> {
    let executor = if options.local {
        BoxProcessExecutor::new(LocalExecutor::new(worker_tasks(), config.workers.pool_size))
    } else {
        let pool = ProcessWorkerPool::from_config(&config.workers)
            .context("failed to locate the worker executable")?;
        BoxProcessExecutor::new(pool)
    };

    let mut pipeline = build_pipeline(config, executor, options.fail)?;
    if config.logging.debug_hooks {
        install_logging_hooks(&mut pipeline);
    }

    let runtime = Runtime::new();
    let progress = (!json).then(|| tokio::spawn(print_retries(runtime.events().subscribe())));

    let outcome = match options.timeout {
        Some(limit) => {
            runtime
                .run_with_timeout(&pipeline, ActionArgs::new(), limit)
                .await
        }
        None => runtime.run(&pipeline, ActionArgs::new()).await,
    };
    if let Some(task) = progress {
        task.abort();
    }

    let summaries = runtime.registry().summaries();
    if json {
        let out = match &outcome {
            Ok(result) => json!({ "outcome": "success", "result": result, "executions": summaries }),
            Err(err) => json!({ "outcome": "error", "error": err.to_record(), "executions": summaries }),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_summaries(&summaries);
    }

    outcome.map(|_| ()).map_err(anyhow::Error::new)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub fn build_pipeline(
    config: &EngineConfig,
    executor: BoxProcessExecutor,
    fail_deploy: bool,
) -> Result<ChainedAction> {
    let retry = Arc::new(RetryPolicy::from_config(&config.retry)?);
    let mode = config.chain.inject_mode();

    let validate = {
        let mode = mode.clone();
        Action::from_fn("validate", move |args| validate_manifest(&args, &mode))
            .with_shared_retry(Arc::clone(&retry))
            .with_rollback(|manifest| async move {
                tracing::info!(service = ?manifest.get("service"), "released deploy lock");
                Ok(())
            })
    };

    let warm_calls = Arc::new(AtomicU32::new(0));
    let warm_cache = Action::new("warm-cache", move |_| {
        let first = warm_calls.fetch_add(1, Ordering::SeqCst) == 0;
        async move {
            if first {
                bail!("cache node not ready")
            }
            Ok(json!("warm"))
        }
    })
    .with_retry(RetryPolicy::new(
        retry.max_attempts().max(3),
        Duration::from_millis(200),
        2.0,
    )?);

    let checks = ActionGroup::from_config("checks", &config.group)
        .with(Action::from_fn("ping", |_| Ok(json!("pong"))))
        .with(warm_cache)
        .with(ProcessAction::new("checksum", "checksum", executor).with_shared_retry(Arc::clone(&retry)));

    let deploy = Action::from_fn("deploy", move |args| deploy(&args, &mode, fail_deploy)).with_rollback(
        |result| async move {
            tracing::warn!(release = %result, "reverted rollout");
            Ok(())
        },
    );

    Ok(ChainedAction::from_config("release", &config.chain)
        .with_auto_inject(true)
        .then(LiteralAction::new(
            "manifest",
            json!({ "service": "api", "version": "1.4.2", "replicas": 3 }),
        ))
        .then(validate)
        .then(checks)
        .then(deploy))
}

fn injected<'a>(args: &'a ActionArgs, mode: &InjectMode) -> Option<&'a Value> {
    match mode {
        InjectMode::Named(key) => args.get(key),
        InjectMode::Positional => args.positional.last(),
    }
}

fn validate_manifest(args: &ActionArgs, mode: &InjectMode) -> Result<Value> {
    let manifest = injected(args, mode).context("no manifest to validate")?;
    for field in ["service", "version"] {
        let present = manifest
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| !v.is_empty());
        if !present {
            bail!("manifest is missing '{field}'");
        }
    }
    Ok(manifest.clone())
}

fn deploy(args: &ActionArgs, mode: &InjectMode, fail: bool) -> Result<Value> {
    let report = injected(args, mode)
        .cloned()
        .map(GroupReport::from_value)
        .transpose()?
        .context("no check report to deploy from")?;
    let failed: Vec<&str> = report.failed().map(|m| m.name.as_str()).collect();
    if !failed.is_empty() {
        bail!("checks failed: {}", failed.join(", "));
    }
    if fail {
        bail!("target cluster rejected the rollout");
    }
    Ok(json!({ "deployed": true, "checks": report.len() }))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

async fn print_retries(mut events: tokio::sync::broadcast::Receiver<EngineEvent>) {
    while let Ok(event) = events.recv().await {
        if let EngineEvent::RetryScheduled {
            name,
            attempt,
            delay_ms,
            error,
            ..
        } = event
        {
            eprintln!(
                "  {} {name} attempt {attempt} failed ({error}), retrying in {delay_ms}ms",
                style("↻").yellow()
            );
        }
    }
}

fn print_summaries(summaries: &[ExecutionSummary]) {
    println!();
    println!("  {}", style("── Executions ──").dim());
    for summary in summaries {
        let status = match summary.status {
            ExecutionStatus::Success => style("✓").green(),
            ExecutionStatus::Error => style("✗").red(),
            _ => style("…").yellow(),
        };
        let duration = summary
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {status} {:>3} {:<12} {:<9} {:>7}  attempts={}",
            summary.index,
            summary.name,
            summary.kind.to_string(),
            duration,
            summary.attempts,
        );
        if let Some(error) = &summary.error {
            println!("        {}", style(error).red());
        }
        for rollback in &summary.rollbacks {
            let mark = if rollback.succeeded {
                style("rolled back").dim()
            } else {
                style("rollback failed").red()
            };
            println!("        {mark} {} (step {})", rollback.step, rollback.position);
        }
    }
    println!();
}
