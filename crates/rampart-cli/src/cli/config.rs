//! `rampart config`: show the effective configuration.

use std::path::Path;

use anyhow::Result;
use console::style;
use rampart_types::config::EngineConfig;

pub fn show(config: &EngineConfig, path: &Path, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = if path.exists() {
        style("loaded").green()
    } else {
        style("not found, using defaults").yellow()
    };
    println!();
    println!("  {} {} ({source})", style("Config:").bold(), path.display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
