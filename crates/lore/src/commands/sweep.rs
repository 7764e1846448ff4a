//! Sweep command - decay stale memories.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Persona to sweep
    pub persona: String,
}

/// Run the sweep command.
pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let runtime = ctx.open_persona(&args.persona)?;
    let removed = runtime.memory().decay_sweep(Utc::now());
    if !removed.is_empty() {
        runtime.save().await?;
    }
    tracing::info!(persona = %args.persona, removed = removed.len(), "Decay sweep finished");

    if ctx.json_output {
        let ids: Vec<String> = removed.iter().map(ToString::to_string).collect();
        let out = json!({
            "persona": args.persona,
            "removed": ids,
            "remaining": runtime.memory().len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if removed.is_empty() {
        println!("{}", dim.apply_to("No stale memories"));
    } else {
        println!(
            "Removed {} stale {}",
            style(removed.len()).cyan(),
            if removed.len() == 1 { "memory" } else { "memories" }
        );
        if ctx.verbose {
            for id in &removed {
                println!("  {}", dim.apply_to(id));
            }
        }
    }
    Ok(())
}
