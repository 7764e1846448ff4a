//! Import command - segment a raw chat log into archived sessions.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use serde_json::json;

use super::Context;

/// Arguments for the import command.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Persona whose archive is replaced
    pub persona: String,

    /// JSON-lines log, one message object per line
    pub log: PathBuf,

    /// Parse and segment without saving
    #[arg(long)]
    pub dry_run: bool,
}

/// Run the import command.
pub async fn run(args: ImportArgs, ctx: &Context) -> Result<()> {
    let text = std::fs::read_to_string(&args.log)
        .with_context(|| format!("failed to read {}", args.log.display()))?;

    let runtime = ctx.open_persona(&args.persona)?;
    let report = runtime.import_raw_log(&text, &ctx.settings.segment).await;
    if !args.dry_run {
        runtime.save().await?;
    }
    tracing::info!(
        persona = %args.persona,
        messages = report.messages,
        skipped = report.skipped_lines,
        sessions = report.sessions,
        dry_run = args.dry_run,
        "Raw log imported"
    );

    if ctx.json_output {
        let out = json!({
            "persona": args.persona,
            "messages": report.messages,
            "skipped_lines": report.skipped_lines,
            "sessions": report.sessions,
            "saved": !args.dry_run,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Import").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Messages:    {}", style(report.messages).cyan());
    println!("  Sessions:    {}", style(report.sessions).cyan());
    if report.skipped_lines > 0 {
        println!("  Skipped:     {}", style(report.skipped_lines).yellow());
    }
    println!();
    if args.dry_run {
        println!("{}", dim.apply_to("Dry run, nothing saved"));
    } else if ctx.verbose {
        println!(
            "{}",
            dim.apply_to(format!("Saved under {}", ctx.data_dir.display()))
        );
    }
    Ok(())
}
