//! Inspect command - summarize a persona's persisted state.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use lore_agent::{AgentScheduler, TaskRegistry};
use lore_memory::StoreStats;

use super::Context;

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Persona to inspect
    pub persona: String,
}

#[derive(Debug, Serialize)]
struct SessionCounts {
    archived: usize,
    summarized: usize,
    current_messages: usize,
    total_messages: usize,
}

#[derive(Debug, Serialize)]
struct TaskView {
    id: String,
    last_run: Option<String>,
}

#[derive(Debug, Serialize)]
struct Inspection {
    persona: String,
    memories: StoreStats,
    sessions: SessionCounts,
    tasks: Vec<TaskView>,
}

/// Run the inspect command.
pub async fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let runtime = std::sync::Arc::new(ctx.open_persona(&args.persona)?);

    let sessions = {
        let ledger = runtime.ledger().lock().await;
        SessionCounts {
            archived: ledger.archived().len(),
            summarized: ledger.archived().iter().filter(|s| s.summary.is_some()).count(),
            current_messages: ledger.current().len(),
            total_messages: ledger.message_count(),
        }
    };

    let registry = TaskRegistry::with_builtin();
    let scheduler = AgentScheduler::new(runtime.clone(), ctx.settings.scheduler.clone())
        .with_registry(&registry);
    let tasks = registry
        .ids()
        .map(|id| TaskView {
            id: id.to_string(),
            last_run: scheduler
                .task_config(id)
                .and_then(|c| c.get_datetime("last_run"))
                .map(|t| t.to_rfc3339()),
        })
        .collect();

    let inspection = Inspection {
        persona: args.persona,
        memories: runtime.memory().stats(),
        sessions,
        tasks,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }
    print_inspection(&inspection);
    Ok(())
}

fn print_inspection(inspection: &Inspection) {
    let dim = Style::new().dim();
    let memories = &inspection.memories;

    println!("{}", style(format!("Persona {}", inspection.persona)).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Memories:    {}", style(memories.total).cyan());
    println!("  Unembedded:  {}", style(memories.pending_embeddings).cyan());
    for (policy, count) in &memories.by_policy {
        println!("    {:<18} {}", dim.apply_to(policy), count);
    }
    for (category, count) in &memories.by_category {
        println!("    {:<18} {}", dim.apply_to(category), count);
    }
    println!();

    let sessions = &inspection.sessions;
    println!("{}", style("Sessions").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Archived:    {}", style(sessions.archived).cyan());
    println!("  Summarized:  {}", style(sessions.summarized).cyan());
    println!("  Current:     {} messages", style(sessions.current_messages).cyan());
    println!("  Total:       {} messages", style(sessions.total_messages).cyan());
    println!();

    println!("{}", style("Agent Tasks").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    for task in &inspection.tasks {
        match &task.last_run {
            Some(at) => println!("  {:<18} last run {}", task.id, at),
            None => println!("  {:<18} {}", task.id, dim.apply_to("never run")),
        }
    }
}
