//! healerd - application healer
//!
//! Runs diagnoses and heal requests against configured targets from the
//! command line. Targets on the local host are driven through the shell
//! executor.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use healer_common::{DiagnosticExecution, HealingExecution, HealingPattern, StepOutcome};
use healerd::config::HealerConfig;
use healerd::engine::Healer;
use healerd::shell::ShellExecutor;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, PatternCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => HealerConfig::load_from(path)?,
        None => HealerConfig::load(),
    };
    info!("healerd v{} starting", env!("CARGO_PKG_VERSION"));

    let remote = Arc::new(ShellExecutor::new(&config.storage.backup_dir));
    let healer = Healer::open(&config, remote)
        .await
        .context("Failed to start healer")?;

    let json = cli.json;
    let actor = cli.actor.as_str();
    match cli.command {
        Commands::Diagnose { target } => {
            let diagnostic = healer.run_diagnosis(&target, actor).await?;
            emit(json, &diagnostic, print_diagnostic)?;
        }
        Commands::Heal { target } => {
            let execution = healer.request_heal(&target, actor).await?;
            emit(json, &execution, print_execution)?;
        }
        Commands::Approve { execution } => {
            let execution = healer.approve(&execution, actor).await?;
            emit(json, &execution, print_execution)?;
        }
        Commands::Reject { execution } => {
            let execution = healer.reject(&execution, actor).await?;
            emit(json, &execution, print_execution)?;
        }
        Commands::Rollback { execution } => {
            let execution = healer.rollback(&execution).await?;
            emit(json, &execution, print_execution)?;
        }
        Commands::History { target, limit } => {
            let executions = healer.list_executions(&target, limit).await?;
            let diagnostics = healer.list_diagnostics(&target, limit).await?;
            if json {
                let history = serde_json::json!({
                    "executions": executions,
                    "diagnostics": diagnostics,
                });
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                for execution in &executions {
                    print_execution_line(execution);
                }
                for diagnostic in &diagnostics {
                    println!(
                        "{}  diagnostic {}  score {:>3}  by {}",
                        diagnostic.created_at.format("%Y-%m-%d %H:%M:%S"),
                        diagnostic.id,
                        diagnostic.health_score,
                        diagnostic.triggered_by
                    );
                }
            }
        }
        Commands::Patterns { action } => match action {
            PatternCommands::List => {
                let patterns = healer.list_patterns().await;
                emit(json, &patterns, |ps| ps.iter().for_each(print_pattern))?;
            }
            PatternCommands::Approve { id } => {
                let pattern = healer.set_pattern_approval(&id, true).await?;
                emit(json, &pattern, print_pattern)?;
            }
            PatternCommands::Revoke { id } => {
                let pattern = healer.set_pattern_approval(&id, false).await?;
                emit(json, &pattern, print_pattern)?;
            }
        },
        Commands::Targets => {
            let targets = healer.targets().await?;
            emit(json, &targets, |ts| {
                for t in ts {
                    println!(
                        "{:<20} {:<12} score {:>3}  mode {:<10} attempts {}/{}  {}",
                        t.id,
                        t.health_status,
                        t.health_score,
                        t.healing_mode,
                        t.current_healing_attempts,
                        t.max_healing_attempts,
                        t.url
                    );
                }
            })?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_diagnostic(diagnostic: &DiagnosticExecution) {
    println!(
        "Target {}: {} (score {})",
        diagnostic.target_id,
        diagnostic.health_status(),
        diagnostic.health_score
    );
    for result in &diagnostic.results {
        println!(
            "  [{:<7}] {:<22} {:<8} {}",
            result.status.as_str(),
            result.name,
            result.severity,
            result.message
        );
    }
}

fn print_execution(execution: &HealingExecution) {
    println!("Execution {} ({})", execution.id, execution.target_id);
    println!("  status: {}", execution.status);
    if let Some(d) = &execution.diagnosis {
        println!(
            "  diagnosis: {} / {} (confidence {:.2}, risk {})",
            d.diagnosis_type, d.error_type, d.confidence, d.risk
        );
        println!("  action: {}", d.suggested_action);
    }
    if let Some(reason) = &execution.failure_reason {
        println!("  failure: {}", reason);
    }
    if let Some(backup) = &execution.backup_id {
        println!("  backup: {}", backup);
    }
    for entry in &execution.execution_logs {
        let marker = match entry.outcome {
            StepOutcome::Success => "ok",
            StepOutcome::Failed => "FAIL",
            StepOutcome::NotAttempted => "skip",
            StepOutcome::Info => "..",
        };
        match (&entry.step, &entry.command) {
            (Some(step), Some(cmd)) => {
                println!("  [{:>4}] step {}: {} - {}", marker, step, cmd, entry.message)
            }
            _ => println!("  [{:>4}] {}", marker, entry.message),
        }
    }
}

fn print_execution_line(execution: &HealingExecution) {
    println!(
        "{}  execution {}  {:<17} {}",
        execution.started_at.format("%Y-%m-%d %H:%M:%S"),
        execution.id,
        execution.status.as_str(),
        execution
            .failure_reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default()
    );
}

fn print_pattern(pattern: &HealingPattern) {
    println!(
        "{:<50} ok {:>3} / fail {:>3}  confidence {:.2}  {}{}",
        pattern.id,
        pattern.success_count,
        pattern.failure_count,
        pattern.confidence,
        if pattern.auto_approved { "auto-approved" } else { "manual" },
        if pattern.approval_pinned { " (pinned)" } else { "" }
    );
}
