//! CLI - Command-line argument parsing
//!
//! Defines the `healerd` command structure using clap. Execution lives in
//! main.rs.

use clap::{Parser, Subcommand};
use healerd::engine::DEFAULT_HISTORY_LIMIT;
use std::path::PathBuf;

/// Application healer: diagnose, heal and learn
#[derive(Parser, Debug)]
#[command(name = "healerd")]
#[command(about = "Application healer - diagnosis, risk-graded healing and pattern learning", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: /etc/healer/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Name recorded as requester/approver
    #[arg(long, global = true, default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the check catalog against a target
    Diagnose { target: String },

    /// Diagnose a target and heal it (or queue it for approval)
    Heal { target: String },

    /// Approve a healing execution waiting for approval
    Approve { execution: String },

    /// Reject a healing execution waiting for approval
    Reject { execution: String },

    /// Restore the backup of a failed healing execution
    Rollback { execution: String },

    /// Recent healing executions and diagnostics for a target
    History {
        target: String,

        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },

    /// Inspect and manage learned healing patterns
    Patterns {
        #[command(subcommand)]
        action: PatternCommands,
    },

    /// List registered targets
    Targets,
}

#[derive(Subcommand, Debug)]
pub enum PatternCommands {
    List,

    /// Pin a pattern as auto-approved
    Approve { id: String },

    /// Pin a pattern as not auto-approved
    Revoke { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heal_with_globals() {
        let cli = Cli::try_parse_from(["healerd", "heal", "blog", "--json", "--actor", "ops"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.actor, "ops");
        assert!(matches!(cli.command, Commands::Heal { ref target } if target == "blog"));
    }

    #[test]
    fn test_parse_pattern_revoke() {
        let cli =
            Cli::try_parse_from(["healerd", "patterns", "revoke", "WSOD|fatal_error|*"]).unwrap();
        match cli.command {
            Commands::Patterns {
                action: PatternCommands::Revoke { id },
            } => assert_eq!(id, "WSOD|fatal_error|*"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_history_default_limit() {
        let cli = Cli::try_parse_from(["healerd", "history", "blog"]).unwrap();
        assert!(matches!(cli.command, Commands::History { limit, .. } if limit == DEFAULT_HISTORY_LIMIT));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["healerd"]).is_err());
    }
}
