//! Error types for the healer.

use crate::types::{FailureReason, HealingStatus};
use thiserror::Error;

pub type HealerResult<T> = Result<T, HealerError>;

#[derive(Error, Debug)]
pub enum HealerError {
    #[error("Command rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("Check error: {0}")]
    CheckError(String),

    #[error("Backup failed: {0}")]
    BackupFailed(String),

    #[error("Remediation step {step} failed ({command}): {error}")]
    RemediationStepFailed {
        step: usize,
        command: String,
        error: String,
    },

    #[error("Healing already in progress for target {target_id} (execution {execution_id})")]
    HealingInProgress {
        target_id: String,
        execution_id: String,
    },

    #[error("Healing cooldown active for target {target_id} ({remaining_secs}s remaining)")]
    CooldownActive {
        target_id: String,
        remaining_secs: u64,
    },

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Healing execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Healing pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Healer is disabled for target {0}")]
    HealerDisabled(String),

    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition {
        from: HealingStatus,
        to: HealingStatus,
    },

    #[error("Execution {0} has no backup to restore")]
    NoBackup(String),

    #[error("Invalid diagnosis rule {rule}: {error}")]
    InvalidRule { rule: String, error: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HealerError {
    /// Stable identifier for API layers
    pub fn code(&self) -> &'static str {
        match self {
            HealerError::CommandRejected { .. } => "command_rejected",
            HealerError::CheckError(_) => "check_error",
            HealerError::BackupFailed(_) => "backup_failed",
            HealerError::RemediationStepFailed { .. } => "remediation_step_failed",
            HealerError::HealingInProgress { .. } => "healing_in_progress",
            HealerError::CooldownActive { .. } => "cooldown_active",
            HealerError::TargetNotFound(_) => "target_not_found",
            HealerError::ExecutionNotFound(_) => "execution_not_found",
            HealerError::PatternNotFound(_) => "pattern_not_found",
            HealerError::HealerDisabled(_) => "healer_disabled",
            HealerError::InvalidTransition { .. } => "invalid_transition",
            HealerError::NoBackup(_) => "no_backup",
            HealerError::InvalidRule { .. } => "invalid_rule",
            HealerError::Database(_) => "database",
            HealerError::Json(_) => "json",
            HealerError::Internal(_) => "internal",
        }
    }
    /// The reason recorded on an execution that ends because of this error.
    /// Anything that is not a remediation outcome is an internal failure.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            HealerError::CommandRejected { command, reason } => FailureReason::CommandRejected {
                command: command.clone(),
                reason: reason.clone(),
            },
            HealerError::BackupFailed(error) => FailureReason::BackupFailed {
                error: error.clone(),
            },
            HealerError::RemediationStepFailed {
                step,
                command,
                error,
            } => FailureReason::RemediationStepFailed {
                step: *step,
                command: command.clone(),
                error: error.clone(),
            },
            other => FailureReason::Internal {
                error: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_keeps_its_detail() {
        let err = HealerError::RemediationStepFailed {
            step: 2,
            command: "wp cache flush".into(),
            error: "exit 1: Error".into(),
        };
        assert_eq!(err.code(), "remediation_step_failed");
        assert_eq!(
            err.failure_reason(),
            FailureReason::RemediationStepFailed {
                step: 2,
                command: "wp cache flush".into(),
                error: "exit 1: Error".into(),
            }
        );
        assert_eq!(err.to_string(), "Remediation step 2 failed (wp cache flush): exit 1: Error");
    }

    #[test]
    fn test_storage_errors_become_internal() {
        let err = HealerError::Database(rusqlite::Error::InvalidQuery);
        match err.failure_reason() {
            FailureReason::Internal { error } => assert!(error.starts_with("Database error:")),
            other => panic!("expected Internal, got {:?}", other),
        }
        assert_eq!(
            HealerError::BackupFailed("disk full".into()).failure_reason(),
            FailureReason::BackupFailed {
                error: "disk full".into()
            }
        );
    }
}
