//! Learned healing patterns.
//!
//! A pattern ties a diagnosis signature (type, error type, culprit) to the
//! remediation last used for it, together with success/failure statistics.
//! Auto-approval is earned: a signature needs enough successful runs and a
//! high enough success ratio before the healer may run it unattended.

use crate::types::{Diagnosis, DiagnosisType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum successful runs before a pattern can be auto-approved
pub const MIN_SUCCESSES_FOR_APPROVAL: u32 = 3;

/// Minimum observed success ratio for auto-approval
pub const MIN_CONFIDENCE_FOR_APPROVAL: f64 = 0.9;

/// (diagnosis type, error type, culprit)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSignature {
    pub diagnosis_type: DiagnosisType,
    pub error_type: String,
    pub culprit: Option<String>,
}

impl PatternSignature {
    pub fn new(
        diagnosis_type: DiagnosisType,
        error_type: impl Into<String>,
        culprit: Option<String>,
    ) -> Self {
        Self {
            diagnosis_type,
            error_type: error_type.into(),
            culprit,
        }
    }

    pub fn from_diagnosis(diagnosis: &Diagnosis) -> Self {
        Self::new(
            diagnosis.diagnosis_type,
            diagnosis.error_type.clone(),
            diagnosis.culprit.clone(),
        )
    }

    /// Stable storage key, e.g. `WSOD|plugin_fatal_error|hello-dolly`
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.diagnosis_type.as_str(),
            self.error_type,
            self.culprit.as_deref().unwrap_or("*")
        )
    }
}

impl fmt::Display for PatternSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Thresholds that gate auto-approval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub min_successes: u32,
    pub min_confidence: f64,

    /// Revoke on any failure instead of waiting for confidence to drop
    pub revoke_on_failure: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            min_successes: MIN_SUCCESSES_FOR_APPROVAL,
            min_confidence: MIN_CONFIDENCE_FOR_APPROVAL,
            revoke_on_failure: false,
        }
    }
}

/// Learned (signature -> remediation) association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingPattern {
    /// Same as the signature key
    pub id: String,
    pub signature: PatternSignature,
    pub commands: Vec<String>,
    pub success_count: u32,
    pub failure_count: u32,
    pub confidence: f64,
    pub auto_approved: bool,

    /// Approval flag set by an operator; outcomes no longer flip it
    pub approval_pinned: bool,

    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl HealingPattern {
    pub fn new(signature: PatternSignature, commands: Vec<String>) -> Self {
        Self {
            id: signature.key(),
            signature,
            commands,
            success_count: 0,
            failure_count: 0,
            confidence: 0.0,
            auto_approved: false,
            approval_pinned: false,
            created_at: Utc::now(),
            last_used_at: None,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    pub fn total_runs(&self) -> u32 {
        self.success_count + self.failure_count
    }

    /// success / (success + failure), 0 when never run
    pub fn compute_confidence(success: u32, failure: u32) -> f64 {
        let total = success + failure;
        if total == 0 {
            0.0
        } else {
            success as f64 / total as f64
        }
    }

    /// Apply one healing outcome. Counts, confidence and the approval gate
    /// are updated together so the record is never observed half-updated.
    pub fn record(&mut self, commands: &[String], success: bool, policy: &ApprovalPolicy) {
        let now = Utc::now();
        self.last_used_at = Some(now);
        if !commands.is_empty() {
            self.commands = commands.to_vec();
        }

        if success {
            self.success_count += 1;
            self.last_success_at = Some(now);
        } else {
            self.failure_count += 1;
            self.last_failure_at = Some(now);
        }
        self.confidence = Self::compute_confidence(self.success_count, self.failure_count);

        if self.approval_pinned {
            return;
        }

        if !success && policy.revoke_on_failure {
            self.auto_approved = false;
        } else if self.auto_approved {
            // Graceful degradation: only a real drop in reliability revokes
            self.auto_approved = self.confidence >= policy.min_confidence;
        } else {
            self.auto_approved = self.meets(policy);
        }
    }

    pub fn meets(&self, policy: &ApprovalPolicy) -> bool {
        self.success_count >= policy.min_successes && self.confidence >= policy.min_confidence
    }

    /// Operator override
    pub fn pin_approval(&mut self, approved: bool) {
        self.auto_approved = approved;
        self.approval_pinned = true;
    }
}
