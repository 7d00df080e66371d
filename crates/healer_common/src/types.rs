//! Domain model for the application healer.
//!
//! Targets, check results, diagnoses and healing executions. Everything here
//! is plain data with serde support so records can be persisted as JSON and
//! handed to an API layer unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Target
// ============================================================================

/// Current health of a monitored application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Maintenance,
    Healing,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Down => "DOWN",
            HealthStatus::Maintenance => "MAINTENANCE",
            HealthStatus::Healing => "HEALING",
            HealthStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity grading of a detected issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Health score points lost when a check of this severity fails
    pub fn penalty(&self) -> f64 {
        match self {
            RiskLevel::Low => 5.0,
            RiskLevel::Medium => 10.0,
            RiskLevel::High => 20.0,
            RiskLevel::Critical => 40.0,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much risk the healer may remediate without a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingMode {
    /// Every remediation waits for approval
    Manual,
    /// LOW risk issues heal automatically
    SemiAuto,
    /// LOW and MEDIUM risk issues heal automatically
    FullAuto,
}

impl HealingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealingMode::Manual => "manual",
            HealingMode::SemiAuto => "semi_auto",
            HealingMode::FullAuto => "full_auto",
        }
    }

    /// Can an issue of this risk be healed without approval in this mode?
    pub fn auto_heals(&self, risk: RiskLevel) -> bool {
        match self {
            HealingMode::Manual => false,
            HealingMode::SemiAuto => risk == RiskLevel::Low,
            HealingMode::FullAuto => matches!(risk, RiskLevel::Low | RiskLevel::Medium),
        }
    }
}

impl Default for HealingMode {
    fn default() -> Self {
        HealingMode::Manual
    }
}

impl fmt::Display for HealingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored application instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,

    /// Public URL, substituted into `{url}` in check templates
    pub url: String,

    /// Application root on the host, substituted into `{root}`
    pub root_path: String,

    pub health_status: HealthStatus,

    /// 0-100
    pub health_score: u8,

    pub healing_mode: HealingMode,

    pub is_healer_enabled: bool,

    pub max_healing_attempts: u32,

    /// Seconds after the last attempt before the attempt counter resets
    pub healing_cooldown_secs: u64,

    pub current_healing_attempts: u32,

    pub last_healing_attempt_at: Option<DateTime<Utc>>,

    pub last_health_check: Option<DateTime<Utc>>,
}

impl Target {
    pub fn new(id: impl Into<String>, url: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            root_path: root_path.into(),
            health_status: HealthStatus::Unknown,
            health_score: 0,
            healing_mode: HealingMode::Manual,
            is_healer_enabled: true,
            max_healing_attempts: 3,
            healing_cooldown_secs: 3600,
            current_healing_attempts: 0,
            last_healing_attempt_at: None,
            last_health_check: None,
        }
    }

    pub fn with_mode(mut self, mode: HealingMode) -> Self {
        self.healing_mode = mode;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_healing_attempts = max;
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.healing_cooldown_secs = secs;
        self
    }

    /// Seconds left in the cooldown window, if the last attempt is still inside it
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        let last = self.last_healing_attempt_at?;
        let elapsed = now.signed_duration_since(last).num_seconds().max(0) as u64;
        if elapsed < self.healing_cooldown_secs {
            Some(self.healing_cooldown_secs - elapsed)
        } else {
            None
        }
    }

    /// Reset the attempt counter once the cooldown has elapsed.
    /// Returns true if the counter was reset.
    pub fn expire_cooldown(&mut self, now: DateTime<Utc>) -> bool {
        if self.current_healing_attempts > 0 && self.cooldown_remaining(now).is_none() {
            self.current_healing_attempts = 0;
            return true;
        }
        false
    }

    /// Attempts exhausted and the cooldown has not elapsed yet
    pub fn attempts_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.current_healing_attempts >= self.max_healing_attempts
            && self.cooldown_remaining(now).is_some()
    }
}

// ============================================================================
// Checks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckCategory {
    System,
    Security,
    Performance,
    Availability,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    /// Transport failure or timeout. Carries no diagnostic evidence.
    Error,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Error => "ERROR",
            CheckStatus::Skipped => "SKIPPED",
        }
    }

    /// Multiplier applied to the severity penalty when scoring
    fn penalty_factor(&self) -> f64 {
        match self {
            CheckStatus::Pass | CheckStatus::Skipped => 0.0,
            CheckStatus::Warn | CheckStatus::Error => 0.5,
            CheckStatus::Fail => 1.0,
        }
    }
}

/// One diagnostic finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub category: CheckCategory,
    pub status: CheckStatus,
    pub severity: RiskLevel,
    pub message: String,
    pub details: serde_json::Value,
    pub execution_ms: u64,
}

impl CheckResult {
    pub fn new(
        name: impl Into<String>,
        category: CheckCategory,
        severity: RiskLevel,
        status: CheckStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            status,
            severity,
            message: message.into(),
            details: serde_json::Value::Null,
            execution_ms: 0,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_duration(mut self, execution_ms: u64) -> Self {
        self.execution_ms = execution_ms;
        self
    }

    /// WARN, FAIL or ERROR
    pub fn is_issue(&self) -> bool {
        matches!(
            self.status,
            CheckStatus::Warn | CheckStatus::Fail | CheckStatus::Error
        )
    }

    /// Output excerpt captured by the check runner, if any
    pub fn output(&self) -> Option<&str> {
        self.details.get("output").and_then(|v| v.as_str())
    }
}

/// Weighted health score over a set of results, clamped to 0-100
pub fn compute_health_score(results: &[CheckResult]) -> u8 {
    let lost: f64 = results
        .iter()
        .map(|r| r.severity.penalty() * r.status.penalty_factor())
        .sum();
    (100.0 - lost).clamp(0.0, 100.0).round() as u8
}

/// Map a score and its results to a target status
pub fn derive_health_status(score: u8, results: &[CheckResult]) -> HealthStatus {
    if results.is_empty() {
        return HealthStatus::Unknown;
    }
    let critical_down = results
        .iter()
        .any(|r| r.status == CheckStatus::Fail && r.severity == RiskLevel::Critical);
    if critical_down || score < 50 {
        HealthStatus::Down
    } else if score < 80 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Outcome of one check runner pass. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticExecution {
    pub id: String,
    pub target_id: String,
    pub results: Vec<CheckResult>,
    pub health_score: u8,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

impl DiagnosticExecution {
    pub fn new(
        target_id: impl Into<String>,
        results: Vec<CheckResult>,
        triggered_by: impl Into<String>,
    ) -> Self {
        let health_score = compute_health_score(&results);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            results,
            health_score,
            triggered_by: triggered_by.into(),
            created_at: Utc::now(),
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        derive_health_status(self.health_score, &self.results)
    }

    /// True when every check passed or was skipped (and at least one ran)
    pub fn all_passing(&self) -> bool {
        self.results.iter().any(|r| r.status == CheckStatus::Pass)
            && self
                .results
                .iter()
                .all(|r| matches!(r.status, CheckStatus::Pass | CheckStatus::Skipped))
    }

    pub fn issue_count(&self) -> u32 {
        self.results.iter().filter(|r| r.is_issue()).count() as u32
    }

    pub fn failed(&self, check: &str) -> bool {
        self.results
            .iter()
            .any(|r| r.name == check && r.status == CheckStatus::Fail)
    }
}

// ============================================================================
// Diagnosis
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosisType {
    Healthy,
    /// White screen of death
    Wsod,
    DbError,
    SyntaxError,
    MemoryExhaustion,
    Permission,
    Maintenance,
    Unknown,
}

impl DiagnosisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisType::Healthy => "HEALTHY",
            DiagnosisType::Wsod => "WSOD",
            DiagnosisType::DbError => "DB_ERROR",
            DiagnosisType::SyntaxError => "SYNTAX_ERROR",
            DiagnosisType::MemoryExhaustion => "MEMORY_EXHAUSTION",
            DiagnosisType::Permission => "PERMISSION",
            DiagnosisType::Maintenance => "MAINTENANCE",
            DiagnosisType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DiagnosisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output for one diagnostic execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub diagnosis_type: DiagnosisType,

    /// 0.0 - 1.0
    pub confidence: f64,

    pub error_type: String,

    /// Offending plugin, module or file when identifiable
    pub culprit: Option<String>,

    /// Ordered remediation
    pub suggested_commands: Vec<String>,

    pub suggested_action: String,

    pub risk: RiskLevel,

    /// False when the remediation does not change target state (no backup needed)
    pub mutating: bool,

    /// Rule that produced this diagnosis, if any
    pub rule_id: Option<String>,
}

impl Diagnosis {
    pub fn healthy() -> Self {
        Self {
            diagnosis_type: DiagnosisType::Healthy,
            confidence: 1.0,
            error_type: "none".to_string(),
            culprit: None,
            suggested_commands: Vec::new(),
            suggested_action: "No action needed".to_string(),
            risk: RiskLevel::Low,
            mutating: false,
            rule_id: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            diagnosis_type: DiagnosisType::Unknown,
            confidence: 0.0,
            error_type: "unknown".to_string(),
            culprit: None,
            suggested_commands: Vec::new(),
            suggested_action: "No known remediation; manual investigation required".to_string(),
            risk: RiskLevel::High,
            mutating: true,
            rule_id: None,
        }
    }

    /// Has a remediation that could be executed
    pub fn is_actionable(&self) -> bool {
        !matches!(
            self.diagnosis_type,
            DiagnosisType::Healthy | DiagnosisType::Unknown
        ) && !self.suggested_commands.is_empty()
    }
}

// ============================================================================
// Healing Execution
// ============================================================================

/// Lifecycle of one remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingStatus {
    Pending,
    Diagnosing,
    /// Terminal: nothing to heal
    Healthy,
    AwaitingApproval,
    Healing,
    Success,
    Failed,
    RolledBack,
}

impl HealingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealingStatus::Pending => "PENDING",
            HealingStatus::Diagnosing => "DIAGNOSING",
            HealingStatus::Healthy => "HEALTHY",
            HealingStatus::AwaitingApproval => "AWAITING_APPROVAL",
            HealingStatus::Healing => "HEALING",
            HealingStatus::Success => "SUCCESS",
            HealingStatus::Failed => "FAILED",
            HealingStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => HealingStatus::Pending,
            "DIAGNOSING" => HealingStatus::Diagnosing,
            "HEALTHY" => HealingStatus::Healthy,
            "AWAITING_APPROVAL" => HealingStatus::AwaitingApproval,
            "HEALING" => HealingStatus::Healing,
            "SUCCESS" => HealingStatus::Success,
            "FAILED" => HealingStatus::Failed,
            "ROLLED_BACK" => HealingStatus::RolledBack,
            _ => return None,
        })
    }

    /// No further automatic progress. FAILED still admits an explicit rollback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HealingStatus::Healthy
                | HealingStatus::Success
                | HealingStatus::Failed
                | HealingStatus::RolledBack
        )
    }

    pub fn can_transition_to(&self, next: HealingStatus) -> bool {
        use HealingStatus::*;
        matches!(
            (self, next),
            (Pending, Diagnosing)
                | (Diagnosing, Healthy)
                | (Diagnosing, AwaitingApproval)
                | (Diagnosing, Healing)
                | (Diagnosing, Failed)
                | (AwaitingApproval, Healing)
                | (AwaitingApproval, Failed)
                | (Healing, Success)
                | (Healing, Failed)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for HealingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason a healing execution ended in FAILED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    CommandRejected { command: String, reason: String },
    BackupFailed { error: String },
    RemediationStepFailed { step: usize, command: String, error: String },
    NoImprovement { before: u8, after: u8 },
    NoRemediation,
    ApprovalRejected { by: String },
    /// Daemon stopped while the execution was in flight
    Interrupted { status: HealingStatus },
    /// Storage or bookkeeping error while remediation was under way
    Internal { error: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::CommandRejected { command, reason } => {
                write!(f, "command rejected ({}): {}", reason, command)
            }
            FailureReason::BackupFailed { error } => write!(f, "backup failed: {}", error),
            FailureReason::RemediationStepFailed { step, command, error } => {
                write!(f, "step {} failed ({}): {}", step, command, error)
            }
            FailureReason::NoImprovement { before, after } => {
                write!(f, "health score did not improve ({} -> {})", before, after)
            }
            FailureReason::NoRemediation => f.write_str("no remediation available"),
            FailureReason::ApprovalRejected { by } => write!(f, "rejected by {}", by),
            FailureReason::Interrupted { status } => write!(f, "interrupted while {}", status),
            FailureReason::Internal { error } => write!(f, "internal error: {}", error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Transition,
    Diagnose,
    Validate,
    Backup,
    Command,
    Verify,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Info,
    Success,
    Failed,
    NotAttempted,
}

/// One record in the append-only execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    pub kind: StepKind,
    pub outcome: StepOutcome,

    /// 1-based remediation step number for `Command` entries
    pub step: Option<usize>,

    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub message: String,
}

impl ExecutionLogEntry {
    pub fn new(kind: StepKind, outcome: StepOutcome, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            outcome,
            step: None,
            command: None,
            exit_code: None,
            duration_ms: None,
            message: message.into(),
        }
    }

    pub fn command(step: usize, command: &str, outcome: StepOutcome, message: impl Into<String>) -> Self {
        let mut entry = Self::new(StepKind::Command, outcome, message);
        entry.step = Some(step);
        entry.command = Some(command.to_string());
        entry
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// One remediation attempt for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingExecution {
    pub id: String,
    pub target_id: String,
    pub status: HealingStatus,
    pub healing_mode: HealingMode,
    pub diagnosis: Option<Diagnosis>,
    pub diagnostic_execution_id: Option<String>,
    pub auto_healed_count: u32,
    pub needs_approval_count: u32,
    pub cannot_heal_count: u32,
    pub backup_id: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub health_before: Option<u8>,
    pub health_after: Option<u8>,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub execution_logs: Vec<ExecutionLogEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl HealingExecution {
    pub fn new(target: &Target, requested_by: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: target.id.clone(),
            status: HealingStatus::Pending,
            healing_mode: target.healing_mode,
            diagnosis: None,
            diagnostic_execution_id: None,
            auto_healed_count: 0,
            needs_approval_count: 0,
            cannot_heal_count: 0,
            backup_id: None,
            failure_reason: None,
            health_before: None,
            health_after: None,
            requested_by: requested_by.into(),
            approved_by: None,
            execution_logs: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn log(&mut self, entry: ExecutionLogEntry) {
        self.execution_logs.push(entry);
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Entries for remediation commands, in execution order
    pub fn command_steps(&self) -> impl Iterator<Item = &ExecutionLogEntry> {
        self.execution_logs
            .iter()
            .filter(|e| e.kind == StepKind::Command)
    }
}
