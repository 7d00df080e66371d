//! Healing Executor
//!
//! Drives one healing execution through
//! PENDING -> DIAGNOSING -> (HEALTHY | AWAITING_APPROVAL | HEALING) ->
//! SUCCESS | FAILED -> ROLLED_BACK.
//!
//! Every transition goes through the execution arena, is written to the
//! execution's own log and is persisted. Nothing reaches HEALING without a
//! backup unless the remediation is non-mutating, and remediation commands
//! run strictly in order with the first failure stopping the run.

use chrono::Utc;
use healer_common::{
    validate_all, Diagnosis, DiagnosisType, DiagnosticExecution, ExecutionLogEntry,
    FailureReason, HealerError, HealerResult, HealingExecution, HealingPattern, HealingStatus,
    HealthStatus, PatternSignature, StepKind, StepOutcome, Target, ValidatedCommand,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::arena::ExecutionArena;
use crate::checks::{catalog_with, CheckDefinition, CheckRunner};
use crate::config::{HealerConfig, HealingConfig};
use crate::db::HealerDb;
use crate::diagnosis::{apply_pattern_boost, DiagnosisClassifier, RawSignals};
use crate::patterns::PatternStore;
use crate::remote::RemoteExecutor;

pub struct HealingExecutor {
    db: HealerDb,
    remote: Arc<dyn RemoteExecutor>,
    runner: CheckRunner,
    classifier: DiagnosisClassifier,
    patterns: Arc<PatternStore>,
    arena: ExecutionArena,
    checks: Vec<CheckDefinition>,
    config: HealingConfig,
    confidence_boost: f64,

    /// Serialises read-modify-write of target records
    target_writes: Mutex<()>,
}

impl HealingExecutor {
    pub fn new(
        db: HealerDb,
        remote: Arc<dyn RemoteExecutor>,
        patterns: Arc<PatternStore>,
        config: &HealerConfig,
    ) -> HealerResult<Self> {
        Ok(Self {
            db,
            runner: CheckRunner::new(Arc::clone(&remote), &config.checks),
            remote,
            classifier: DiagnosisClassifier::builtin()?,
            patterns,
            arena: ExecutionArena::new(),
            checks: catalog_with(&config.checks.custom),
            config: config.healing.clone(),
            confidence_boost: config.learning.confidence_boost,
            target_writes: Mutex::new(()),
        })
    }

    /// Replace the diagnosis rule table
    pub fn with_classifier(mut self, classifier: DiagnosisClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the check catalog
    pub fn with_checks(mut self, checks: Vec<CheckDefinition>) -> Self {
        self.checks = checks;
        self
    }

    pub fn arena(&self) -> &ExecutionArena {
        &self.arena
    }

    /// Rebuild the arena from persisted executions after a restart.
    /// Executions parked for approval keep their slot; anything caught
    /// mid-flight, or parked behind another execution of the same target,
    /// is closed as FAILED. Returns the number of executions seen.
    pub async fn resume(&self) -> HealerResult<usize> {
        let active = self.db.active_executions().await?;
        for mut execution in active.iter().cloned() {
            let status = execution.status;
            let note = if status == HealingStatus::AwaitingApproval {
                match self
                    .arena
                    .try_claim(&execution.target_id, &execution.id, status)
                {
                    Ok(()) => {
                        self.arena.park(&execution.target_id, &execution.id);
                        info!(execution_id = %execution.id, "Resumed execution awaiting approval");
                        continue;
                    }
                    Err(e) => format!("{} -> FAILED: superseded on restart: {}", status, e),
                }
            } else {
                format!("{} -> FAILED: interrupted by daemon restart", status)
            };

            warn!(execution_id = %execution.id, "Execution interrupted while {}", status);
            execution.log(ExecutionLogEntry::new(
                StepKind::Transition,
                StepOutcome::Failed,
                note,
            ));
            execution.status = HealingStatus::Failed;
            execution.failure_reason = Some(FailureReason::Interrupted { status });
            execution.finished_at = Some(Utc::now());
            self.db.save_execution(&execution).await?;
        }
        Ok(active.len())
    }

    // ========================================================================
    // Targets
    // ========================================================================

    pub async fn load_target(&self, target_id: &str) -> HealerResult<Target> {
        self.db
            .get_target(target_id)
            .await?
            .ok_or_else(|| HealerError::TargetNotFound(target_id.to_string()))
    }

    /// Insert a target, or refresh the settings of a known one while keeping
    /// its health and attempt counters
    pub async fn register_target(&self, target: &Target) -> HealerResult<Target> {
        let _guard = self.target_writes.lock().await;
        let merged = match self.db.get_target(&target.id).await? {
            Some(mut existing) => {
                existing.url = target.url.clone();
                existing.root_path = target.root_path.clone();
                existing.healing_mode = target.healing_mode;
                existing.is_healer_enabled = target.is_healer_enabled;
                existing.max_healing_attempts = target.max_healing_attempts;
                existing.healing_cooldown_secs = target.healing_cooldown_secs;
                existing
            }
            None => target.clone(),
        };
        self.db.upsert_target(&merged).await?;
        Ok(merged)
    }

    async fn update_target<F>(&self, target_id: &str, f: F) -> HealerResult<Target>
    where
        F: FnOnce(&mut Target),
    {
        let _guard = self.target_writes.lock().await;
        let mut target = self.load_target(target_id).await?;
        f(&mut target);
        self.db.upsert_target(&target).await?;
        Ok(target)
    }

    // ========================================================================
    // Diagnosis
    // ========================================================================

    /// Run the check catalog, persist the result and refresh target health
    pub async fn run_diagnosis(
        &self,
        target_id: &str,
        triggered_by: &str,
    ) -> HealerResult<DiagnosticExecution> {
        let target = self.load_target(target_id).await?;
        self.diagnose(&target, triggered_by).await
    }

    async fn diagnose(
        &self,
        target: &Target,
        triggered_by: &str,
    ) -> HealerResult<DiagnosticExecution> {
        let diagnostic = self
            .runner
            .run_checks(target, &self.checks, triggered_by)
            .await;
        self.db.insert_diagnostic(&diagnostic).await?;

        let healing = self
            .arena
            .active(&target.id)
            .is_some_and(|slot| slot.status == HealingStatus::Healing);
        let score = diagnostic.health_score;
        let status = diagnostic.health_status();
        let checked_at = diagnostic.created_at;
        self.update_target(&target.id, move |t| {
            t.health_score = score;
            t.last_health_check = Some(checked_at);
            if !healing {
                t.health_status = status;
            }
        })
        .await?;
        Ok(diagnostic)
    }

    fn classify(&self, target: &Target, diagnostic: &DiagnosticExecution) -> Diagnosis {
        let signals = RawSignals::default().with_execution(diagnostic);
        self.classifier.classify(target, diagnostic, &signals)
    }

    // ========================================================================
    // Heal request
    // ========================================================================

    /// Diagnose a target and heal it, park it for approval, or close it.
    ///
    /// Fails with `HealingInProgress` if the target already has an active
    /// execution. A healthy target yields a terminal HEALTHY execution that
    /// is not persisted.
    pub async fn request_heal(
        &self,
        target_id: &str,
        requested_by: &str,
    ) -> HealerResult<HealingExecution> {
        let target = self.load_target(target_id).await?;
        if !target.is_healer_enabled {
            return Err(HealerError::HealerDisabled(target.id));
        }

        let mut execution = HealingExecution::new(&target, requested_by);
        self.arena
            .try_claim(&target.id, &execution.id, HealingStatus::Pending)?;
        info!(
            target_id = %target.id,
            execution_id = %execution.id,
            "Heal requested by {}", requested_by
        );

        match self.drive(target, &mut execution).await {
            Ok(()) => Ok(execution),
            Err(e) => {
                error!(execution_id = %execution.id, "Healing aborted: {}", e);
                self.arena.release(&execution.target_id, &execution.id);
                Err(e)
            }
        }
    }

    async fn drive(&self, target: Target, execution: &mut HealingExecution) -> HealerResult<()> {
        self.transition(execution, HealingStatus::Diagnosing, "running checks")?;

        let diagnostic = self
            .diagnose(&target, &format!("heal:{}", execution.requested_by))
            .await?;
        execution.diagnostic_execution_id = Some(diagnostic.id.clone());
        execution.health_before = Some(diagnostic.health_score);

        let mut diagnosis = self.classify(&target, &diagnostic);
        let signature = PatternSignature::from_diagnosis(&diagnosis);
        let pattern = self.patterns.lookup(&signature).await;
        let boosted = apply_pattern_boost(&mut diagnosis, pattern.as_ref(), self.confidence_boost);
        execution.log(ExecutionLogEntry::new(
            StepKind::Diagnose,
            StepOutcome::Info,
            format!(
                "score {}, {} issue(s); diagnosis {} ({}) confidence {:.2}{}",
                diagnostic.health_score,
                diagnostic.issue_count(),
                diagnosis.diagnosis_type,
                diagnosis.error_type,
                diagnosis.confidence,
                if boosted { " (pattern boost)" } else { "" }
            ),
        ));
        execution.diagnosis = Some(diagnosis.clone());

        if diagnosis.diagnosis_type == DiagnosisType::Healthy {
            self.transition(execution, HealingStatus::Healthy, "all checks passing")?;
            execution.finished_at = Some(Utc::now());
            return Ok(());
        }

        let issues = diagnostic.issue_count();
        if !diagnosis.is_actionable() {
            execution.cannot_heal_count = issues;
            return self
                .fail(execution, FailureReason::NoRemediation, "no remediation available")
                .await;
        }

        let commands = match self.validate_remediation(execution, &diagnosis) {
            Some(commands) => commands,
            None => return self.finish(execution).await,
        };

        let now = Utc::now();
        let mut target = target;
        if target.expire_cooldown(now) {
            info!(target_id = %target.id, "Healing cooldown elapsed, attempt counter reset");
            target = self
                .update_target(&target.id, |t| {
                    t.expire_cooldown(now);
                })
                .await?;
        }

        let reasons = approval_reasons(&target, &diagnosis, pattern.as_ref(), now);
        if !reasons.is_empty() {
            execution.needs_approval_count = issues;
            for reason in &reasons {
                execution.log(ExecutionLogEntry::new(
                    StepKind::Validate,
                    StepOutcome::Info,
                    format!("approval required: {}", reason),
                ));
            }
            self.transition(execution, HealingStatus::AwaitingApproval, &reasons.join("; "))?;
            self.db.save_execution(execution).await?;
            self.arena.park(&execution.target_id, &execution.id);
            return Ok(());
        }

        self.heal(target, execution, &diagnosis, commands, issues).await
    }

    /// Validate every proposed command. On rejection the execution is moved
    /// to FAILED (not yet persisted) and `None` is returned.
    fn validate_remediation(
        &self,
        execution: &mut HealingExecution,
        diagnosis: &Diagnosis,
    ) -> Option<Vec<ValidatedCommand>> {
        match validate_all(&diagnosis.suggested_commands) {
            Ok(commands) => {
                execution.log(ExecutionLogEntry::new(
                    StepKind::Validate,
                    StepOutcome::Success,
                    format!("{} remediation command(s) passed validation", commands.len()),
                ));
                Some(commands)
            }
            Err(HealerError::CommandRejected { command, reason }) => {
                warn!(execution_id = %execution.id, "Remediation rejected: {} ({})", command, reason);
                execution.log(
                    ExecutionLogEntry::new(StepKind::Validate, StepOutcome::Failed, reason.clone())
                        .with_command(&command),
                );
                self.close_failed(execution, FailureReason::CommandRejected { command, reason });
                None
            }
            Err(e) => {
                self.close_failed(
                    execution,
                    FailureReason::CommandRejected {
                        command: String::new(),
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }

    // ========================================================================
    // Healing
    // ========================================================================

    async fn heal(
        &self,
        target: Target,
        execution: &mut HealingExecution,
        diagnosis: &Diagnosis,
        commands: Vec<ValidatedCommand>,
        issues: u32,
    ) -> HealerResult<()> {
        if diagnosis.mutating {
            match self.remote.take_backup(&target).await {
                Ok(backup_id) => {
                    execution.log(ExecutionLogEntry::new(
                        StepKind::Backup,
                        StepOutcome::Success,
                        format!("backup {} taken", backup_id),
                    ));
                    execution.backup_id = Some(backup_id);
                }
                Err(e) => {
                    let failed = HealerError::BackupFailed(e.to_string());
                    execution.log(ExecutionLogEntry::new(
                        StepKind::Backup,
                        StepOutcome::Failed,
                        e.to_string(),
                    ));
                    return self
                        .fail(execution, failed.failure_reason(), "backup failed")
                        .await;
                }
            }
        } else {
            execution.log(ExecutionLogEntry::new(
                StepKind::Backup,
                StepOutcome::Info,
                "remediation is non-mutating; no backup needed",
            ));
        }

        if !may_enter_healing(execution, diagnosis) {
            return self
                .fail(
                    execution,
                    FailureReason::BackupFailed {
                        error: "no backup recorded".to_string(),
                    },
                    "backup missing",
                )
                .await;
        }

        self.transition(execution, HealingStatus::Healing, "applying remediation")?;
        match self.apply(&target, execution, diagnosis, &commands, issues).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort_healing(&target, execution, &e).await;
                Err(e)
            }
        }
    }

    /// Everything from HEALING to a terminal state
    async fn apply(
        &self,
        target: &Target,
        execution: &mut HealingExecution,
        diagnosis: &Diagnosis,
        commands: &[ValidatedCommand],
        issues: u32,
    ) -> HealerResult<()> {
        let now = Utc::now();
        self.update_target(&target.id, |t| {
            t.current_healing_attempts += 1;
            t.last_healing_attempt_at = Some(now);
            t.health_status = HealthStatus::Healing;
        })
        .await?;
        self.db.save_execution(execution).await?;

        let outcome = match self.run_remediation(target, execution, commands).await {
            Err(step_failed) => Err(step_failed.failure_reason()),
            Ok(()) => self.verify(target, execution).await?,
        };

        let signature = PatternSignature::from_diagnosis(diagnosis);
        let executed: Vec<String> = commands.iter().map(|c| c.as_str().to_string()).collect();
        let pattern = self
            .patterns
            .record_outcome(&signature, &executed, outcome.is_ok())
            .await?;
        log_pattern(execution, &pattern);

        match outcome {
            Ok(remaining) => {
                execution.auto_healed_count = issues.saturating_sub(remaining);
                execution.cannot_heal_count = remaining;
                self.transition(execution, HealingStatus::Success, "health improved")?;
                self.update_target(&target.id, |t| t.current_healing_attempts = 0)
                    .await?;
                self.finish(execution).await
            }
            Err(reason) => {
                execution.cannot_heal_count = issues;
                if execution.health_after.is_none() {
                    // Partially applied remediation; health unknown until the next check pass
                    self.update_target(&target.id, |t| t.health_status = HealthStatus::Unknown)
                        .await?;
                }
                self.fail(execution, reason, "healing failed").await?;
                if self.config.auto_rollback && execution.backup_id.is_some() {
                    self.restore(target, execution).await?;
                }
                Ok(())
            }
        }
    }

    /// Close an execution whose healing stopped on an internal error.
    /// Best effort: it must never leave the execution in HEALING, and the
    /// caller already has an error to report.
    async fn abort_healing(
        &self,
        target: &Target,
        execution: &mut HealingExecution,
        err: &HealerError,
    ) {
        error!(execution_id = %execution.id, "Healing stopped by internal error: {}", err);
        if execution.status == HealingStatus::Healing {
            self.close_failed(execution, err.failure_reason());
        }

        let restore_attempted = execution
            .execution_logs
            .iter()
            .any(|entry| entry.kind == StepKind::Restore);
        if execution.status == HealingStatus::Failed
            && self.config.auto_rollback
            && execution.backup_id.is_some()
            && !restore_attempted
        {
            if let Err(e) = self.restore(target, execution).await {
                warn!(execution_id = %execution.id, "Rollback after internal error failed: {}", e);
            }
        }

        if let Err(e) = self.db.save_execution(execution).await {
            error!(execution_id = %execution.id, "Could not persist aborted execution: {}", e);
        }
        let unstick = self
            .update_target(&target.id, |t| {
                if t.health_status == HealthStatus::Healing {
                    t.health_status = HealthStatus::Unknown;
                }
            })
            .await;
        if let Err(e) = unstick {
            warn!(target_id = %target.id, "Could not reset target health: {}", e);
        }
    }

    /// Run commands in order; stop at the first failure and mark the rest
    /// as not attempted. The error names the step that failed.
    async fn run_remediation(
        &self,
        target: &Target,
        execution: &mut HealingExecution,
        commands: &[ValidatedCommand],
    ) -> HealerResult<()> {
        let timeout = self.config.command_timeout();

        for (idx, command) in commands.iter().enumerate() {
            let step = idx + 1;
            let start = Instant::now();
            let result = self.remote.execute(target, command, timeout).await;
            let elapsed = start.elapsed().as_millis() as u64;

            let error = match result {
                Ok(output) if output.success() => {
                    execution.log(
                        ExecutionLogEntry::command(step, command.as_str(), StepOutcome::Success, "ok")
                            .with_exit_code(output.exit_code)
                            .with_duration(elapsed),
                    );
                    continue;
                }
                Ok(output) => {
                    let detail = output.combined();
                    let first = detail.lines().next().unwrap_or("").trim();
                    let message = format!("exit {}: {}", output.exit_code, first);
                    execution.log(
                        ExecutionLogEntry::command(
                            step,
                            command.as_str(),
                            StepOutcome::Failed,
                            message.clone(),
                        )
                        .with_exit_code(output.exit_code)
                        .with_duration(elapsed),
                    );
                    message
                }
                Err(e) => {
                    execution.log(
                        ExecutionLogEntry::command(
                            step,
                            command.as_str(),
                            StepOutcome::Failed,
                            e.to_string(),
                        )
                        .with_duration(elapsed),
                    );
                    e.to_string()
                }
            };

            let failed = HealerError::RemediationStepFailed {
                step,
                command: command.as_str().to_string(),
                error,
            };
            warn!(execution_id = %execution.id, "{}", failed);
            for (rest_idx, rest) in commands.iter().enumerate().skip(step) {
                execution.log(ExecutionLogEntry::command(
                    rest_idx + 1,
                    rest.as_str(),
                    StepOutcome::NotAttempted,
                    format!("skipped after step {} failed", step),
                ));
            }
            return Err(failed);
        }
        Ok(())
    }

    /// Post-heal check pass. `Ok(Ok(remaining_issues))` when health improved.
    async fn verify(
        &self,
        target: &Target,
        execution: &mut HealingExecution,
    ) -> HealerResult<Result<u32, FailureReason>> {
        if !self.config.verify_after_heal {
            execution.log(ExecutionLogEntry::new(
                StepKind::Verify,
                StepOutcome::Info,
                "verification disabled",
            ));
            return Ok(Ok(0));
        }

        let after = self
            .diagnose(target, &format!("verify:{}", execution.id))
            .await?;
        let before = execution.health_before.unwrap_or(0);
        execution.health_after = Some(after.health_score);

        let status = after.health_status();
        self.update_target(&target.id, |t| t.health_status = status)
            .await?;

        if after.health_score > before {
            execution.log(ExecutionLogEntry::new(
                StepKind::Verify,
                StepOutcome::Success,
                format!("health score {} -> {}", before, after.health_score),
            ));
            Ok(Ok(after.issue_count()))
        } else {
            execution.log(ExecutionLogEntry::new(
                StepKind::Verify,
                StepOutcome::Failed,
                format!("health score did not improve ({} -> {})", before, after.health_score),
            ));
            Ok(Err(FailureReason::NoImprovement {
                before,
                after: after.health_score,
            }))
        }
    }

    /// Restore the execution's backup and move it to ROLLED_BACK.
    /// The target slot is re-taken for the duration of the restore.
    async fn restore(&self, target: &Target, execution: &mut HealingExecution) -> HealerResult<bool> {
        let backup_id = execution
            .backup_id
            .clone()
            .ok_or_else(|| HealerError::NoBackup(execution.id.clone()))?;

        if let Err(e) = self
            .arena
            .try_claim(&target.id, &execution.id, HealingStatus::Failed)
        {
            warn!(execution_id = %execution.id, "Rollback skipped: {}", e);
            execution.log(ExecutionLogEntry::new(
                StepKind::Restore,
                StepOutcome::NotAttempted,
                format!("target busy, rollback left to operator: {}", e),
            ));
            self.db.save_execution(execution).await?;
            return Ok(false);
        }

        let restored = match self.remote.restore_backup(target, &backup_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("restore reported failure".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match restored {
            Ok(()) => {
                execution.log(ExecutionLogEntry::new(
                    StepKind::Restore,
                    StepOutcome::Success,
                    format!("backup {} restored", backup_id),
                ));
                self.transition(execution, HealingStatus::RolledBack, "pre-heal state restored")?;
                self.db.save_execution(execution).await?;
                Ok(true)
            }
            Err(msg) => {
                error!(execution_id = %execution.id, "Restore of {} failed: {}", backup_id, msg);
                execution.log(ExecutionLogEntry::new(
                    StepKind::Restore,
                    StepOutcome::Failed,
                    format!("backup {}: {}", backup_id, msg),
                ));
                self.arena.release(&target.id, &execution.id);
                self.db.save_execution(execution).await?;
                Ok(false)
            }
        }
    }

    // ========================================================================
    // Operator actions
    // ========================================================================

    async fn load_execution(&self, execution_id: &str) -> HealerResult<HealingExecution> {
        self.db
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| HealerError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Move an AWAITING_APPROVAL execution into healing. Mode, pattern and
    /// cooldown gates are bypassed; validation and backup are not.
    pub async fn approve(
        &self,
        execution_id: &str,
        approved_by: &str,
    ) -> HealerResult<HealingExecution> {
        let mut execution = self.load_execution(execution_id).await?;
        if execution.status != HealingStatus::AwaitingApproval {
            return Err(HealerError::InvalidTransition {
                from: execution.status,
                to: HealingStatus::Healing,
            });
        }
        self.arena.begin(
            &execution.target_id,
            &execution.id,
            HealingStatus::AwaitingApproval,
            HealingStatus::Healing,
        )?;
        info!(execution_id = %execution.id, "Approved by {}", approved_by);
        execution.approved_by = Some(approved_by.to_string());

        match self.approved(&mut execution).await {
            Ok(()) => Ok(execution),
            Err(e) => {
                error!(execution_id = %execution.id, "Approved healing aborted: {}", e);
                if execution.status == HealingStatus::AwaitingApproval {
                    self.arena.park(&execution.target_id, &execution.id);
                } else {
                    self.arena.release(&execution.target_id, &execution.id);
                }
                Err(e)
            }
        }
    }

    async fn approved(&self, execution: &mut HealingExecution) -> HealerResult<()> {
        let target = self.load_target(&execution.target_id).await?;
        let diagnosis = execution
            .diagnosis
            .clone()
            .ok_or_else(|| HealerError::Internal(format!("execution {} has no diagnosis", execution.id)))?;
        execution.log(ExecutionLogEntry::new(
            StepKind::Validate,
            StepOutcome::Info,
            format!(
                "approved by {}",
                execution.approved_by.as_deref().unwrap_or("operator")
            ),
        ));

        let commands = match self.validate_remediation(execution, &diagnosis) {
            Some(commands) => commands,
            None => return self.finish(execution).await,
        };
        let issues = execution.needs_approval_count;
        execution.needs_approval_count = 0;
        self.heal(target, execution, &diagnosis, commands, issues).await
    }

    /// Decline an AWAITING_APPROVAL execution
    pub async fn reject(
        &self,
        execution_id: &str,
        rejected_by: &str,
    ) -> HealerResult<HealingExecution> {
        let mut execution = self.load_execution(execution_id).await?;
        if execution.status != HealingStatus::AwaitingApproval {
            return Err(HealerError::InvalidTransition {
                from: execution.status,
                to: HealingStatus::Failed,
            });
        }
        self.arena.begin(
            &execution.target_id,
            &execution.id,
            HealingStatus::AwaitingApproval,
            HealingStatus::Failed,
        )?;
        self.fail(
            &mut execution,
            FailureReason::ApprovalRejected {
                by: rejected_by.to_string(),
            },
            "approval rejected",
        )
        .await?;
        Ok(execution)
    }

    /// Restore the backup of a FAILED execution
    pub async fn rollback(&self, execution_id: &str) -> HealerResult<HealingExecution> {
        let mut execution = self.load_execution(execution_id).await?;
        if execution.status != HealingStatus::Failed {
            return Err(HealerError::InvalidTransition {
                from: execution.status,
                to: HealingStatus::RolledBack,
            });
        }
        if execution.backup_id.is_none() {
            return Err(HealerError::NoBackup(execution.id));
        }

        let target = self.load_target(&execution.target_id).await?;
        if !self.restore(&target, &mut execution).await? {
            let backup_id = execution.backup_id.clone().unwrap_or_default();
            return Err(HealerError::BackupFailed(format!(
                "restore of {} did not complete",
                backup_id
            )));
        }
        Ok(execution)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn transition(
        &self,
        execution: &mut HealingExecution,
        to: HealingStatus,
        note: &str,
    ) -> HealerResult<()> {
        let from = execution.status;
        self.arena
            .compare_and_set(&execution.target_id, &execution.id, from, to)?;
        execution.status = to;
        execution.log(ExecutionLogEntry::new(
            StepKind::Transition,
            StepOutcome::Info,
            format!("{} -> {}: {}", from, to, note),
        ));
        info!(
            target_id = %execution.target_id,
            execution_id = %execution.id,
            "{} -> {}", from, to
        );
        Ok(())
    }

    /// Move to FAILED without persisting
    fn close_failed(&self, execution: &mut HealingExecution, reason: FailureReason) {
        let note = reason.to_string();
        execution.failure_reason = Some(reason);
        if let Err(e) = self.transition(execution, HealingStatus::Failed, &note) {
            // Arena disagreed; record the outcome anyway and free the slot
            warn!(execution_id = %execution.id, "Forced FAILED: {}", e);
            execution.status = HealingStatus::Failed;
            self.arena.release(&execution.target_id, &execution.id);
        }
        execution.finished_at = Some(Utc::now());
    }

    async fn fail(
        &self,
        execution: &mut HealingExecution,
        reason: FailureReason,
        what: &str,
    ) -> HealerResult<()> {
        warn!(execution_id = %execution.id, "{}: {}", what, reason);
        self.close_failed(execution, reason);
        self.db.save_execution(execution).await
    }

    async fn finish(&self, execution: &mut HealingExecution) -> HealerResult<()> {
        if execution.finished_at.is_none() && execution.status.is_terminal() {
            execution.finished_at = Some(Utc::now());
        }
        self.db.save_execution(execution).await
    }
}

/// Why this diagnosis cannot heal unattended; empty when it can
fn approval_reasons(
    target: &Target,
    diagnosis: &Diagnosis,
    pattern: Option<&HealingPattern>,
    now: chrono::DateTime<Utc>,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if target.attempts_exhausted(now) {
        let cooldown = HealerError::CooldownActive {
            target_id: target.id.clone(),
            remaining_secs: target.cooldown_remaining(now).unwrap_or(0),
        };
        reasons.push(format!(
            "{}/{} healing attempts used; {}",
            target.current_healing_attempts, target.max_healing_attempts, cooldown
        ));
    }
    if !target.healing_mode.auto_heals(diagnosis.risk) {
        reasons.push(format!(
            "{} risk is not auto-healed in {} mode",
            diagnosis.risk, target.healing_mode
        ));
    }
    match pattern {
        Some(p) if p.auto_approved => {}
        Some(p) => reasons.push(format!(
            "pattern {} not auto-approved ({} successes, confidence {:.2})",
            p.id, p.success_count, p.confidence
        )),
        None => reasons.push(format!(
            "no pattern history for {}",
            PatternSignature::from_diagnosis(diagnosis)
        )),
    }
    reasons
}

/// A backup exists, or the remediation does not change target state
fn may_enter_healing(execution: &HealingExecution, diagnosis: &Diagnosis) -> bool {
    execution.backup_id.is_some() || !diagnosis.mutating
}

fn log_pattern(execution: &mut HealingExecution, pattern: &HealingPattern) {
    execution.log(ExecutionLogEntry::new(
        StepKind::Verify,
        StepOutcome::Info,
        format!(
            "pattern {}: {} ok / {} failed, confidence {:.2}, auto-approved {}",
            pattern.id,
            pattern.success_count,
            pattern.failure_count,
            pattern.confidence,
            pattern.auto_approved
        ),
    ));
}
