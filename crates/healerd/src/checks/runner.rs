//! Check runner: executes a check set against a target in parallel.
//!
//! Each check gets its own timeout, and the whole pass shares one deadline.
//! Concurrency is bounded by a semaphore. Transport failures, timeouts and
//! rejected commands produce ERROR results rather than FAIL.

use healer_common::{
    validate_command, CheckResult, CheckStatus, DiagnosticExecution, HealerError, Target,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{excerpt, CheckDefinition, MAX_OUTPUT_EXCERPT};
use crate::config::ChecksConfig;
use crate::remote::RemoteExecutor;

pub struct CheckRunner {
    executor: Arc<dyn RemoteExecutor>,
    per_check_timeout: Duration,
    overall_deadline: Duration,
    max_parallel: usize,
    log_tail_lines: u32,
}

impl CheckRunner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: &ChecksConfig) -> Self {
        Self {
            executor,
            per_check_timeout: config.per_check_timeout(),
            overall_deadline: config.overall_deadline(),
            max_parallel: config.max_parallel_checks.max(1),
            log_tail_lines: config.log_tail_lines,
        }
    }

    /// Run every check and aggregate into a diagnostic execution.
    /// Results keep the order of `checks`.
    pub async fn run_checks(
        &self,
        target: &Target,
        checks: &[CheckDefinition],
        triggered_by: &str,
    ) -> DiagnosticExecution {
        info!(target_id = %target.id, "Running {} checks", checks.len());
        let started = Instant::now();
        let deadline = started + self.overall_deadline;
        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for (idx, check) in checks.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            let target = target.clone();
            let permits = Arc::clone(&permits);
            let timeout = check
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.per_check_timeout);
            let lines = self.log_tail_lines;

            tasks.spawn(async move {
                let result = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await
                {
                    Ok(Ok(_permit)) => {
                        run_one(executor.as_ref(), &target, &check, timeout, deadline, lines).await
                    }
                    _ => check.result(CheckStatus::Error, "Deadline reached before check started"),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<CheckResult>> = vec![None; checks.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(target_id = %target.id, "Check task failed: {}", e),
            }
        }

        let results: Vec<CheckResult> = slots
            .into_iter()
            .zip(checks)
            .map(|(slot, check)| {
                slot.unwrap_or_else(|| check.result(CheckStatus::Error, "Check task aborted"))
            })
            .collect();

        let execution = DiagnosticExecution::new(&target.id, results, triggered_by);
        info!(
            target_id = %target.id,
            "Checks finished in {}ms: score {} ({} issues)",
            started.elapsed().as_millis(),
            execution.health_score,
            execution.issue_count()
        );
        execution
    }
}

async fn run_one(
    executor: &dyn RemoteExecutor,
    target: &Target,
    check: &CheckDefinition,
    timeout: Duration,
    deadline: Instant,
    log_tail_lines: u32,
) -> CheckResult {
    let start = Instant::now();
    let rendered = check.render(target, log_tail_lines);

    let command = match validate_command(&rendered) {
        Ok(command) => command,
        Err(e) => {
            warn!(target_id = %target.id, check = %check.name, "Check command rejected: {}", e);
            return check
                .result(CheckStatus::Error, e.to_string())
                .with_details(serde_json::json!({ "command": rendered }));
        }
    };

    let timeout = timeout.min(deadline.saturating_duration_since(start));
    debug!(target_id = %target.id, check = %check.name, "{}", command);

    let outcome = tokio::time::timeout(timeout, executor.execute(target, &command, timeout)).await;
    let elapsed = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(output)) => {
            let (status, message) = check.evaluate(&output);
            check
                .result(status, message)
                .with_details(serde_json::json!({
                    "command": rendered,
                    "exit_code": output.exit_code,
                    "output": excerpt(&output.combined(), MAX_OUTPUT_EXCERPT),
                }))
                .with_duration(elapsed)
        }
        Ok(Err(e)) => errored(check, &rendered, HealerError::CheckError(e.to_string()))
            .with_duration(elapsed),
        Err(_) => errored(
            check,
            &rendered,
            HealerError::CheckError(format!("timed out after {}ms", timeout.as_millis())),
        )
        .with_duration(elapsed),
    }
}

fn errored(check: &CheckDefinition, rendered: &str, err: HealerError) -> CheckResult {
    check
        .result(CheckStatus::Error, err.to_string())
        .with_details(serde_json::json!({
            "command": rendered,
            "error_code": err.code(),
        }))
}
