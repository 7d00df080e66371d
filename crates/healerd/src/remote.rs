//! Remote Executor Adapter
//!
//! Trait abstraction over the transport that runs commands on a target host.
//! The healer only ever hands it a [`ValidatedCommand`], so nothing reaches a
//! host without passing the command validator first.
//!
//! Production code uses [`crate::shell::ShellExecutor`]. Tests use
//! [`FakeRemoteExecutor`] with scripted responses.

use async_trait::async_trait;
use healer_common::{Target, ValidatedCommand};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Output of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub latency_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for pattern matching
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backup error: {0}")]
    Backup(String),
}

// ============================================================================
// Remote Executor Trait
// ============================================================================

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a validated command on the target host
    async fn execute(
        &self,
        target: &Target,
        command: &ValidatedCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;

    /// Capture target state; returns a backup id
    async fn take_backup(&self, target: &Target) -> Result<String, RemoteError>;

    /// Restore a previous backup; `Ok(false)` when the restore did not apply
    async fn restore_backup(&self, target: &Target, backup_id: &str) -> Result<bool, RemoteError>;
}

// ============================================================================
// Fake Remote Executor (Testing)
// ============================================================================

/// Scripted response for [`FakeRemoteExecutor`]
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Output(CommandOutput),
    Error(RemoteError),
}

impl FakeResponse {
    /// Exit 0 with the given stdout
    pub fn ok(stdout: &str) -> Self {
        FakeResponse::Output(CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            latency_ms: 1,
        })
    }

    /// Non-zero exit with the given stderr
    pub fn exit(code: i32, stderr: &str) -> Self {
        FakeResponse::Output(CommandOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            latency_ms: 1,
        })
    }

    pub fn transport_error(msg: &str) -> Self {
        FakeResponse::Error(RemoteError::Transport(msg.to_string()))
    }
}

struct ScriptedRule {
    needle: String,
    responses: VecDeque<FakeResponse>,
}

/// Fake executor with responses keyed by command substring.
///
/// The first rule whose needle occurs in the command answers. A rule with
/// several queued responses pops them in order and keeps repeating the last.
/// Unmatched commands exit 0 with empty output.
pub struct FakeRemoteExecutor {
    rules: Mutex<Vec<ScriptedRule>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    backup_error: Mutex<Option<String>>,
    restore_ok: Mutex<bool>,
    backups_taken: AtomicUsize,
    restores: Mutex<Vec<String>>,
}

impl FakeRemoteExecutor {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            backup_error: Mutex::new(None),
            restore_ok: Mutex::new(true),
            backups_taken: AtomicUsize::new(0),
            restores: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for commands containing `needle`
    pub fn respond(&self, needle: &str, response: FakeResponse) -> &Self {
        let mut rules = lock(&self.rules);
        if let Some(rule) = rules.iter_mut().find(|r| r.needle == needle) {
            rule.responses.push_back(response);
        } else {
            rules.push(ScriptedRule {
                needle: needle.to_string(),
                responses: VecDeque::from([response]),
            });
        }
        self
    }

    /// Drop queued responses for `needle` and answer with `response` from now on
    pub fn replace(&self, needle: &str, response: FakeResponse) -> &Self {
        lock(&self.rules).retain(|r| r.needle != needle);
        self.respond(needle, response)
    }

    /// Simulated transport latency for every command
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn fail_backups(&self, error: &str) {
        *lock(&self.backup_error) = Some(error.to_string());
    }

    pub fn fail_restores(&self) {
        *lock(&self.restore_ok) = false;
    }

    /// Every command executed, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.contains(needle)).count()
    }

    pub fn backups_taken(&self) -> usize {
        self.backups_taken.load(Ordering::SeqCst)
    }

    /// Backup ids passed to restore, in order
    pub fn restores(&self) -> Vec<String> {
        lock(&self.restores).clone()
    }

    fn next_response(&self, command: &str) -> FakeResponse {
        let mut rules = lock(&self.rules);
        match rules.iter_mut().find(|r| command.contains(&r.needle)) {
            Some(rule) if rule.responses.len() > 1 => match rule.responses.pop_front() {
                Some(response) => response,
                None => FakeResponse::ok(""),
            },
            Some(rule) => rule
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| FakeResponse::ok("")),
            None => FakeResponse::ok(""),
        }
    }
}

impl Default for FakeRemoteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemoteExecutor for FakeRemoteExecutor {
    async fn execute(
        &self,
        _target: &Target,
        command: &ValidatedCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        lock(&self.calls).push(command.as_str().to_string());
        let start = Instant::now();

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            if latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(RemoteError::Timeout(timeout));
            }
            tokio::time::sleep(latency).await;
        }

        match self.next_response(command.as_str()) {
            FakeResponse::Output(mut output) => {
                output.latency_ms = start.elapsed().as_millis() as u64;
                Ok(output)
            }
            FakeResponse::Error(e) => Err(e),
        }
    }

    async fn take_backup(&self, target: &Target) -> Result<String, RemoteError> {
        if let Some(error) = lock(&self.backup_error).clone() {
            return Err(RemoteError::Backup(error));
        }
        let n = self.backups_taken.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}-backup-{}", target.id, n))
    }

    async fn restore_backup(&self, _target: &Target, backup_id: &str) -> Result<bool, RemoteError> {
        lock(&self.restores).push(backup_id.to_string());
        Ok(*lock(&self.restore_ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healer_common::validate_command;

    fn target() -> Target {
        Target::new("site", "http://site", "/srv/site")
    }

    #[tokio::test]
    async fn test_fake_sequences_then_sticks() {
        let fake = FakeRemoteExecutor::new();
        fake.respond("curl", FakeResponse::ok("500"))
            .respond("curl", FakeResponse::ok("200"));

        let cmd = validate_command("curl -s http://site").unwrap();
        let t = target();
        let first = fake.execute(&t, &cmd, Duration::from_secs(1)).await.unwrap();
        let second = fake.execute(&t, &cmd, Duration::from_secs(1)).await.unwrap();
        let third = fake.execute(&t, &cmd, Duration::from_secs(1)).await.unwrap();

        assert_eq!(first.stdout, "500");
        assert_eq!(second.stdout, "200");
        assert_eq!(third.stdout, "200");
        assert_eq!(fake.calls_matching("curl"), 3);
    }

    #[tokio::test]
    async fn test_fake_latency_times_out() {
        let fake = FakeRemoteExecutor::new();
        fake.set_latency(Duration::from_millis(50));
        let cmd = validate_command("ls").unwrap();

        let result = fake.execute(&target(), &cmd, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(RemoteError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fake_backup_and_restore() {
        let fake = FakeRemoteExecutor::new();
        let id = fake.take_backup(&target()).await.unwrap();
        assert_eq!(id, "site-backup-1");
        assert!(fake.restore_backup(&target(), &id).await.unwrap());
        assert_eq!(fake.restores(), vec![id]);

        fake.fail_backups("disk full");
        assert!(fake.take_backup(&target()).await.is_err());
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "a".into(),
            stderr: "b".into(),
            latency_ms: 0,
        };
        assert_eq!(out.combined(), "a\nb");
        assert!(!out.success());
    }
}
