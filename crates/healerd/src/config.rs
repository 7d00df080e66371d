//! Configuration management for healerd.
//!
//! Loads settings from /etc/healer/config.toml or uses defaults. Every field
//! carries a serde default so partial files are fine.

use anyhow::{Context, Result};
use healer_common::{ApprovalPolicy, HealingMode, Target};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::checks::CheckDefinition;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/healer/config.toml";

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Where the shell executor writes target backups
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/healer/healer.db")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/lib/healer/backups")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            backup_dir: default_backup_dir(),
        }
    }
}

/// Check runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Per-check timeout in seconds
    #[serde(default = "default_per_check_timeout")]
    pub per_check_timeout_secs: u64,

    /// Deadline for a whole diagnostic pass
    #[serde(default = "default_overall_deadline")]
    pub overall_deadline_secs: u64,

    #[serde(default = "default_max_parallel_checks")]
    pub max_parallel_checks: usize,

    /// Lines of the application error log read by log checks
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,

    /// Extra checks appended to the built-in catalog
    #[serde(default)]
    pub custom: Vec<CheckDefinition>,
}

fn default_per_check_timeout() -> u64 {
    15
}

fn default_overall_deadline() -> u64 {
    60
}

fn default_max_parallel_checks() -> usize {
    8
}

fn default_log_tail_lines() -> u32 {
    200
}

impl ChecksConfig {
    pub fn per_check_timeout(&self) -> Duration {
        Duration::from_secs(self.per_check_timeout_secs)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_secs)
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            per_check_timeout_secs: default_per_check_timeout(),
            overall_deadline_secs: default_overall_deadline(),
            max_parallel_checks: default_max_parallel_checks(),
            log_tail_lines: default_log_tail_lines(),
            custom: Vec::new(),
        }
    }
}

/// Healing executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Timeout for each remediation command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Restore the backup as soon as a healing run fails
    #[serde(default = "default_true")]
    pub auto_rollback: bool,

    /// Re-run checks after remediation and require a better score
    #[serde(default = "default_true")]
    pub verify_after_heal: bool,
}

fn default_command_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl HealingConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            auto_rollback: true,
            verify_after_heal: true,
        }
    }
}

/// Pattern learning thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_min_successes")]
    pub min_successes: u32,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default)]
    pub revoke_on_failure: bool,

    /// Confidence added to a diagnosis backed by an auto-approved pattern
    #[serde(default = "default_confidence_boost")]
    pub confidence_boost: f64,
}

fn default_min_successes() -> u32 {
    healer_common::pattern::MIN_SUCCESSES_FOR_APPROVAL
}

fn default_min_confidence() -> f64 {
    healer_common::pattern::MIN_CONFIDENCE_FOR_APPROVAL
}

fn default_confidence_boost() -> f64 {
    0.1
}

impl LearningConfig {
    pub fn policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            min_successes: self.min_successes,
            min_confidence: self.min_confidence,
            revoke_on_failure: self.revoke_on_failure,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_successes: default_min_successes(),
            min_confidence: default_min_confidence(),
            revoke_on_failure: false,
            confidence_boost: default_confidence_boost(),
        }
    }
}

/// A monitored application as declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    pub url: String,
    pub root_path: String,

    #[serde(default)]
    pub healing_mode: HealingMode,

    #[serde(default = "default_true")]
    pub healer_enabled: bool,

    #[serde(default = "default_max_attempts")]
    pub max_healing_attempts: u32,

    #[serde(default = "default_cooldown")]
    pub healing_cooldown_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    3600
}

impl TargetConfig {
    pub fn to_target(&self) -> Target {
        let mut target = Target::new(&self.id, &self.url, &self.root_path)
            .with_mode(self.healing_mode)
            .with_max_attempts(self.max_healing_attempts)
            .with_cooldown(self.healing_cooldown_secs);
        target.is_healer_enabled = self.healer_enabled;
        target
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealerConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub checks: ChecksConfig,

    #[serde(default)]
    pub healing: HealingConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl HealerConfig {
    /// Load from the default path, falling back to defaults
    pub fn load() -> Self {
        let path = Path::new(CONFIG_PATH);
        if !path.exists() {
            info!("No config at {}, using defaults", CONFIG_PATH);
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load {}: {:#}, using defaults", CONFIG_PATH, e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!(
            "Loaded config from {} ({} targets)",
            path.display(),
            config.targets.len()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: HealerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.learning.min_confidence) {
            anyhow::bail!("learning.min_confidence must be within 0.0..=1.0");
        }
        if self.checks.max_parallel_checks == 0 {
            anyhow::bail!("checks.max_parallel_checks must be at least 1");
        }
        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id.as_str()) {
                anyhow::bail!("duplicate target id '{}'", target.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = HealerConfig::parse("").unwrap();
        assert_eq!(config.checks.per_check_timeout_secs, 15);
        assert_eq!(config.learning.min_successes, 3);
        assert!(config.healing.auto_rollback);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_targets_and_overrides() {
        let config = HealerConfig::parse(
            r#"
            [healing]
            auto_rollback = false

            [learning]
            revoke_on_failure = true

            [[targets]]
            id = "blog"
            url = "https://blog.example.com"
            root_path = "/srv/blog"
            healing_mode = "full_auto"
            max_healing_attempts = 5
            "#,
        )
        .unwrap();

        assert!(!config.healing.auto_rollback);
        assert!(config.learning.policy().revoke_on_failure);

        let target = config.targets[0].to_target();
        assert_eq!(target.id, "blog");
        assert_eq!(target.healing_mode, HealingMode::FullAuto);
        assert_eq!(target.max_healing_attempts, 5);
        assert_eq!(target.healing_cooldown_secs, 3600);
        assert!(target.is_healer_enabled);
    }

    #[test]
    fn test_custom_checks() {
        let config = HealerConfig::parse(
            r#"
            [[checks.custom]]
            name = "cron_running"
            category = "SYSTEM"
            severity = "LOW"
            command = "pgrep cron"
            expect = { kind = "exit_zero" }
            "#,
        )
        .unwrap();
        assert_eq!(config.checks.custom.len(), 1);
        assert_eq!(config.checks.custom[0].name, "cron_running");
    }

    #[test]
    fn test_rejects_duplicate_targets() {
        let err = HealerConfig::parse(
            r#"
            [[targets]]
            id = "a"
            url = "http://a"
            root_path = "/a"

            [[targets]]
            id = "a"
            url = "http://b"
            root_path = "/b"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[checks]\nmax_parallel_checks = 2").unwrap();
        let config = HealerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.checks.max_parallel_checks, 2);
    }
}
