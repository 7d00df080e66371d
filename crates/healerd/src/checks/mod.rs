//! Diagnostic checks
//!
//! A check is data: a command template plus an expectation about its output.
//! The built-in catalog covers a PHP/WordPress-style site; extra checks can be
//! declared in the config file with the same schema.

mod runner;

pub use runner::CheckRunner;

use healer_common::{CheckCategory, CheckResult, CheckStatus, RiskLevel, Target};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::remote::CommandOutput;

/// Longest output excerpt kept in `CheckResult.details`
pub const MAX_OUTPUT_EXCERPT: usize = 2000;

/// How a check's command output maps to a status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// PASS on exit code 0
    ExitZero,
    /// PASS when the output matches
    OutputMatches { pattern: String },
    /// FAIL when the output matches
    OutputAbsent { pattern: String },
    /// First `N%` in the output against warn/fail thresholds
    UsageThreshold { warn: u32, fail: u32 },
}

/// Check definition from the catalog or config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub name: String,
    pub category: CheckCategory,
    pub severity: RiskLevel,

    /// Template; `{url}`, `{root}` and `{lines}` are substituted
    pub command: String,

    pub expect: Expectation,

    #[serde(default)]
    pub description: String,

    /// Overrides the runner's per-check timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CheckDefinition {
    pub fn new(
        name: &str,
        category: CheckCategory,
        severity: RiskLevel,
        command: &str,
        expect: Expectation,
    ) -> Self {
        Self {
            name: name.to_string(),
            category,
            severity,
            command: command.to_string(),
            expect,
            description: String::new(),
            timeout_secs: None,
        }
    }

    fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Concrete command for a target
    pub fn render(&self, target: &Target, log_tail_lines: u32) -> String {
        self.command
            .replace("{url}", &target.url)
            .replace("{root}", &target.root_path)
            .replace("{lines}", &log_tail_lines.to_string())
    }

    pub fn result(&self, status: CheckStatus, message: impl Into<String>) -> CheckResult {
        CheckResult::new(&self.name, self.category, self.severity, status, message)
    }

    /// Map command output to a status and message.
    /// Unparseable output is an ERROR, never a FAIL.
    pub fn evaluate(&self, output: &CommandOutput) -> (CheckStatus, String) {
        let text = output.combined();
        match &self.expect {
            Expectation::ExitZero => {
                if output.success() {
                    (CheckStatus::Pass, "exit 0".to_string())
                } else {
                    (
                        CheckStatus::Fail,
                        format!("exited with {}: {}", output.exit_code, first_line(&text)),
                    )
                }
            }
            Expectation::OutputMatches { pattern } => match Regex::new(pattern) {
                Ok(re) if re.is_match(&text) => (CheckStatus::Pass, first_line(&text)),
                Ok(_) => (
                    CheckStatus::Fail,
                    format!("unexpected output: {}", first_line(&text)),
                ),
                Err(e) => (CheckStatus::Error, format!("invalid pattern: {}", e)),
            },
            Expectation::OutputAbsent { pattern } => match Regex::new(pattern) {
                Ok(re) => match text.lines().find(|line| re.is_match(line)) {
                    Some(line) => (CheckStatus::Fail, line.trim().to_string()),
                    None => (CheckStatus::Pass, "not found".to_string()),
                },
                Err(e) => (CheckStatus::Error, format!("invalid pattern: {}", e)),
            },
            Expectation::UsageThreshold { warn, fail } => match parse_percentage(&text) {
                Some(used) if used >= *fail => (CheckStatus::Fail, format!("{}% used", used)),
                Some(used) if used >= *warn => (CheckStatus::Warn, format!("{}% used", used)),
                Some(used) => (CheckStatus::Pass, format!("{}% used", used)),
                None => (
                    CheckStatus::Error,
                    format!("no percentage in output: {}", first_line(&text)),
                ),
            },
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").trim().to_string()
}

fn parse_percentage(text: &str) -> Option<u32> {
    let re = Regex::new(r"(\d{1,3})%").ok()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Truncate to at most `max` characters
pub fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Built-in checks for a PHP application served over HTTP
pub fn default_catalog() -> Vec<CheckDefinition> {
    vec![
        CheckDefinition::new(
            "site_reachable",
            CheckCategory::Availability,
            RiskLevel::Critical,
            "curl -s -o /dev/null -w '%{http_code}' --max-time 10 {url}",
            Expectation::OutputMatches {
                pattern: r"^\s*[23]\d\d\s*$".to_string(),
            },
        )
        .describe("Site answers with a 2xx/3xx status"),
        CheckDefinition::new(
            "fatal_errors",
            CheckCategory::Availability,
            RiskLevel::High,
            "tail -n {lines} {root}/wp-content/debug.log || true",
            Expectation::OutputAbsent {
                pattern: r"PHP (Fatal|Parse) error".to_string(),
            },
        )
        .describe("No fatal or parse errors in the application log"),
        CheckDefinition::new(
            "memory_errors",
            CheckCategory::Performance,
            RiskLevel::Medium,
            "tail -n {lines} {root}/wp-content/debug.log || true",
            Expectation::OutputAbsent {
                pattern: r"Allowed memory size of \d+ bytes exhausted".to_string(),
            },
        )
        .describe("No PHP memory exhaustion in the application log"),
        CheckDefinition::new(
            "database_connection",
            CheckCategory::Availability,
            RiskLevel::Critical,
            "wp db check --path={root} --quiet",
            Expectation::ExitZero,
        )
        .describe("Database is reachable and tables are healthy"),
        CheckDefinition::new(
            "php_syntax",
            CheckCategory::Configuration,
            RiskLevel::High,
            "php -l {root}/wp-config.php",
            Expectation::OutputMatches {
                pattern: "No syntax errors".to_string(),
            },
        )
        .describe("Main configuration file parses"),
        CheckDefinition::new(
            "disk_usage",
            CheckCategory::System,
            RiskLevel::Medium,
            "df -P {root}",
            Expectation::UsageThreshold { warn: 80, fail: 95 },
        )
        .describe("Filesystem holding the application has room"),
        CheckDefinition::new(
            "file_permissions",
            CheckCategory::Security,
            RiskLevel::Medium,
            "find {root} -maxdepth 2 -type f -perm -o+w",
            Expectation::OutputAbsent {
                pattern: r"\S".to_string(),
            },
        )
        .describe("No world-writable files near the web root"),
        CheckDefinition::new(
            "maintenance_mode",
            CheckCategory::Configuration,
            RiskLevel::Low,
            "test -f {root}/.maintenance && echo present || echo absent",
            Expectation::OutputAbsent {
                pattern: "^present$".to_string(),
            },
        )
        .describe("Site is not stuck in maintenance mode"),
    ]
}

/// Built-in catalog plus configured extras; extras replace built-ins by name
pub fn catalog_with(custom: &[CheckDefinition]) -> Vec<CheckDefinition> {
    let mut catalog: Vec<CheckDefinition> = default_catalog()
        .into_iter()
        .filter(|c| !custom.iter().any(|x| x.name == c.name))
        .collect();
    catalog.extend(custom.iter().cloned());
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use healer_common::validate;

    fn output(code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            latency_ms: 0,
        }
    }

    fn check(name: &str) -> CheckDefinition {
        default_catalog()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn test_catalog_commands_pass_validator() {
        let target = Target::new("t", "https://example.com", "/srv/site");
        for def in default_catalog() {
            let cmd = def.render(&target, 200);
            let v = validate(&cmd);
            assert!(v.valid, "{} rejected: {:?}", cmd, v.reason);
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let target = Target::new("t", "https://example.com", "/srv/site");
        assert_eq!(
            check("fatal_errors").render(&target, 50),
            "tail -n 50 /srv/site/wp-content/debug.log || true"
        );
        assert!(check("site_reachable")
            .render(&target, 50)
            .ends_with("%{http_code}' --max-time 10 https://example.com"));
    }

    #[test]
    fn test_exit_zero() {
        let c = check("database_connection");
        assert_eq!(c.evaluate(&output(0, "")).0, CheckStatus::Pass);
        assert_eq!(c.evaluate(&output(1, "")).0, CheckStatus::Fail);
    }

    #[test]
    fn test_output_matches_and_absent() {
        assert_eq!(check("site_reachable").evaluate(&output(0, "200")).0, CheckStatus::Pass);
        assert_eq!(check("site_reachable").evaluate(&output(0, "500")).0, CheckStatus::Fail);

        let log = "[01-Jan] PHP Notice: x\n[01-Jan] PHP Fatal error: boom in /srv/a.php";
        let (status, message) = check("fatal_errors").evaluate(&output(0, log));
        assert_eq!(status, CheckStatus::Fail);
        assert!(message.contains("PHP Fatal error"));

        assert_eq!(check("maintenance_mode").evaluate(&output(0, "absent")).0, CheckStatus::Pass);
        assert_eq!(check("maintenance_mode").evaluate(&output(0, "present")).0, CheckStatus::Fail);
    }

    #[test]
    fn test_usage_threshold() {
        let c = check("disk_usage");
        let df = |pct: &str| {
            format!(
                "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 100 50 50 {} /",
                pct
            )
        };
        assert_eq!(c.evaluate(&output(0, &df("42%"))).0, CheckStatus::Pass);
        assert_eq!(c.evaluate(&output(0, &df("85%"))).0, CheckStatus::Warn);
        assert_eq!(c.evaluate(&output(0, &df("97%"))).0, CheckStatus::Fail);
        assert_eq!(c.evaluate(&output(0, "garbage")).0, CheckStatus::Error);
    }

    #[test]
    fn test_custom_checks_override_by_name() {
        let custom = CheckDefinition::new(
            "disk_usage",
            CheckCategory::System,
            RiskLevel::High,
            "df -P /",
            Expectation::UsageThreshold { warn: 70, fail: 90 },
        );
        let catalog = catalog_with(&[custom]);
        assert_eq!(catalog.len(), default_catalog().len());
        let disk = catalog.iter().find(|c| c.name == "disk_usage").unwrap();
        assert_eq!(disk.severity, RiskLevel::High);
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("ab", 3), "ab");
    }
}
