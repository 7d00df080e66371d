//! Diagnosis rule table
//!
//! Each rule is data: a matcher over failing checks and log lines, the
//! diagnosis it produces, and a remediation template. Rules are evaluated in
//! order and the first match wins, so more specific rules come first.

use healer_common::{DiagnosisType, RiskLevel};

/// Predicate over a diagnostic execution and its raw signals
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// A check with this name has status FAIL. ERROR and SKIPPED never match.
    CheckFailed(String),
    /// Some log line matches the regex. A named group `culprit` is captured.
    LogMatches(String),
    AllOf(Vec<Matcher>),
    AnyOf(Vec<Matcher>),
}

impl Matcher {
    pub fn check_failed(name: &str) -> Self {
        Matcher::CheckFailed(name.to_string())
    }

    pub fn log(pattern: &str) -> Self {
        Matcher::LogMatches(pattern.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisRule {
    pub id: String,
    pub matcher: Matcher,
    pub diagnosis_type: DiagnosisType,
    pub error_type: String,

    /// Prior confidence when the rule matches
    pub confidence: f64,

    pub risk: RiskLevel,

    /// Remediation changes target state and needs a backup first
    pub mutating: bool,

    /// `{root}`, `{url}` and `{culprit}` are substituted
    pub commands: Vec<String>,

    pub action: String,
}

impl DiagnosisRule {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: &str,
        matcher: Matcher,
        diagnosis_type: DiagnosisType,
        error_type: &str,
        confidence: f64,
        risk: RiskLevel,
        commands: &[&str],
        action: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            matcher,
            diagnosis_type,
            error_type: error_type.to_string(),
            confidence,
            risk,
            mutating: true,
            commands: commands.iter().map(|c| c.to_string()).collect(),
            action: action.to_string(),
        }
    }
}

// Plugin directory names only; anything else in a log line is not a culprit
const PLUGIN_PATH: &str = r"/wp-content/plugins/(?P<culprit>[A-Za-z0-9_.-]+)/";

/// Built-in rules for PHP/WordPress-style sites, most specific first
pub fn builtin_rules() -> Vec<DiagnosisRule> {
    vec![
        DiagnosisRule::new(
            "plugin_syntax_error",
            Matcher::log(&format!(r"PHP Parse error:.*?{}", PLUGIN_PATH)),
            DiagnosisType::SyntaxError,
            "plugin_syntax_error",
            0.9,
            RiskLevel::Medium,
            &["wp plugin deactivate {culprit} --path={root}"],
            "Deactivate the plugin whose code no longer parses",
        ),
        DiagnosisRule::new(
            "plugin_fatal_error",
            Matcher::log(&format!(r"PHP Fatal error:.*?{}", PLUGIN_PATH)),
            DiagnosisType::Wsod,
            "plugin_fatal_error",
            0.85,
            RiskLevel::Low,
            &[
                "wp plugin deactivate {culprit} --path={root}",
                "wp cache flush --path={root}",
            ],
            "Deactivate the plugin raising fatal errors and flush the object cache",
        ),
        DiagnosisRule::new(
            "memory_exhaustion",
            Matcher::AnyOf(vec![
                Matcher::check_failed("memory_errors"),
                Matcher::log(r"Allowed memory size of \d+ bytes exhausted"),
            ]),
            DiagnosisType::MemoryExhaustion,
            "memory_limit",
            0.8,
            RiskLevel::Medium,
            &["wp config set WP_MEMORY_LIMIT 256M --path={root}"],
            "Raise the PHP memory limit for the application",
        ),
        DiagnosisRule::new(
            "database_connection",
            Matcher::AnyOf(vec![
                Matcher::check_failed("database_connection"),
                Matcher::log("Error establishing a database connection"),
            ]),
            DiagnosisType::DbError,
            "db_connection",
            0.75,
            RiskLevel::High,
            &["wp db repair --path={root}"],
            "Repair database tables",
        ),
        DiagnosisRule::new(
            "maintenance_flag",
            Matcher::check_failed("maintenance_mode"),
            DiagnosisType::Maintenance,
            "maintenance_flag",
            0.95,
            RiskLevel::Low,
            &["rm -f {root}/.maintenance"],
            "Remove the stale maintenance flag",
        ),
        DiagnosisRule::new(
            "world_writable",
            Matcher::check_failed("file_permissions"),
            DiagnosisType::Permission,
            "world_writable",
            0.7,
            RiskLevel::Medium,
            &["find {root} -maxdepth 2 -type f -perm -o+w -exec chmod o-w {} +"],
            "Remove world-write permission from application files",
        ),
        DiagnosisRule::new(
            "unreachable_fatal",
            Matcher::AllOf(vec![
                Matcher::check_failed("site_reachable"),
                Matcher::log("PHP (Fatal|Parse) error"),
            ]),
            DiagnosisType::Wsod,
            "fatal_error",
            0.6,
            RiskLevel::High,
            &["wp plugin deactivate --all --path={root}"],
            "Site is down with an unattributed fatal error; deactivate all plugins",
        ),
    ]
}
