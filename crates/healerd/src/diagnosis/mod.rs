//! Diagnosis Classifier
//!
//! Maps a diagnostic execution plus raw error-log signals to a [`Diagnosis`]
//! using an ordered rule table. First match wins. No match is a valid
//! outcome: UNKNOWN with zero confidence and no commands.

mod rules;

pub use rules::{builtin_rules, DiagnosisRule, Matcher};

use healer_common::{
    CheckStatus, DiagnosticExecution, Diagnosis, HealerError, HealerResult, HealingPattern,
    Target,
};
use regex::Regex;
use tracing::debug;

/// Error-log evidence gathered alongside check results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSignals {
    pub log_lines: Vec<String>,
}

impl RawSignals {
    /// Lines supplied by the caller (e.g. a log shipper)
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            log_lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Add the output excerpts of FAIL and WARN results. ERROR output is
    /// transport noise and is not evidence.
    pub fn with_execution(mut self, execution: &DiagnosticExecution) -> Self {
        for result in &execution.results {
            if !matches!(result.status, CheckStatus::Fail | CheckStatus::Warn) {
                continue;
            }
            if let Some(output) = result.output() {
                self.log_lines
                    .extend(output.lines().filter(|l| !l.trim().is_empty()).map(String::from));
            }
            if !result.message.is_empty() {
                self.log_lines.push(result.message.clone());
            }
        }
        self
    }
}

enum CompiledMatcher {
    CheckFailed(String),
    LogMatches(Regex),
    AllOf(Vec<CompiledMatcher>),
    AnyOf(Vec<CompiledMatcher>),
}

impl CompiledMatcher {
    fn compile(rule_id: &str, matcher: &Matcher) -> HealerResult<Self> {
        Ok(match matcher {
            Matcher::CheckFailed(name) => CompiledMatcher::CheckFailed(name.clone()),
            Matcher::LogMatches(pattern) => {
                CompiledMatcher::LogMatches(Regex::new(pattern).map_err(|e| {
                    HealerError::InvalidRule {
                        rule: rule_id.to_string(),
                        error: e.to_string(),
                    }
                })?)
            }
            Matcher::AllOf(inner) => CompiledMatcher::AllOf(
                inner
                    .iter()
                    .map(|m| Self::compile(rule_id, m))
                    .collect::<HealerResult<_>>()?,
            ),
            Matcher::AnyOf(inner) => CompiledMatcher::AnyOf(
                inner
                    .iter()
                    .map(|m| Self::compile(rule_id, m))
                    .collect::<HealerResult<_>>()?,
            ),
        })
    }

    /// `None` if no match, otherwise the captured culprit (if any)
    fn evaluate(
        &self,
        execution: &DiagnosticExecution,
        signals: &RawSignals,
    ) -> Option<Option<String>> {
        match self {
            CompiledMatcher::CheckFailed(name) => execution.failed(name).then_some(None),
            CompiledMatcher::LogMatches(re) => signals.log_lines.iter().find_map(|line| {
                re.captures(line)
                    .map(|caps| caps.name("culprit").map(|m| m.as_str().to_string()))
            }),
            CompiledMatcher::AllOf(inner) => {
                let mut culprit = None;
                for m in inner {
                    let found = m.evaluate(execution, signals)?;
                    culprit = culprit.or(found);
                }
                Some(culprit)
            }
            CompiledMatcher::AnyOf(inner) => {
                inner.iter().find_map(|m| m.evaluate(execution, signals))
            }
        }
    }
}

struct CompiledRule {
    rule: DiagnosisRule,
    matcher: CompiledMatcher,
}

pub struct DiagnosisClassifier {
    rules: Vec<CompiledRule>,
}

impl DiagnosisClassifier {
    /// Compile a rule table; fails on the first invalid regex
    pub fn new(rules: Vec<DiagnosisRule>) -> HealerResult<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let matcher = CompiledMatcher::compile(&rule.id, &rule.matcher)?;
                Ok(CompiledRule { rule, matcher })
            })
            .collect::<HealerResult<_>>()?;
        Ok(Self { rules })
    }

    pub fn builtin() -> HealerResult<Self> {
        Self::new(builtin_rules())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn classify(
        &self,
        target: &Target,
        execution: &DiagnosticExecution,
        signals: &RawSignals,
    ) -> Diagnosis {
        if execution.all_passing() {
            return Diagnosis::healthy();
        }

        for compiled in &self.rules {
            let Some(culprit) = compiled.matcher.evaluate(execution, signals) else {
                continue;
            };
            let rule = &compiled.rule;
            debug!(target_id = %target.id, rule = %rule.id, "Diagnosis rule matched");

            let commands = rule
                .commands
                .iter()
                .map(|c| render(c, target, culprit.as_deref()))
                .collect();
            return Diagnosis {
                diagnosis_type: rule.diagnosis_type,
                confidence: rule.confidence,
                error_type: rule.error_type.clone(),
                culprit,
                suggested_commands: commands,
                suggested_action: rule.action.clone(),
                risk: rule.risk,
                mutating: rule.mutating,
                rule_id: Some(rule.id.clone()),
            };
        }

        debug!(target_id = %target.id, "No diagnosis rule matched");
        Diagnosis::unknown()
    }
}

fn render(template: &str, target: &Target, culprit: Option<&str>) -> String {
    template
        .replace("{root}", &target.root_path)
        .replace("{url}", &target.url)
        .replace("{culprit}", culprit.unwrap_or(""))
}

/// Raise confidence for a signature with a proven, auto-approved history.
/// Never exceeds 1.0. Returns true if a boost was applied.
pub fn apply_pattern_boost(
    diagnosis: &mut Diagnosis,
    pattern: Option<&HealingPattern>,
    boost: f64,
) -> bool {
    match pattern {
        Some(p) if p.auto_approved => {
            diagnosis.confidence = (diagnosis.confidence + boost).min(1.0);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use healer_common::{
        CheckCategory, CheckResult, DiagnosisType, PatternSignature, RiskLevel,
    };

    fn target() -> Target {
        Target::new("site", "https://site.test", "/srv/site")
    }

    fn result(name: &str, status: CheckStatus) -> CheckResult {
        CheckResult::new(name, CheckCategory::Availability, RiskLevel::High, status, "")
    }

    fn execution(results: Vec<CheckResult>) -> DiagnosticExecution {
        DiagnosticExecution::new("site", results, "test")
    }

    fn classifier() -> DiagnosisClassifier {
        DiagnosisClassifier::builtin().unwrap()
    }

    #[test]
    fn test_all_passing_is_healthy() {
        let exec = execution(vec![
            result("site_reachable", CheckStatus::Pass),
            result("fatal_errors", CheckStatus::Pass),
        ]);
        let d = classifier().classify(&target(), &exec, &RawSignals::default());
        assert_eq!(d.diagnosis_type, DiagnosisType::Healthy);
        assert_relative_eq!(d.confidence, 1.0);
        assert!(d.suggested_commands.is_empty());
    }

    #[test]
    fn test_plugin_fatal_extracts_culprit() {
        let fatal = "PHP Fatal error: Uncaught Error in /srv/site/wp-content/plugins/hello-dolly/hello.php:12";
        let exec = execution(vec![
            result("fatal_errors", CheckStatus::Fail)
                .with_details(serde_json::json!({ "output": fatal })),
        ]);
        let signals = RawSignals::default().with_execution(&exec);
        let d = classifier().classify(&target(), &exec, &signals);

        assert_eq!(d.diagnosis_type, DiagnosisType::Wsod);
        assert_eq!(d.error_type, "plugin_fatal_error");
        assert_eq!(d.culprit.as_deref(), Some("hello-dolly"));
        assert_eq!(d.risk, RiskLevel::Low);
        assert_eq!(
            d.suggested_commands,
            vec![
                "wp plugin deactivate hello-dolly --path=/srv/site",
                "wp cache flush --path=/srv/site",
            ]
        );
    }

    #[test]
    fn test_syntax_error_wins_over_fatal() {
        let signals = RawSignals::from_lines([
            "PHP Fatal error: x in /srv/site/wp-content/plugins/a/a.php",
            "PHP Parse error: syntax error in /srv/site/wp-content/plugins/b/b.php on line 3",
        ]);
        let exec = execution(vec![result("fatal_errors", CheckStatus::Fail)]);
        let d = classifier().classify(&target(), &exec, &signals);
        assert_eq!(d.diagnosis_type, DiagnosisType::SyntaxError);
        assert_eq!(d.culprit.as_deref(), Some("b"));
    }

    #[test]
    fn test_error_status_is_not_evidence() {
        let exec = execution(vec![
            result("database_connection", CheckStatus::Error),
            result("site_reachable", CheckStatus::Pass),
        ]);
        let signals = RawSignals::default().with_execution(&exec);
        let d = classifier().classify(&target(), &exec, &signals);
        assert_eq!(d.diagnosis_type, DiagnosisType::Unknown);
        assert_relative_eq!(d.confidence, 0.0);
        assert!(d.suggested_commands.is_empty());
    }

    #[test]
    fn test_failed_check_rules() {
        let exec = execution(vec![result("maintenance_mode", CheckStatus::Fail)]);
        let d = classifier().classify(&target(), &exec, &RawSignals::default());
        assert_eq!(d.diagnosis_type, DiagnosisType::Maintenance);
        assert_eq!(d.suggested_commands, vec!["rm -f /srv/site/.maintenance"]);

        let exec = execution(vec![result("database_connection", CheckStatus::Fail)]);
        let d = classifier().classify(&target(), &exec, &RawSignals::default());
        assert_eq!(d.diagnosis_type, DiagnosisType::DbError);
        assert_eq!(d.risk, RiskLevel::High);
    }

    #[test]
    fn test_all_of_needs_every_part() {
        let signals = RawSignals::from_lines(["PHP Fatal error: Uncaught in /srv/site/index.php"]);
        let down = execution(vec![result("site_reachable", CheckStatus::Fail)]);
        let d = classifier().classify(&target(), &down, &signals);
        assert_eq!(d.error_type, "fatal_error");

        let up = execution(vec![
            result("site_reachable", CheckStatus::Pass),
            result("disk_usage", CheckStatus::Warn),
        ]);
        let d = classifier().classify(&target(), &up, &signals);
        assert_eq!(d.diagnosis_type, DiagnosisType::Unknown);
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let mut rules = builtin_rules();
        rules[0].matcher = Matcher::log("(unclosed");
        let err = DiagnosisClassifier::new(rules).err().unwrap();
        assert_eq!(err.code(), "invalid_rule");
    }

    #[test]
    fn test_pattern_boost_caps_at_one() {
        let exec = execution(vec![result("maintenance_mode", CheckStatus::Fail)]);
        let mut d = classifier().classify(&target(), &exec, &RawSignals::default());
        let mut pattern = HealingPattern::new(PatternSignature::from_diagnosis(&d), vec![]);

        assert!(!apply_pattern_boost(&mut d, Some(&pattern), 0.1));
        assert_relative_eq!(d.confidence, 0.95);

        pattern.auto_approved = true;
        assert!(apply_pattern_boost(&mut d, Some(&pattern), 0.1));
        assert_relative_eq!(d.confidence, 1.0);
        assert!(!apply_pattern_boost(&mut d, None, 0.1));
    }
}
