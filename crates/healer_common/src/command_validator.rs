//! Remote Command Validator
//!
//! Every command the healer sends to a target host passes through here first,
//! whether it comes from the check catalog, a diagnosis rule or a learned
//! pattern. Rules are applied in order and the first violation wins:
//!
//! 1. Null bytes are rejected.
//! 2. Multi-line scripts are accepted as-is. A single bounded
//!    `for VAR in LIST; do ...; done` loop may use `;` between its body
//!    statements, but each statement still goes through rules 3 and 4.
//! 3. `&&`, `||` and `;` are only allowed in a few fixed shapes.
//! 4. Backtick substitution is rejected.
//! 5. `$(...)` is only allowed as the value of an assignment (`VAR=$(...)`).
//!
//! The only way to obtain a [`ValidatedCommand`] is through this module, so the
//! remote executor cannot be handed an unchecked string.

use crate::error::{HealerError, HealerResult};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

pub const REASON_NULL_BYTE: &str = "Command contains null byte";
pub const REASON_CHAINING: &str = "Dangerous command chaining detected";
pub const REASON_FALLBACK: &str = "Dangerous command fallback detected";
pub const REASON_SEPARATOR: &str = "Command separator ';' not allowed";
pub const REASON_BACKTICK: &str = "Backtick command substitution not allowed";
pub const REASON_SUBSTITUTION: &str = "Command substitution only allowed in variable assignment";
pub const REASON_EMPTY: &str = "Empty command";

static FOR_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*for\s+[A-Za-z_][A-Za-z0-9_]*\s+in\s+[^;&`]+;\s*do\s+(?P<body>.+);\s*done\s*$",
    )
    .expect("valid for-loop regex")
});

/// Loop keywords inside a body mean more than one loop
static LOOP_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:for|done)\b").expect("valid loop keyword regex"));

/// `cd <path> && <cmd>`
static CD_CHAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*cd\s+[^\s;&|`$()]+\s*&&\s*[^&;`\s][^&;`]*$").expect("valid cd regex")
});

/// `test ... && (echo|true|return)`
static TEST_CHAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:test|\[)\s[^&;]*&&\s*(?:echo|true|return)\b[^&;]*$")
        .expect("valid test regex")
});

/// `<var>=$(...) && ...`
static ASSIGN_CHAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*=\$\([^)]*\)\s*&&").expect("valid assignment regex")
});

static TRAILING_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:true|echo|return)\b").expect("valid fallback regex"));

/// Result of validating one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl CommandValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// A command that passed [`validate`]. Cannot be constructed any other way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedCommand(String);

impl ValidatedCommand {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedCommand {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classify a command string as safe or unsafe for remote execution
pub fn validate(command: &str) -> CommandValidation {
    if command.contains('\0') {
        return CommandValidation::rejected(REASON_NULL_BYTE);
    }

    if command.trim().is_empty() {
        return CommandValidation::rejected(REASON_EMPTY);
    }

    // Heredoc-style scripts are vetted by whoever assembled them
    if command.contains('\n') {
        return CommandValidation::ok();
    }

    if let Some(body) = loop_body(command) {
        return match body.split(';').try_for_each(check_statement) {
            Ok(()) => CommandValidation::ok(),
            Err(reason) => CommandValidation::rejected(reason),
        };
    }

    if let Err(reason) = check_statement(command) {
        return CommandValidation::rejected(reason);
    }

    if !substitutions_allowed(command) {
        return CommandValidation::rejected(REASON_SUBSTITUTION);
    }

    CommandValidation::ok()
}

/// Body of a single bounded for-loop. `None` when the command is not exactly
/// one loop, so a second `done` sends it through the normal rules.
fn loop_body(command: &str) -> Option<&str> {
    let body = FOR_LOOP.captures(command)?.name("body")?.as_str();
    if LOOP_KEYWORD.is_match(body) {
        return None;
    }
    Some(body)
}

/// Chaining, fallback, separator and backtick rules for one statement
fn check_statement(statement: &str) -> Result<(), &'static str> {
    if statement.trim().is_empty() {
        return Err(REASON_SEPARATOR);
    }
    if statement.contains("&&") && !chaining_allowed(statement) {
        return Err(REASON_CHAINING);
    }
    if statement.contains("||") && !fallback_allowed(statement) {
        return Err(REASON_FALLBACK);
    }
    if statement.contains(';') {
        return Err(REASON_SEPARATOR);
    }
    if statement.contains('`') {
        return Err(REASON_BACKTICK);
    }
    Ok(())
}

/// Validate and wrap a command, or fail with `CommandRejected`
pub fn validate_command(command: &str) -> HealerResult<ValidatedCommand> {
    let validation = validate(command);
    if validation.valid {
        Ok(ValidatedCommand(command.to_string()))
    } else {
        Err(HealerError::CommandRejected {
            command: command.to_string(),
            reason: validation.reason.unwrap_or_default(),
        })
    }
}

/// Validate a whole remediation; stops at the first rejected command
pub fn validate_all<S: AsRef<str>>(commands: &[S]) -> HealerResult<Vec<ValidatedCommand>> {
    commands
        .iter()
        .map(|c| validate_command(c.as_ref()))
        .collect()
}

fn chaining_allowed(command: &str) -> bool {
    CD_CHAIN.is_match(command) || TEST_CHAIN.is_match(command) || ASSIGN_CHAIN.is_match(command)
}

/// `||` is allowed as a same-verb fallback (`cmd X || cmd Y`) or as a
/// trailing `|| true`, `|| echo ...`, `|| return ...`.
fn fallback_allowed(command: &str) -> bool {
    let parts: Vec<&str> = command.split("||").collect();
    let last = parts.len() - 1;

    parts.windows(2).enumerate().all(|(i, pair)| {
        let (left, right) = (pair[0], pair[1]);
        if right.trim().is_empty() {
            return false;
        }
        if i + 1 == last && TRAILING_FALLBACK.is_match(right) {
            return true;
        }
        match (verb(left), verb(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    })
}

/// First word of the last simple command in a segment
fn verb(segment: &str) -> Option<&str> {
    let tail = segment.rsplit("&&").next().unwrap_or(segment);
    let tail = tail.rsplit('|').next().unwrap_or(tail);
    tail.split_whitespace().next()
}

/// Every `$(` must directly follow `word=`
fn substitutions_allowed(command: &str) -> bool {
    let bytes = command.as_bytes();
    command.match_indices("$(").all(|(idx, _)| {
        idx >= 2 && bytes[idx - 1] == b'=' && {
            let c = bytes[idx - 2];
            c.is_ascii_alphanumeric() || c == b'_'
        }
    })
}
