//! Property tests for the remote command validator.
//!
//! Commands are generated from a fixed token pool with a seeded xorshift
//! generator so failures are reproducible.
//!
//! ## Properties
//!
//! - Any command containing a null byte is rejected.
//! - Any single-line command containing a backtick is rejected.
//! - `cd <path> && <safe-cmd>` is always accepted.
//! - `&&` outside the whitelisted shapes is always rejected.
//! - Only a single bounded for-loop may use `;`; two loops joined by `&&`
//!   or `;` are rejected.
//! - Validation never panics and always explains a rejection.

use healer_common::command_validator::{
    REASON_BACKTICK, REASON_CHAINING, REASON_NULL_BYTE, REASON_SEPARATOR,
};
use healer_common::{validate, validate_command};

// ============================================================================
// TEST HELPERS
// ============================================================================

struct TestRng {
    state: u64,
}

impl TestRng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[(self.next_u64() % items.len() as u64) as usize]
    }

    fn next_range(&mut self, min: usize, max: usize) -> usize {
        if max <= min {
            return min;
        }
        min + (self.next_u64() % (max - min) as u64) as usize
    }
}

const VERBS: &[&str] = &["wp", "ls", "cat", "grep", "df", "php", "rm", "chmod", "curl"];
const ARGS: &[&str] = &[
    "-la",
    "/srv/site",
    "plugin",
    "deactivate",
    "cache",
    "flush",
    "--path=/srv/site",
    "-n",
    "200",
    "debug.log",
    "|",
    "wc",
    ">",
    "/tmp/out",
];
const PATHS: &[&str] = &["/srv/site", "/var/www/html", "wp-content", "./plugins", "~/app"];

/// Single-line command with no shell control operators
fn simple_command(rng: &mut TestRng) -> String {
    let mut parts = vec![rng.pick(VERBS).to_string()];
    for _ in 0..rng.next_range(0, 5) {
        parts.push(rng.pick(ARGS).to_string());
    }
    parts.join(" ")
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn test_prop_null_byte_always_rejected() {
    let mut rng = TestRng::new(7);
    for _ in 0..500 {
        let mut cmd = simple_command(&mut rng);
        let at = rng.next_range(0, cmd.len() + 1);
        cmd.insert(at, '\0');
        if rng.next_u64() % 2 == 0 {
            cmd.push_str("\nsecond line");
        }

        let result = validate(&cmd);
        assert!(!result.valid, "accepted null byte: {:?}", cmd);
        assert_eq!(result.reason.as_deref(), Some(REASON_NULL_BYTE));
    }
}

#[test]
fn test_prop_backtick_always_rejected_on_single_line() {
    let mut rng = TestRng::new(11);
    for _ in 0..500 {
        let inner = simple_command(&mut rng);
        let cmd = format!("{} `{}`", rng.pick(VERBS), inner);

        let result = validate(&cmd);
        assert!(!result.valid, "accepted backtick: {:?}", cmd);
        assert_eq!(result.reason.as_deref(), Some(REASON_BACKTICK));
    }
}

#[test]
fn test_prop_cd_chain_always_accepted() {
    let mut rng = TestRng::new(23);
    for _ in 0..500 {
        let cmd = format!("cd {} && {}", rng.pick(PATHS), simple_command(&mut rng));
        let result = validate(&cmd);
        assert!(result.valid, "rejected cd chain {:?}: {:?}", cmd, result.reason);
    }
}

#[test]
fn test_prop_other_and_chains_rejected() {
    let mut rng = TestRng::new(31);
    for _ in 0..500 {
        let left = simple_command(&mut rng);
        let right = simple_command(&mut rng);
        let cmd = format!("{} && {}", left, right);

        let result = validate(&cmd);
        assert!(!result.valid, "accepted chain: {:?}", cmd);
        assert_eq!(result.reason.as_deref(), Some(REASON_CHAINING));
    }
}

fn for_loop(rng: &mut TestRng) -> String {
    format!(
        "for item in {} {}; do {}; done",
        rng.pick(PATHS),
        rng.pick(PATHS),
        simple_command(rng)
    )
}

#[test]
fn test_prop_single_for_loop_accepted() {
    let mut rng = TestRng::new(41);
    for _ in 0..500 {
        let cmd = for_loop(&mut rng);
        let result = validate(&cmd);
        assert!(result.valid, "rejected loop {:?}: {:?}", cmd, result.reason);
    }
}

#[test]
fn test_prop_joined_for_loops_rejected() {
    let mut rng = TestRng::new(43);
    for _ in 0..500 {
        let first = for_loop(&mut rng);
        let middle = simple_command(&mut rng);
        let last = for_loop(&mut rng);

        let chained = format!("{} && {} && {}", first, middle, last);
        let result = validate(&chained);
        assert!(!result.valid, "accepted joined loops: {:?}", chained);
        assert_eq!(result.reason.as_deref(), Some(REASON_CHAINING));

        let separated = format!("{}; {}; {}", first, middle, last);
        let result = validate(&separated);
        assert!(!result.valid, "accepted joined loops: {:?}", separated);
        assert_eq!(result.reason.as_deref(), Some(REASON_SEPARATOR));
    }
}

#[test]
fn test_prop_rejections_carry_reason() {
    let mut rng = TestRng::new(97);
    let operators = ["&&", "||", ";", "`", "$(", "\0", " "];
    for _ in 0..1000 {
        let mut cmd = simple_command(&mut rng);
        for _ in 0..rng.next_range(0, 3) {
            cmd.push_str(operators[rng.next_range(0, operators.len())]);
            cmd.push_str(&simple_command(&mut rng));
        }

        let result = validate(&cmd);
        if result.valid {
            assert!(result.reason.is_none());
            assert_eq!(validate_command(&cmd).unwrap().as_str(), cmd);
        } else {
            assert!(result.reason.is_some(), "no reason for {:?}", cmd);
            assert!(validate_command(&cmd).is_err());
        }
    }
}

#[test]
fn test_scenario_dangerous_chaining() {
    let result = validate("rm file && rm -rf /");
    assert!(!result.valid);
    assert_eq!(result.reason.as_deref(), Some("Dangerous command chaining detected"));
}
