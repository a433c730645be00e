//! Integration Test: Panic Prohibition
//!
//! A dashboard runs unattended for weeks. Production code propagates errors
//! with `?` and recovers per fetch or per frame; it never unwraps.
//!
//! **Policy**: production code in `grydgets/core/src` and
//! `grydgets/daemon/src` MUST NOT call `.unwrap()`, `.expect("...")`,
//! `panic!` or `todo!`. Test modules are exempt.

use architectural_enforcement::{assert_clean, check_directory, Rule};

const RULES: &[Rule] = &[
    Rule {
        pattern: ".unwrap()",
        reason: "unwrap in production code",
    },
    Rule {
        pattern: ".expect(\"",
        reason: "expect in production code",
    },
    Rule {
        pattern: "panic!(",
        reason: "panic in production code",
    },
    Rule {
        pattern: "todo!(",
        reason: "unfinished code",
    },
];

#[test]
fn test_no_panics_in_core() {
    assert_clean("Panicking calls in grydgets-core", &check_directory("grydgets/core/src", RULES));
}

#[test]
fn test_no_panics_in_daemon() {
    assert_clean("Panicking calls in grydgets-daemon", &check_directory("grydgets/daemon/src", RULES));
}
