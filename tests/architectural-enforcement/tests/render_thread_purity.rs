//! Integration Test: Render Thread Purity
//!
//! `tick()`, `is_dirty()` and `render()` run on the render thread once per
//! frame. Nodes get external data from provider caches or their own worker
//! threads, and read time through the injected clock so tests can drive it.
//!
//! **Policy**: production code under `grydgets/core/src/node` and
//! `grydgets/core/src/tree` MUST NOT:
//! - open network connections (`reqwest`, `std::net`)
//! - sleep (`thread::sleep`)
//! - read the system clock directly (`Instant::now`, `Local::now`, `SystemTime::now`)

use architectural_enforcement::{assert_clean, check_directory, Rule};

const NETWORK: &[Rule] = &[
    Rule {
        pattern: "reqwest",
        reason: "HTTP client used by a node",
    },
    Rule {
        pattern: "std::net",
        reason: "Socket used by a node",
    },
];

const SLEEP: &[Rule] = &[Rule {
    pattern: "thread::sleep",
    reason: "Sleep on the render path",
}];

const CLOCK: &[Rule] = &[
    Rule {
        pattern: "Instant::now()",
        reason: "System clock read outside Clock",
    },
    Rule {
        pattern: "Local::now()",
        reason: "System clock read outside Clock",
    },
    Rule {
        pattern: "SystemTime::now()",
        reason: "System clock read outside Clock",
    },
];

const RENDER_DIRS: &[&str] = &["grydgets/core/src/node", "grydgets/core/src/tree"];

fn scan(rules: &[Rule]) -> Vec<architectural_enforcement::Violation> {
    RENDER_DIRS.iter().flat_map(|dir| check_directory(dir, rules)).collect()
}

#[test]
fn test_no_network_io_in_nodes() {
    assert_clean("Network I/O in node code (use a provider or Refresher)", &scan(NETWORK));
}

#[test]
fn test_no_sleep_in_nodes() {
    assert_clean("Sleep in node code", &scan(SLEEP));
}

#[test]
fn test_nodes_read_time_through_clock() {
    assert_clean("Direct clock reads in node code (use SharedClock)", &scan(CLOCK));
}
