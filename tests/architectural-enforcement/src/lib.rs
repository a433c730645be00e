//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - The render thread never performs network I/O or sleeps
//! - Nodes read time only through their injected clock
//! - Production code propagates errors instead of panicking
//!
//! The scanner here is line-based. A file's production code is everything
//! above its first `#[cfg(test)]`; comment lines are ignored.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden pattern and why it is forbidden
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Substring that must not appear in production code
    pub pattern: &'static str,
    /// Shown next to each violation
    pub reason: &'static str,
}

/// One offending line
#[derive(Debug, Clone)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The rule that matched
    pub reason: &'static str,
    /// The offending source text
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}: {}", self.path.display(), self.line, self.reason, self.text)
    }
}

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Production lines of a source file with their 1-based numbers
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .collect()
}

/// Apply `rules` to one file's contents
pub fn check_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (line, code) in production_lines(content) {
        for rule in rules {
            if code.contains(rule.pattern) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line,
                    reason: rule.reason,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Apply `rules` to every `.rs` file under `dir` (relative to the workspace root)
pub fn check_directory(dir: &str, rules: &[Rule]) -> Vec<Violation> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        violations.extend(check_source(path, &content, rules));
    }
    violations
}

/// Print violations and fail the test if there are any
pub fn assert_clean(title: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {title}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &[Rule] = &[Rule {
        pattern: "thread::sleep",
        reason: "sleep",
    }];

    #[test]
    fn test_test_modules_and_comments_are_skipped() {
        let src = "fn a() {}\n// thread::sleep in a comment\nfn b() { x(); } // thread::sleep\n#[cfg(test)]\nmod tests { fn c() { std::thread::sleep(d); } }\n";
        assert!(check_source(Path::new("x.rs"), src, RULES).is_empty());
    }

    #[test]
    fn test_production_violation_is_reported() {
        let src = "fn a() {\n    std::thread::sleep(d);\n}\n";
        let found = check_source(Path::new("x.rs"), src, RULES);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].text, "std::thread::sleep(d);");
    }

    #[test]
    fn test_workspace_root_holds_the_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
