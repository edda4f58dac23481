//! Language ecosystems: how to build, test and lint a component.
//!
//! Each ecosystem is a capability set behind the [`Ecosystem`] trait. The
//! registry holds them in registration order and detection asks each in turn,
//! so there is exactly one place that probes for marker files.

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;

static CARGO_RESULT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed").unwrap()
});

static JEST_TESTS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:\d+ skipped, )?(\d+) passed").unwrap());

static MOCHA_PASSING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) passing").unwrap());

static MOCHA_FAILING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) failing").unwrap());

static PYTEST_PASSED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) passed").unwrap());

static PYTEST_FAILED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (?:failed|error)").unwrap());

static GO_PASS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*--- PASS:").unwrap());

static GO_FAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*--- FAIL:").unwrap());

/// Pass/fail counts parsed from a test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
}

impl TestSummary {
    pub fn total(&self) -> u32 {
        self.passed + self.failed
    }
}

pub trait Ecosystem: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `dir` is a project of this ecosystem.
    fn detect(&self, dir: &Path) -> bool;

    fn build_command(&self) -> Option<&'static str>;

    fn test_command(&self) -> Option<&'static str>;

    fn lint_command(&self) -> Option<&'static str>;

    /// Extract pass/fail counts from combined test output.
    fn parse_test_summary(&self, output: &str) -> Option<TestSummary>;
}

fn capture_sum(regex: &Regex, output: &str, group: usize) -> Option<u32> {
    let mut found = false;
    let mut total = 0u32;
    for caps in regex.captures_iter(output) {
        if let Some(m) = caps.get(group)
            && let Ok(n) = m.as_str().parse::<u32>()
        {
            found = true;
            total += n;
        }
    }
    found.then_some(total)
}

pub struct Cargo;

impl Ecosystem for Cargo {
    fn name(&self) -> &'static str {
        "cargo"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("Cargo.toml").is_file()
    }

    fn build_command(&self) -> Option<&'static str> {
        Some("cargo build")
    }

    fn test_command(&self) -> Option<&'static str> {
        Some("cargo test")
    }

    fn lint_command(&self) -> Option<&'static str> {
        Some("cargo clippy -- -D warnings")
    }

    fn parse_test_summary(&self, output: &str) -> Option<TestSummary> {
        let passed = capture_sum(&CARGO_RESULT_REGEX, output, 1)?;
        let failed = capture_sum(&CARGO_RESULT_REGEX, output, 2).unwrap_or(0);
        Some(TestSummary { passed, failed })
    }
}

pub struct Npm;

impl Ecosystem for Npm {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("package.json").is_file()
    }

    fn build_command(&self) -> Option<&'static str> {
        Some("npm run build --if-present")
    }

    fn test_command(&self) -> Option<&'static str> {
        Some("npm test")
    }

    fn lint_command(&self) -> Option<&'static str> {
        Some("npm run lint --if-present")
    }

    fn parse_test_summary(&self, output: &str) -> Option<TestSummary> {
        if let Some(caps) = JEST_TESTS_REGEX.captures(output) {
            let failed = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let passed = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            return Some(TestSummary { passed, failed });
        }
        let passed = capture_sum(&MOCHA_PASSING_REGEX, output, 1)?;
        let failed = capture_sum(&MOCHA_FAILING_REGEX, output, 1).unwrap_or(0);
        Some(TestSummary { passed, failed })
    }
}

pub struct Python;

impl Ecosystem for Python {
    fn name(&self) -> &'static str {
        "python"
    }

    fn detect(&self, dir: &Path) -> bool {
        ["pyproject.toml", "setup.py", "requirements.txt"]
            .iter()
            .any(|f| dir.join(f).is_file())
    }

    fn build_command(&self) -> Option<&'static str> {
        None
    }

    fn test_command(&self) -> Option<&'static str> {
        Some("python -m pytest -q")
    }

    fn lint_command(&self) -> Option<&'static str> {
        Some("python -m ruff check .")
    }

    fn parse_test_summary(&self, output: &str) -> Option<TestSummary> {
        // pytest's final line, e.g. "3 failed, 12 passed in 0.52s"
        let line = output
            .lines()
            .rev()
            .find(|l| PYTEST_PASSED_REGEX.is_match(l) || PYTEST_FAILED_REGEX.is_match(l))?;
        Some(TestSummary {
            passed: capture_sum(&PYTEST_PASSED_REGEX, line, 1).unwrap_or(0),
            failed: capture_sum(&PYTEST_FAILED_REGEX, line, 1).unwrap_or(0),
        })
    }
}

pub struct Go;

impl Ecosystem for Go {
    fn name(&self) -> &'static str {
        "go"
    }

    fn detect(&self, dir: &Path) -> bool {
        dir.join("go.mod").is_file()
    }

    fn build_command(&self) -> Option<&'static str> {
        Some("go build ./...")
    }

    fn test_command(&self) -> Option<&'static str> {
        Some("go test -v ./...")
    }

    fn lint_command(&self) -> Option<&'static str> {
        Some("go vet ./...")
    }

    fn parse_test_summary(&self, output: &str) -> Option<TestSummary> {
        let passed = GO_PASS_REGEX.find_iter(output).count() as u32;
        let failed = GO_FAIL_REGEX.find_iter(output).count() as u32;
        (passed + failed > 0).then_some(TestSummary { passed, failed })
    }
}

/// Explicitly registered ecosystems, probed in registration order.
#[derive(Default)]
pub struct EcosystemRegistry {
    ecosystems: Vec<Box<dyn Ecosystem>>,
}

impl EcosystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in ecosystem.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(Cargo));
        registry.register(Box::new(Npm));
        registry.register(Box::new(Python));
        registry.register(Box::new(Go));
        registry
    }

    pub fn register(&mut self, ecosystem: Box<dyn Ecosystem>) {
        self.ecosystems.push(ecosystem);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.ecosystems.iter().map(|e| e.name()).collect()
    }

    /// The first registered ecosystem that recognizes `dir`.
    pub fn detect(&self, dir: &Path) -> Option<&dyn Ecosystem> {
        self.ecosystems
            .iter()
            .find(|e| e.detect(dir))
            .map(|e| e.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detect_by_marker_file() {
        let registry = EcosystemRegistry::with_defaults();
        let dir = tempdir().unwrap();
        assert!(registry.detect(dir.path()).is_none());

        std::fs::write(dir.path().join("go.mod"), "module x").unwrap();
        assert_eq!(registry.detect(dir.path()).unwrap().name(), "go");

        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(registry.detect(dir.path()).unwrap().name(), "cargo");
    }

    #[test]
    fn test_registration_order_decides() {
        let mut registry = EcosystemRegistry::new();
        registry.register(Box::new(Go));
        registry.register(Box::new(Cargo));
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        assert_eq!(registry.detect(dir.path()).unwrap().name(), "go");
        assert_eq!(registry.names(), vec!["go", "cargo"]);
    }

    #[test]
    fn test_cargo_summary_sums_binaries() {
        let output = "\
running 3 tests
test result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out
running 2 tests
test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out
";
        assert_eq!(
            Cargo.parse_test_summary(output),
            Some(TestSummary { passed: 4, failed: 1 })
        );
        assert_eq!(Cargo.parse_test_summary("error: could not compile"), None);
    }

    #[test]
    fn test_jest_and_mocha_summaries() {
        assert_eq!(
            Npm.parse_test_summary("Tests:       2 failed, 5 passed, 7 total"),
            Some(TestSummary { passed: 5, failed: 2 })
        );
        assert_eq!(
            Npm.parse_test_summary("Tests:       9 passed, 9 total"),
            Some(TestSummary { passed: 9, failed: 0 })
        );
        assert_eq!(
            Npm.parse_test_summary("  12 passing (30ms)\n  3 failing\n"),
            Some(TestSummary { passed: 12, failed: 3 })
        );
    }

    #[test]
    fn test_pytest_summary() {
        let output = "....F\n=== 1 failed, 4 passed in 0.12s ===\n";
        assert_eq!(
            Python.parse_test_summary(output),
            Some(TestSummary { passed: 4, failed: 1 })
        );
        assert_eq!(Python.parse_test_summary("no tests ran"), None);
    }

    #[test]
    fn test_go_summary() {
        let output = "=== RUN TestA\n--- PASS: TestA (0.00s)\n=== RUN TestB\n--- FAIL: TestB (0.00s)\n";
        assert_eq!(
            Go.parse_test_summary(output),
            Some(TestSummary { passed: 1, failed: 1 })
        );
        assert_eq!(Go.parse_test_summary("ok  \tpkg\t0.1s"), None);
    }
}
