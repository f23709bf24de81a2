// Custom test assertions for integration tests

use failover_tester::orchestrator::{TestPhase, TestResult};
use std::time::Duration;
use tokio::time::Instant;

/// Assertion result for detailed error messages
#[derive(Debug)]
pub struct AssertionResult {
    pub passed: bool,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl AssertionResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: String::new(),
            expected: None,
            actual: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn assert(self) {
        if !self.passed {
            let mut msg = self.message;
            if let Some(expected) = self.expected {
                msg.push_str(&format!("\n  expected: {}", expected));
            }
            if let Some(actual) = self.actual {
                msg.push_str(&format!("\n  actual: {}", actual));
            }
            panic!("{}", msg);
        }
    }
}

/// Retry an assertion until it passes or times out.
///
/// Uses tokio time so paused-clock tests advance instead of blocking.
pub async fn assert_eventually<F, Fut>(f: F, timeout: Duration, interval: Duration) -> AssertionResult
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = AssertionResult>,
{
    let start = Instant::now();
    let mut last_result = AssertionResult::fail("No attempts made");

    while start.elapsed() < timeout {
        last_result = f().await;
        if last_result.passed {
            return last_result;
        }
        tokio::time::sleep(interval).await;
    }

    AssertionResult::fail(format!(
        "Assertion did not pass within {:?}: {}",
        timeout, last_result.message
    ))
}

/// Check the exact phase sequence of a result.
pub fn assert_phases(result: &TestResult, expected: &[TestPhase]) -> AssertionResult {
    if result.phases_completed == expected {
        AssertionResult::pass()
    } else {
        AssertionResult::fail("Completed phases differ")
            .with_expected(format!("{:?}", expected))
            .with_actual(format!("{:?}", result.phases_completed))
    }
}

/// Check that some issue contains `needle`.
pub fn assert_issue(result: &TestResult, needle: &str) -> AssertionResult {
    if result.issues.iter().any(|issue| issue.contains(needle)) {
        AssertionResult::pass()
    } else {
        AssertionResult::fail(format!("No issue mentions {:?}", needle))
            .with_actual(format!("{:?}", result.issues))
    }
}
