//! Phase and result types produced by a run.

use crate::data::ReconciliationResult;
use crate::monitor::MetricsValidation;
use crate::types::SiteStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Phases of a failover test, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestPhase {
    Setup,
    PreFailover,
    FaultInjection,
    FailoverMonitoring,
    PostFailover,
    Validation,
    Teardown,
}

impl TestPhase {
    pub const ALL: [TestPhase; 7] = [
        TestPhase::Setup,
        TestPhase::PreFailover,
        TestPhase::FaultInjection,
        TestPhase::FailoverMonitoring,
        TestPhase::PostFailover,
        TestPhase::Validation,
        TestPhase::Teardown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestPhase::Setup => "SETUP",
            TestPhase::PreFailover => "PRE_FAILOVER",
            TestPhase::FaultInjection => "FAULT_INJECTION",
            TestPhase::FailoverMonitoring => "FAILOVER_MONITORING",
            TestPhase::PostFailover => "POST_FAILOVER",
            TestPhase::Validation => "VALIDATION",
            TestPhase::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the optional toolkit check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolkitValidation {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_status: Option<SiteStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failover_detected: Option<bool>,
    pub issues: Vec<String>,
    /// Set when the toolkit could not be queried; the check then passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolkitValidation {
    /// Check that was not run because no toolkit is configured.
    pub fn skipped() -> Self {
        Self {
            success: true,
            secondary_up: None,
            primary_status: None,
            failover_detected: None,
            issues: Vec::new(),
            error: None,
        }
    }
}

/// Folded outcome of the VALIDATION phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub success: bool,
    pub data_validation: ReconciliationResult,
    pub metrics_validation: MetricsValidation,
    pub toolkit_validation: ToolkitValidation,
    pub data_loss_count: usize,
    pub data_loss_percentage: f64,
    pub expected_data_loss_percentage: f64,
    pub rpo_satisfied: bool,
    pub issues: Vec<String>,
}

impl ValidationOutcome {
    /// Combine the individual checks with the RPO gate.
    ///
    /// The gate compares measured loss with the scenario tolerance on its
    /// own, independent of the reconciliation verdict.
    pub fn fold(
        data_validation: ReconciliationResult,
        metrics_validation: MetricsValidation,
        toolkit_validation: ToolkitValidation,
        expected_data_loss_percentage: f64,
    ) -> Self {
        let data_loss_percentage = data_validation.loss_percentage;
        let rpo_satisfied = data_loss_percentage <= expected_data_loss_percentage;

        let mut issues = Vec::new();
        if !data_validation.success {
            issues.extend(data_validation.issues.iter().cloned());
        }
        if !metrics_validation.success {
            issues.extend(metrics_validation.issues.iter().cloned());
        }
        if !toolkit_validation.success {
            issues.extend(toolkit_validation.issues.iter().cloned());
        }
        if !rpo_satisfied {
            issues.push(format!(
                "RPO not satisfied: Loss of {:.2}% exceeds expected {:.2}%",
                data_loss_percentage, expected_data_loss_percentage
            ));
        }

        Self {
            success: data_validation.success
                && metrics_validation.success
                && toolkit_validation.success
                && rpo_satisfied,
            data_loss_count: data_validation.missing_events,
            data_loss_percentage,
            expected_data_loss_percentage,
            rpo_satisfied,
            issues,
            data_validation,
            metrics_validation,
            toolkit_validation,
        }
    }
}

/// Terminal artifact of a run, handed to report generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub description: String,
    pub success: bool,
    pub phases_completed: Vec<TestPhase>,
    pub metrics: Map<String, Value>,
    pub issues: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rto_seconds: Option<f64>,
    pub rpo_events: Option<usize>,
    pub validation: Option<ValidationOutcome>,
}

impl TestResult {
    pub fn duration_seconds(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    pub fn completed(&self, phase: TestPhase) -> bool {
        self.phases_completed.contains(&phase)
    }
}
