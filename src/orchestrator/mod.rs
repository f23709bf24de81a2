//! Test orchestration.
//!
//! [`TestOrchestrator`] drives one scenario through a fixed phase sequence:
//!
//! ```text
//! SETUP → PRE_FAILOVER → FAULT_INJECTION → FAILOVER_MONITORING
//!       → POST_FAILOVER → VALIDATION → TEARDOWN
//! ```
//!
//! Phases run strictly in order. An error in any phase before TEARDOWN is
//! recorded as an issue and jumps straight to TEARDOWN, which always runs
//! unless cleanup was suppressed. `run_test` never fails; everything ends
//! up in the returned [`TestResult`].

mod result;

pub use result::{TestPhase, TestResult, ToolkitValidation, ValidationOutcome};

use crate::chaos::FaultCoordinator;
use crate::client::{ControlPlane, DataExchange, DataExchangeClient, StreamsClient, ToolkitClient};
use crate::config::{TestScenario, TesterConfig};
use crate::data::DataHandler;
use crate::error::{FailoverError, Result};
use crate::monitor::MetricsMonitor;
use crate::observability;
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::types::{Site, SiteStatus};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Remote collaborators used by a run.
#[derive(Clone)]
pub struct Collaborators {
    pub primary: Arc<dyn ControlPlane>,
    pub secondary: Arc<dyn ControlPlane>,
    pub exchange: Arc<dyn DataExchange>,
    pub executor: Arc<dyn RemoteExecutor>,
}

impl Collaborators {
    /// Real HTTP and SSH clients built from configuration.
    pub fn from_config(config: &TesterConfig) -> Result<Self> {
        let primary: Arc<dyn ControlPlane> = Arc::new(StreamsClient::from_config(
            config.datacenters.get(Site::Primary),
            &config.api,
        )?);
        let secondary: Arc<dyn ControlPlane> = Arc::new(StreamsClient::from_config(
            config.datacenters.get(Site::Secondary),
            &config.api,
        )?);
        let exchange = Arc::new(DataExchangeClient::new(
            primary.clone(),
            secondary.clone(),
            config.data_exchange.clone(),
        ));
        let executor = Arc::new(SshExecutor::new(config.fault_injection.ssh.clone()));

        Ok(Self {
            primary,
            secondary,
            exchange,
            executor,
        })
    }
}

/// Run options that do not come from configuration files.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Leave injected faults in place for debugging.
    pub skip_cleanup: bool,
}

/// State accumulated while phases run.
#[derive(Default)]
struct RunState {
    phases_completed: Vec<TestPhase>,
    failover_metrics: Map<String, Value>,
    rto_seconds: Option<f64>,
    validation: Option<ValidationOutcome>,
}

pub struct TestOrchestrator {
    config: TesterConfig,
    scenario: TestScenario,
    options: RunOptions,
    executor: Arc<dyn RemoteExecutor>,
    coordinator: FaultCoordinator,
    monitor: MetricsMonitor,
    data: DataHandler,
    toolkit: Option<ToolkitClient>,
}

impl TestOrchestrator {
    /// Build an orchestrator, validating the scenario before anything runs.
    pub fn new(
        config: TesterConfig,
        scenario: TestScenario,
        collaborators: Collaborators,
        options: RunOptions,
    ) -> Result<Self> {
        scenario.validate()?;

        let coordinator = FaultCoordinator::from_scenario(
            &scenario.fault_scenario,
            &config.fault_injection,
            collaborators.executor.clone(),
            collaborators.primary.clone(),
            collaborators.secondary.clone(),
        )?;

        let mut monitor_config = config.clone();
        if monitor_config.monitoring.job_id.is_none() {
            monitor_config.monitoring.job_id = scenario.job_id.clone();
        }
        let monitor = MetricsMonitor::from_config(
            &monitor_config,
            collaborators.primary.clone(),
            collaborators.secondary.clone(),
        )?;

        let data = DataHandler::new(collaborators.exchange.clone(), &config, &scenario);

        let toolkit = config.crossdc_toolkit.clone().map(|mut toolkit_config| {
            if toolkit_config.instance_id.is_none() {
                toolkit_config.instance_id = config.datacenters.get(Site::Primary).instance_id.clone();
            }
            if toolkit_config.job_id.is_none() {
                toolkit_config.job_id = scenario.job_id.clone().or_else(|| config.monitoring.job_id.clone());
            }
            ToolkitClient::new(
                collaborators.primary.clone(),
                collaborators.secondary.clone(),
                toolkit_config,
            )
        });

        info!(
            test_id = %scenario.test_id,
            fault = scenario.fault_scenario.kind(),
            skip_cleanup = options.skip_cleanup,
            "Test orchestrator initialized"
        );

        Ok(Self {
            config,
            scenario,
            options,
            executor: collaborators.executor,
            coordinator,
            monitor,
            data,
            toolkit,
        })
    }

    /// Build an orchestrator with real remote clients.
    pub fn connect(config: TesterConfig, scenario: TestScenario, options: RunOptions) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::new(config, scenario, collaborators, options)
    }

    pub fn scenario(&self) -> &TestScenario {
        &self.scenario
    }

    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    /// Execute every phase and return the frozen result.
    pub async fn run_test(&mut self) -> TestResult {
        let start_time = Utc::now();
        let mut run = RunState::default();
        let mut issues = Vec::new();

        info!(test_id = %self.scenario.test_id, "Starting failover test");

        let success = match self.run_phases(&mut run).await {
            Ok(()) => {
                let outcome = run.validation.as_ref();
                let success = outcome.map(|v| v.success).unwrap_or(false);
                if let Some(outcome) = outcome.filter(|v| !v.success) {
                    issues.extend(outcome.issues.iter().cloned());
                }
                success
            }
            Err((phase, e)) => {
                error!(phase = %phase, error = %e, "Phase failed");
                issues.push(format!("Error in phase {}: {}", phase, e));
                false
            }
        };

        if self.options.skip_cleanup {
            info!("Skipping teardown phase as requested");
            self.monitor.stop().await;
        } else {
            info!(phase = %TestPhase::Teardown, "Starting phase");
            let started = Instant::now();
            let teardown_issues = self.teardown().await;
            observability::record_phase(TestPhase::Teardown.name(), teardown_issues.is_empty(), started.elapsed());
            if teardown_issues.is_empty() {
                run.phases_completed.push(TestPhase::Teardown);
            }
            issues.extend(teardown_issues);
        }

        let mut metrics = self.monitor.all_metrics();
        metrics.extend(run.failover_metrics);

        let result = TestResult {
            test_id: self.scenario.test_id.clone(),
            description: self.scenario.description.clone(),
            success,
            phases_completed: run.phases_completed,
            metrics,
            issues,
            start_time,
            end_time: Utc::now(),
            rto_seconds: run.rto_seconds,
            rpo_events: run.validation.as_ref().map(|v| v.data_loss_count),
            validation: run.validation,
        };

        info!(
            test_id = %result.test_id,
            success = result.success,
            duration_secs = result.duration_seconds(),
            issues = result.issues.len(),
            "Failover test finished"
        );
        result
    }

    async fn run_phases(&mut self, run: &mut RunState) -> std::result::Result<(), (TestPhase, FailoverError)> {
        for phase in &TestPhase::ALL[..TestPhase::ALL.len() - 1] {
            info!(phase = %phase, "Starting phase");
            let started = Instant::now();
            let outcome = self.execute(*phase, run).await;
            observability::record_phase(phase.name(), outcome.is_ok(), started.elapsed());

            match outcome {
                Ok(()) => run.phases_completed.push(*phase),
                Err(e) => return Err((*phase, e)),
            }
        }
        Ok(())
    }

    async fn execute(&mut self, phase: TestPhase, run: &mut RunState) -> Result<()> {
        match phase {
            TestPhase::Setup => self.setup().await,
            TestPhase::PreFailover => self.pre_failover(run).await,
            TestPhase::FaultInjection => self.fault_injection(run).await,
            TestPhase::FailoverMonitoring => self.failover_monitoring(run).await,
            TestPhase::PostFailover => self.post_failover().await,
            TestPhase::Validation => {
                run.validation = Some(self.validation().await);
                Ok(())
            }
            TestPhase::Teardown => Err(FailoverError::Internal(
                "teardown is not part of the main phase sequence".to_string(),
            )),
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn setup(&mut self) -> Result<()> {
        info!("Initializing monitoring");
        self.monitor.start();

        if let Some(toolkit) = &self.toolkit {
            match toolkit.get_failover_status().await {
                Ok(status) => info!(
                    primary = %status.primary_dc_status,
                    secondary = %status.secondary_dc_status,
                    "Initial toolkit status"
                ),
                Err(e) => warn!(error = %e, "Error getting initial toolkit status"),
            }
        }
        Ok(())
    }

    async fn pre_failover(&mut self, run: &mut RunState) -> Result<()> {
        info!("Injecting test data");
        let injection = self.data.generate_and_inject().await?;
        run.failover_metrics.insert("data_injection".into(), serde_json::to_value(&injection)?);

        self.monitor.collect_baseline().await;
        Ok(())
    }

    async fn fault_injection(&mut self, run: &mut RunState) -> Result<()> {
        info!("Applying fault scenario");
        let injected = self.coordinator.inject().await?;
        run.failover_metrics.insert("fault_injection".into(), serde_json::to_value(&injected)?);

        info!("Verifying fault has been applied");
        self.coordinator.verify().await?;
        Ok(())
    }

    async fn failover_monitoring(&mut self, run: &mut RunState) -> Result<()> {
        let timeout = self.scenario.failover_timeout();
        let start = Utc::now();
        let (detected, elapsed) = self.monitor.wait_for_failover(timeout).await;
        let end = Utc::now();

        let recovery_time = elapsed.as_secs_f64();
        if detected {
            info!(recovery_secs = recovery_time, "Failover completed");
            run.rto_seconds = Some(recovery_time);
        } else {
            warn!(timeout_secs = timeout.as_secs_f64(), "Failover did not complete within expected time");
        }

        let metrics = &mut run.failover_metrics;
        metrics.insert("failover_start_time".into(), json!(start.timestamp_millis() as f64 / 1000.0));
        metrics.insert("failover_end_time".into(), json!(end.timestamp_millis() as f64 / 1000.0));
        metrics.insert("recovery_time_seconds".into(), json!(recovery_time));
        metrics.insert(
            "expected_recovery_time_seconds".into(),
            json!(self.scenario.expected_recovery_time_seconds),
        );
        metrics.insert("failover_completed".into(), json!(detected));

        if let Some(toolkit) = &self.toolkit {
            match toolkit.get_failover_status().await {
                Ok(status) => {
                    metrics.insert("toolkit_status".into(), serde_json::to_value(&status)?);
                }
                Err(e) => warn!(error = %e, "Error getting toolkit status"),
            }
            metrics.insert("toolkit_metrics".into(), toolkit.get_toolkit_metrics().await);
        }
        Ok(())
    }

    async fn post_failover(&mut self) -> Result<()> {
        if let Some(toolkit) = &self.toolkit {
            let availability = toolkit.get_service_availability().await;
            if availability.secondary_dc_available {
                info!("Service is available in the secondary DC");
            } else {
                warn!("Service is NOT available in the secondary DC");
            }
        }

        self.monitor.collect_post_failover().await;

        info!("Retrieving processed data");
        self.data.retrieve_processed().await?;
        Ok(())
    }

    async fn validation(&mut self) -> ValidationOutcome {
        info!("Validating data integrity");
        let data_validation = self.data.validate();

        info!("Evaluating performance metrics");
        let metrics_validation = self.monitor.validate_metrics(&self.scenario.expected_metrics);

        let toolkit_validation = match &self.toolkit {
            Some(toolkit) => validate_toolkit(toolkit).await,
            None => ToolkitValidation::skipped(),
        };

        let outcome = ValidationOutcome::fold(
            data_validation,
            metrics_validation,
            toolkit_validation,
            self.scenario.expected_data_loss_percentage,
        );
        if !outcome.rpo_satisfied {
            warn!(
                loss_percentage = outcome.data_loss_percentage,
                expected = outcome.expected_data_loss_percentage,
                "RPO not satisfied"
            );
        }
        outcome
    }

    /// Best-effort cleanup. Returns issues; never fails the run.
    async fn teardown(&mut self) -> Vec<String> {
        info!("Cleaning up fault injection");
        let cleanup = self.coordinator.cleanup().await;
        let issues: Vec<String> = cleanup
            .failures
            .iter()
            .map(|failure| format!("Error in teardown phase: {}", failure))
            .collect();
        for issue in &issues {
            warn!(issue = %issue, "Cleanup left the environment degraded");
        }

        info!("Stopping metrics collection");
        self.monitor.stop().await;
        self.executor.close().await;
        issues
    }
}

async fn validate_toolkit(toolkit: &ToolkitClient) -> ToolkitValidation {
    match toolkit.get_failover_status().await {
        Ok(status) => {
            let secondary_up = status.secondary_dc_status == SiteStatus::Up;
            let mut issues = Vec::new();
            if !secondary_up {
                issues.push("Secondary DC is not up after failover".to_string());
            }
            if !status.failover_detected {
                issues.push("Failover not detected by toolkit".to_string());
            }
            ToolkitValidation {
                success: secondary_up && status.failover_detected,
                secondary_up: Some(secondary_up),
                primary_status: Some(status.primary_dc_status),
                failover_detected: Some(status.failover_detected),
                issues,
                error: None,
            }
        }
        Err(e) => {
            warn!(error = %e, "Error validating toolkit status");
            ToolkitValidation {
                error: Some(e.to_string()),
                ..ToolkitValidation::skipped()
            }
        }
    }
}
