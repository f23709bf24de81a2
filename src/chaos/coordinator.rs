//! Fault injection coordinator.
//!
//! Runs one injector per leaf fault. Injection errors are aggregated rather
//! than short-circuited; injectors that did inject stay in the active set so
//! they are still verified and cleaned up.

use super::api::ApiInjector;
use super::config::FaultInjectionConfig;
use super::injector::{FaultInjectionResult, FaultInjector};
use super::network::NetworkInjector;
use super::process::ProcessInjector;
use super::types::{FaultScenario, LeafFault, Mechanism};
use crate::client::ControlPlane;
use crate::error::{FailoverError, Result};
use crate::observability;
use crate::remote::RemoteExecutor;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

// ============================================================================
// Events
// ============================================================================

/// Coordinator lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    Injected { mechanism: Mechanism, kind: String },
    InjectionFailed { mechanism: Mechanism, kind: String, error: String },
    Verified { mechanism: Mechanism, kind: String, success: bool },
    CleanedUp { mechanism: Mechanism, kind: String, success: bool },
}

/// Result of a cleanup pass. Failures need manual remediation but never
/// fail the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupOutcome {
    pub results: Vec<FaultInjectionResult>,
    pub failures: Vec<String>,
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.results.iter().all(|r| r.success)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct FaultCoordinator {
    /// Injectors built for the scenario and not yet injected.
    pending: Vec<Box<dyn FaultInjector>>,
    /// Injectors whose `inject` succeeded.
    active: Vec<Box<dyn FaultInjector>>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
}

impl FaultCoordinator {
    /// Build one injector per leaf of `scenario`.
    pub fn from_scenario(
        scenario: &FaultScenario,
        config: &FaultInjectionConfig,
        executor: Arc<dyn RemoteExecutor>,
        primary: Arc<dyn ControlPlane>,
        secondary: Arc<dyn ControlPlane>,
    ) -> Result<Self> {
        let injectors = scenario
            .leaves()?
            .into_iter()
            .map(|leaf| -> Box<dyn FaultInjector> {
                match leaf {
                    LeafFault::Network(fault) => Box::new(NetworkInjector::new(
                        fault,
                        config.network.clone(),
                        executor.clone(),
                    )),
                    LeafFault::Process(fault) => {
                        Box::new(ProcessInjector::new(fault, executor.clone()))
                    }
                    LeafFault::Api(fault) => {
                        Box::new(ApiInjector::new(fault, primary.clone(), secondary.clone()))
                    }
                }
            })
            .collect();

        info!(scenario = scenario.kind(), "Created fault coordinator");
        Ok(Self::with_injectors(injectors))
    }

    pub fn with_injectors(injectors: Vec<Box<dyn FaultInjector>>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            pending: injectors,
            active: Vec::new(),
            event_tx,
        }
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Inject every pending fault.
    pub async fn inject(&mut self) -> Result<Vec<FaultInjectionResult>> {
        if self.pending.is_empty() {
            return Err(FailoverError::FaultInjection(
                "No fault injectors configured".to_string(),
            ));
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for mut injector in std::mem::take(&mut self.pending) {
            let mechanism = injector.mechanism();
            let kind = injector.kind().to_string();
            info!(mechanism = %mechanism, kind = %kind, "Injecting fault");

            match injector.inject().await {
                Ok(result) => {
                    observability::record_fault_action(&mechanism.to_string(), "inject", true);
                    let _ = self.event_tx.send(CoordinatorEvent::Injected {
                        mechanism,
                        kind,
                    });
                    results.push(result);
                    self.active.push(injector);
                }
                Err(e) => {
                    error!(mechanism = %mechanism, kind = %kind, error = %e, "Failed to inject fault");
                    observability::record_fault_action(&mechanism.to_string(), "inject", false);
                    let _ = self.event_tx.send(CoordinatorEvent::InjectionFailed {
                        mechanism,
                        kind,
                        error: e.to_string(),
                    });
                    errors.push(e.to_string());
                }
            }
        }

        if !errors.is_empty() {
            return Err(FailoverError::FaultInjection(format!(
                "Fault injection failed: {}",
                errors.join(", ")
            )));
        }
        Ok(results)
    }

    /// Verify every active fault. Fails if any verifier errors or reports
    /// the fault is not in effect.
    pub async fn verify(&mut self) -> Result<Vec<FaultInjectionResult>> {
        if self.active.is_empty() {
            return Err(FailoverError::FaultInjection(
                "No active fault injectors to verify".to_string(),
            ));
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for injector in self.active.iter_mut() {
            let mechanism = injector.mechanism();
            let kind = injector.kind();
            info!(mechanism = %mechanism, kind, "Verifying fault");

            let success = match injector.verify().await {
                Ok(result) => {
                    let success = result.success;
                    if !success {
                        errors.push(format!("{} fault is not in effect", kind));
                    }
                    results.push(result);
                    success
                }
                Err(e) => {
                    error!(mechanism = %mechanism, kind, error = %e, "Failed to verify fault");
                    errors.push(e.to_string());
                    false
                }
            };

            observability::record_fault_action(&mechanism.to_string(), "verify", success);
            let _ = self.event_tx.send(CoordinatorEvent::Verified {
                mechanism,
                kind: kind.to_string(),
                success,
            });
        }

        if !errors.is_empty() {
            return Err(FailoverError::FaultInjection(format!(
                "Fault verification failed: {}",
                errors.join(", ")
            )));
        }
        Ok(results)
    }

    /// Clean up every active fault and empty the active set.
    pub async fn cleanup(&mut self) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();

        for mut injector in std::mem::take(&mut self.active) {
            let mechanism = injector.mechanism();
            let kind = injector.kind();
            info!(mechanism = %mechanism, kind, "Cleaning up fault");

            let success = match injector.cleanup().await {
                Ok(result) => {
                    let success = result.success;
                    outcome.results.push(result);
                    success
                }
                Err(e) => {
                    warn!(mechanism = %mechanism, kind, error = %e, "Fault cleanup degraded");
                    outcome.failures.push(format!("{} cleanup failed: {}", kind, e));
                    false
                }
            };

            observability::record_fault_action(&mechanism.to_string(), "cleanup", success);
            let _ = self.event_tx.send(CoordinatorEvent::CleanedUp {
                mechanism,
                kind: kind.to_string(),
                success,
            });
        }

        if !outcome.failures.is_empty() {
            warn!(
                failures = %outcome.failures.join(", "),
                "Some fault cleanup operations failed"
            );
        }
        outcome
    }
}
