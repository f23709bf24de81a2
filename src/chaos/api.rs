//! Faults issued through the control-plane API.

use super::injector::{FaultInjectionResult, FaultInjector, RemoteAction};
use super::types::{ApiFault, ApiOperation, Mechanism};
use crate::client::{ApiRequest, ControlPlane};
use crate::error::{FailoverError, Result};
use crate::types::Site;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Ways of pausing a job, tried in order until one is not a 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseStrategy {
    /// Dedicated `pause` endpoint.
    PauseEndpoint,
    /// Generic job state update.
    StatePatch,
}

impl PauseStrategy {
    pub const ORDERED: [PauseStrategy; 2] = [PauseStrategy::PauseEndpoint, PauseStrategy::StatePatch];

    pub fn request(&self, instance_id: &str, job_id: &str) -> ApiRequest {
        let job_path = format!("instances/{}/jobs/{}", instance_id, job_id);
        match self {
            PauseStrategy::PauseEndpoint => ApiRequest::new(Method::PUT, format!("{}/pause", job_path)),
            PauseStrategy::StatePatch => {
                ApiRequest::new(Method::PATCH, job_path).json(json!({"state": "paused"}))
            }
        }
    }
}

pub struct ApiInjector {
    fault: ApiFault,
    primary: Arc<dyn ControlPlane>,
    secondary: Arc<dyn ControlPlane>,
    /// Requests accepted by the control plane.
    injected: Vec<RemoteAction>,
}

impl ApiInjector {
    pub fn new(fault: ApiFault, primary: Arc<dyn ControlPlane>, secondary: Arc<dyn ControlPlane>) -> Self {
        Self {
            fault,
            primary,
            secondary,
            injected: Vec::new(),
        }
    }

    fn client(&self, site: Site) -> &dyn ControlPlane {
        match site {
            Site::Primary => self.primary.as_ref(),
            Site::Secondary => self.secondary.as_ref(),
        }
    }

    fn kind_str(&self) -> &'static str {
        operation_kind(&self.fault.operation)
    }

    async fn send(&mut self, request: ApiRequest) -> Result<Value> {
        let site = self.fault.datacenter;
        let action = RemoteAction::Api {
            site,
            method: request.method.to_string(),
            path: request.path.clone(),
        };
        let response = self.client(site).send(request).await?;
        self.injected.push(action);
        Ok(response)
    }

    async fn pause(&mut self, instance_id: &str, job_id: &str) -> Result<(Value, PauseStrategy)> {
        let mut last_error = None;
        for strategy in PauseStrategy::ORDERED {
            match self.send(strategy.request(instance_id, job_id)).await {
                Ok(response) => return Ok((response, strategy)),
                Err(e) if e.is_not_found() => {
                    warn!(strategy = ?strategy, "Pause strategy not supported, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| FailoverError::Internal("no pause strategy".to_string())))
    }

    async fn apply(&mut self) -> Result<FaultInjectionResult> {
        let datacenter = self.fault.datacenter;
        let details = match self.fault.operation.clone() {
            ApiOperation::StopJob { instance_id, job_id } => {
                let response = self
                    .send(ApiRequest::new(
                        Method::DELETE,
                        format!("instances/{}/jobs/{}", instance_id, job_id),
                    ))
                    .await?;
                info!(job_id = %job_id, datacenter = %datacenter, "Stopped job");
                json!({"instance_id": instance_id, "job_id": job_id, "response": response})
            }
            ApiOperation::PauseJob { instance_id, job_id } => {
                let (response, strategy) = self.pause(&instance_id, &job_id).await?;
                info!(job_id = %job_id, strategy = ?strategy, "Paused job");
                json!({
                    "instance_id": instance_id,
                    "job_id": job_id,
                    "strategy": format!("{:?}", strategy),
                    "response": response,
                })
            }
            ApiOperation::TerminateInstance { instance_id } => {
                let response = self
                    .send(ApiRequest::new(Method::DELETE, format!("instances/{}", instance_id)))
                    .await?;
                info!(instance_id = %instance_id, "Terminated instance");
                json!({"instance_id": instance_id, "response": response})
            }
            ApiOperation::DisableOperator {
                instance_id,
                job_id,
                operator_id,
            } => {
                let response = self
                    .send(
                        ApiRequest::new(
                            Method::PATCH,
                            format!(
                                "instances/{}/jobs/{}/operators/{}",
                                instance_id, job_id, operator_id
                            ),
                        )
                        .json(json!({"enabled": false})),
                    )
                    .await?;
                info!(operator_id = %operator_id, "Disabled operator");
                json!({
                    "instance_id": instance_id,
                    "job_id": job_id,
                    "operator_id": operator_id,
                    "response": response,
                })
            }
            ApiOperation::TriggerFailover { instance_id, job_id } => {
                let response = self
                    .send(ApiRequest::new(
                        Method::POST,
                        format!("instances/{}/jobs/{}/failover/trigger", instance_id, job_id),
                    ))
                    .await?;
                info!(job_id = %job_id, "Triggered failover");
                json!({"instance_id": instance_id, "job_id": job_id, "response": response})
            }
        };

        let mut details = details;
        details["datacenter"] = json!(datacenter);
        Ok(
            FaultInjectionResult::new(true, Mechanism::Api, self.kind_str(), details)
                .with_actions(self.injected.clone()),
        )
    }

    async fn check(&self) -> Result<(bool, Value)> {
        let client = self.client(self.fault.datacenter);

        let outcome = match &self.fault.operation {
            ApiOperation::StopJob { instance_id, job_id } => {
                match client.get_job(instance_id, job_id).await {
                    Ok(job) => {
                        let state = job.state.to_ascii_lowercase();
                        let stopped = matches!(state.as_str(), "canceled" | "cancelled" | "stopped");
                        (stopped, json!({"job_id": job_id, "job_state": state}))
                    }
                    Err(e) if e.is_not_found() => {
                        (true, json!({"job_id": job_id, "job_state": "not_found"}))
                    }
                    Err(e) => return Err(e),
                }
            }
            ApiOperation::PauseJob { instance_id, job_id } => {
                let job = client.get_job(instance_id, job_id).await?;
                let state = job.state.to_ascii_lowercase();
                (state == "paused", json!({"job_id": job_id, "job_state": state, "expected_state": "paused"}))
            }
            ApiOperation::TerminateInstance { instance_id } => {
                match client.get_instance(instance_id).await {
                    Ok(instance) => {
                        let status = instance.status.to_ascii_lowercase();
                        let terminated =
                            matches!(status.as_str(), "stopped" | "terminated" | "stopping");
                        (terminated, json!({"instance_id": instance_id, "instance_status": status}))
                    }
                    Err(e) if e.is_not_found() => (
                        true,
                        json!({"instance_id": instance_id, "instance_status": "not_found"}),
                    ),
                    Err(e) => return Err(e),
                }
            }
            ApiOperation::DisableOperator {
                instance_id,
                job_id,
                operator_id,
            } => {
                let operator = client
                    .send(ApiRequest::get(format!(
                        "instances/{}/jobs/{}/operators/{}",
                        instance_id, job_id, operator_id
                    )))
                    .await?;
                let enabled = operator.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                (
                    !enabled,
                    json!({"operator_id": operator_id, "operator_enabled": enabled, "expected_enabled": false}),
                )
            }
            ApiOperation::TriggerFailover { instance_id, job_id } => {
                match self.secondary.get_job(instance_id, job_id).await {
                    Ok(job) => {
                        let running = job.state.eq_ignore_ascii_case("running") && job.is_healthy();
                        (
                            running,
                            json!({
                                "job_id": job_id,
                                "secondary_job_state": job.state,
                                "secondary_job_health": job.health,
                            }),
                        )
                    }
                    Err(e) if e.is_not_found() => (
                        false,
                        json!({"job_id": job_id, "error": "Job not found in secondary DC"}),
                    ),
                    Err(e) => return Err(e),
                }
            }
        };
        Ok(outcome)
    }
}

fn operation_kind(operation: &ApiOperation) -> &'static str {
    match operation {
        ApiOperation::StopJob { .. } => "stop_job",
        ApiOperation::PauseJob { .. } => "pause_job",
        ApiOperation::TerminateInstance { .. } => "terminate_instance",
        ApiOperation::DisableOperator { .. } => "disable_operator",
        ApiOperation::TriggerFailover { .. } => "trigger_failover",
    }
}

#[async_trait::async_trait]
impl FaultInjector for ApiInjector {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Api
    }

    fn kind(&self) -> &'static str {
        self.kind_str()
    }

    async fn inject(&mut self) -> Result<FaultInjectionResult> {
        info!(operation = self.kind_str(), datacenter = %self.fault.datacenter, "Injecting API fault");
        self.apply().await.map_err(|e| {
            FailoverError::FaultInjection(format!(
                "Failed to inject fault with operation {}: {}",
                self.kind_str(),
                e
            ))
        })
    }

    async fn verify(&mut self) -> Result<FaultInjectionResult> {
        let (success, details) = self.check().await.map_err(|e| {
            FailoverError::FaultInjection(format!(
                "Failed to verify fault with operation {}: {}",
                self.kind_str(),
                e
            ))
        })?;

        if success {
            info!(operation = self.kind_str(), "Verified API fault");
        } else {
            warn!(operation = self.kind_str(), details = %details, "API fault not in effect");
        }
        Ok(FaultInjectionResult::new(success, Mechanism::Api, self.kind_str(), details))
    }

    /// API faults are not reversible; only bookkeeping is cleared.
    async fn cleanup(&mut self) -> Result<FaultInjectionResult> {
        let actions = std::mem::take(&mut self.injected);
        info!(operation = self.kind_str(), "Cleaning up API fault injection");
        Ok(FaultInjectionResult::new(
            true,
            Mechanism::Api,
            self.kind_str(),
            json!({"operation": self.kind_str(), "reverted": false, "actions_recorded": actions.len()}),
        ))
    }
}
