// Test fixtures: scenarios and collaborator sets

use super::mocks::{LoopbackExchange, MockControlPlane, ScriptedExecutor};
use failover_tester::config::TestScenario;
use failover_tester::orchestrator::Collaborators;
use std::sync::Arc;

pub const JOB_ID: &str = "job-1";

/// Scenario that stops the primary job through the control plane.
pub fn api_stop_scenario(test_id: &str, event_count: usize) -> TestScenario {
    scenario(
        test_id,
        event_count,
        r#"
  type: api_initiated
  api_operation: stop_job
  instance_id: instance-a
  job_id: job-1
  datacenter: primary"#,
    )
}

/// Scenario that partitions one primary host from the secondary network.
pub fn partition_scenario(test_id: &str, event_count: usize) -> TestScenario {
    scenario(
        test_id,
        event_count,
        r#"
  type: network_partition
  target: primary-node-1
  target_network: 10.20.0.0/16"#,
    )
}

/// Scenario combining a latency fault with a job stop.
pub fn combined_scenario(test_id: &str, event_count: usize) -> TestScenario {
    scenario(
        test_id,
        event_count,
        r#"
  type: combined
  network_faults:
    type: network_latency
    target: primary-node-1
    interface: eth1
    latency_ms: 250
  api_faults:
    type: api_initiated
    api_operation: stop_job
    instance_id: instance-a
    job_id: job-1"#,
    )
}

/// Build a scenario around a `fault_scenario` YAML block.
pub fn scenario(test_id: &str, event_count: usize, fault_yaml: &str) -> TestScenario {
    let yaml = format!(
        r#"
test_id: {test_id}
description: Integration scenario {test_id}
streams_application_sab: apps/app.sab
job_id: job-1
pre_failover_data:
  generator_type: deterministic
  event_count: {event_count}
  batch_size: 100
fault_scenario:{fault_yaml}
expected_recovery_time_seconds: 10
expected_data_loss_percentage: 2
"#
    );
    TestScenario::from_yaml_str(&yaml).expect("fixture scenario must parse")
}

/// Two sites that fail over from primary to secondary, plus data and SSH mocks.
pub struct Sites {
    pub primary: Arc<MockControlPlane>,
    pub secondary: Arc<MockControlPlane>,
    pub exchange: Arc<LoopbackExchange>,
    pub executor: Arc<ScriptedExecutor>,
}

impl Sites {
    /// Primary running the job, secondary on standby and promoted when the
    /// primary job goes away through the API.
    pub fn failover_pair() -> Self {
        let primary = MockControlPlane::running(JOB_ID);
        let secondary = MockControlPlane::standby(JOB_ID);
        primary.fail_over_to(secondary.clone());
        Self {
            primary,
            secondary,
            exchange: LoopbackExchange::new(),
            executor: ScriptedExecutor::new(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            exchange: self.exchange.clone(),
            executor: self.executor.clone(),
        }
    }
}
