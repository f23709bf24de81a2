//! Failover Tester - chaos-engineering harness for cross-datacenter failover.
//!
//! A run drives one scenario against a primary and a secondary site: it
//! injects a labeled dataset, breaks the primary with a fault, waits for the
//! secondary to take over, then reconciles what came out the other side. The
//! result carries the measured recovery time (RTO) and data loss (RPO).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TestOrchestrator                         │
//! │  SETUP → PRE_FAILOVER → FAULT_INJECTION → MONITORING → ...   │
//! ├───────────────────┬───────────────────┬─────────────────────┤
//! │ FaultCoordinator  │  MetricsMonitor   │    DataHandler      │
//! │ network | process │  detection latch  │ generate | inject   │
//! │ api injectors     │  collectors       │ retrieve | reconcile│
//! ├───────────────────┴───────────────────┴─────────────────────┤
//! │  ControlPlane (REST) | DataExchange | RemoteExecutor (SSH)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use failover_tester::config::{TestScenario, TesterConfig};
//! use failover_tester::orchestrator::RunOptions;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> failover_tester::Result<()> {
//!     let config = TesterConfig::from_file(Path::new("config/config.yaml"))?;
//!     let scenario = TestScenario::from_file(Path::new("scenarios/network_partition.yaml"))?;
//!
//!     let result = failover_tester::run(config, scenario, RunOptions::default()).await?;
//!     println!("success: {}, rto: {:?}", result.success, result.rto_seconds);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod chaos;
pub mod client;
pub mod data;
pub mod monitor;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod resilience;

pub mod cli;
pub mod observability;

// Re-exports
pub use error::{FailoverError, Result};
pub use types::*;

use config::{TestScenario, TesterConfig};
use orchestrator::{RunOptions, TestOrchestrator, TestResult};
use tracing::info;

/// Run one scenario against the configured sites.
///
/// Fails only when the run cannot be set up; test failures are reported in
/// the returned [`TestResult`].
pub async fn run(config: TesterConfig, scenario: TestScenario, options: RunOptions) -> Result<TestResult> {
    info!(test_id = %scenario.test_id, "Preparing failover test");
    let mut orchestrator = TestOrchestrator::connect(config, scenario, options)?;
    Ok(orchestrator.run_test().await)
}
