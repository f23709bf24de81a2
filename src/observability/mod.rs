//! Observability for failover test runs.
//!
//! Provides logging initialisation and run metrics. Metrics go through the
//! `metrics` facade; when a Prometheus recorder is installed the rendered
//! exposition is written next to the reports at the end of a run.

use crate::config::LoggingConfig;
use crate::error::{FailoverError, Result};
use ::tracing::info;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map a configured level name onto an `EnvFilter` directive.
///
/// Accepts the usual Rust names plus `WARNING` and `CRITICAL`.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Initialize logging.
///
/// `RUST_LOG` wins over `level_override`, which wins over the configured
/// console level. When `log_file` is given every event is also written there
/// as plain text.
pub fn init(config: &LoggingConfig, level_override: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let level = level_directive(level_override.unwrap_or(&config.console_level));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| FailoverError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| FailoverError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!(level, "Logging initialized");
    Ok(())
}

/// Install the process-wide Prometheus recorder.
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| FailoverError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();
    Ok(handle)
}

/// Write the current exposition text to `path`.
pub fn write_metrics(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    std::fs::write(path, handle.render())?;
    info!(path = %path.display(), "Run metrics written");
    Ok(())
}

fn register_metrics() {
    counter!("failover_tester_phases_total").absolute(0);
    counter!("failover_tester_fault_actions_total").absolute(0);
    counter!("failover_tester_monitor_polls_total").absolute(0);
    counter!("failover_tester_records_total").absolute(0);
    gauge!("failover_tester_failover_detected").set(0.0);
}

/// Record a finished orchestrator phase.
pub fn record_phase(phase: &str, success: bool, duration: Duration) {
    counter!(
        "failover_tester_phases_total",
        "phase" => phase.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
    histogram!(
        "failover_tester_phase_duration_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an inject, verify or cleanup call.
pub fn record_fault_action(mechanism: &str, action: &str, success: bool) {
    counter!(
        "failover_tester_fault_actions_total",
        "mechanism" => mechanism.to_string(),
        "action" => action.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record one monitor collection against a site.
pub fn record_monitor_poll(site: &str, success: bool) {
    counter!(
        "failover_tester_monitor_polls_total",
        "site" => site.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record the detected failover and the measured recovery time.
pub fn record_failover(detected: bool, rto: Duration) {
    gauge!("failover_tester_failover_detected").set(if detected { 1.0 } else { 0.0 });
    if detected {
        gauge!("failover_tester_rto_seconds").set(rto.as_secs_f64());
    }
}

/// Count records by stage: `injected`, `retrieved` or `missing`.
pub fn record_records(stage: &str, count: usize) {
    counter!("failover_tester_records_total", "stage" => stage.to_string()).increment(count as u64);
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
