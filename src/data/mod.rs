//! Pre-failover dataset lifecycle.
//!
//! The handler owns both snapshots of a run:
//!
//! ```text
//!   generate ──▶ injected snapshot ──▶ inject (primary)
//!                                          │ failover
//!   reconcile ◀── retrieved snapshot ◀── retrieve (secondary)
//! ```
//!
//! Generation completes before injection starts and retrieval completes
//! before reconciliation starts.

pub mod generator;
pub mod reconcile;

pub use generator::{event_id, load_file};
pub use reconcile::{reconcile, ReconcileKeys, ReconciliationResult, MAX_LISTED_IDS};

use crate::client::{DataExchange, InjectionSummary, PortTarget};
use crate::config::{PreFailoverData, TestScenario, TesterConfig};
use crate::error::{FailoverError, Result};
use crate::observability;
use crate::types::{DataFormat, Record, Site};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Outcome of the injection half.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionReport {
    pub count: usize,
    pub batches: usize,
    pub duration_seconds: f64,
    pub actual_rate: f64,
}

/// Sleep needed after a batch so the target rate is never exceeded.
pub fn pacing_delay(batch_len: usize, rate: f64, elapsed: Duration) -> Duration {
    if !(rate > 0.0) {
        return Duration::ZERO;
    }
    // Rates too small to represent clamp to the longest sleep.
    let target = Duration::try_from_secs_f64(batch_len as f64 / rate).unwrap_or(Duration::MAX);
    target.saturating_sub(elapsed)
}

/// Generates, injects, retrieves and reconciles the test dataset.
pub struct DataHandler {
    exchange: Arc<dyn DataExchange>,
    spec: PreFailoverData,
    instance_id: Option<String>,
    job_id: Option<String>,
    storage_dir: PathBuf,
    validation_timeout: Duration,
    format: DataFormat,
    expected_loss_percentage: f64,
    test_id: String,
    injected: Vec<Record>,
    retrieved: Vec<Record>,
}

impl DataHandler {
    pub fn new(exchange: Arc<dyn DataExchange>, config: &TesterConfig, scenario: &TestScenario) -> Self {
        let spec = scenario.pre_failover_data.clone();
        let format = spec.data_format.unwrap_or(config.data_exchange.default_format);
        let test_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        Self {
            exchange,
            instance_id: config
                .data_handler
                .instance_id
                .clone()
                .or_else(|| config.monitored_instance(Site::Primary)),
            job_id: config
                .data_handler
                .job_id
                .clone()
                .or_else(|| scenario.job_id.clone())
                .or_else(|| config.monitoring.job_id.clone()),
            storage_dir: config.data_handler.storage_dir.clone(),
            validation_timeout: config.data_handler.validation_timeout(),
            format,
            expected_loss_percentage: scenario.expected_data_loss_percentage,
            test_id,
            spec,
            injected: Vec::new(),
            retrieved: Vec::new(),
        }
    }

    /// Short identifier embedded in generated event ids.
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn injected(&self) -> &[Record] {
        &self.injected
    }

    pub fn retrieved(&self) -> &[Record] {
        &self.retrieved
    }

    fn target(&self, port: &str) -> Result<PortTarget> {
        match (&self.instance_id, &self.job_id) {
            (Some(instance_id), Some(job_id)) => Ok(PortTarget::new(instance_id.as_str(), job_id.as_str(), port)),
            _ => Err(FailoverError::DataExchange(
                "Instance ID and Job ID must be specified for data injection".to_string(),
            )),
        }
    }

    /// Generate the dataset and inject it into the primary site.
    pub async fn generate_and_inject(&mut self) -> Result<InjectionReport> {
        let target = self.target(&self.spec.input_port)?;

        let records = generator::generate(&self.spec, &self.test_id, &self.storage_dir)?;
        info!(
            count = records.len(),
            generator = ?self.spec.generator_type,
            test_id = %self.test_id,
            "Generated test data"
        );
        self.save_snapshot("injected", &records);
        self.injected = records;

        let started = Instant::now();
        let summary = match self.spec.injection_rate_events_per_second {
            Some(rate) => self.inject_paced(&target, rate).await?,
            None => {
                self.exchange
                    .inject(&target, &self.injected, Site::Primary, self.format)
                    .await?
            }
        };
        let duration = started.elapsed().as_secs_f64();
        observability::record_records("injected", summary.count);

        let report = InjectionReport {
            count: summary.count,
            batches: summary.batches,
            duration_seconds: duration,
            actual_rate: if duration > 0.0 { summary.count as f64 / duration } else { 0.0 },
        };
        info!(
            count = report.count,
            batches = report.batches,
            duration_seconds = report.duration_seconds,
            "Injected test data"
        );
        Ok(report)
    }

    async fn inject_paced(&self, target: &PortTarget, rate: f64) -> Result<InjectionSummary> {
        let mut total = InjectionSummary::default();
        for batch in self.injected.chunks(self.spec.batch_size.max(1)) {
            let batch_started = Instant::now();
            let summary = self.exchange.inject(target, batch, Site::Primary, self.format).await?;
            total.merge(summary);

            let delay = pacing_delay(batch.len(), rate, batch_started.elapsed());
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "Pacing injection");
                sleep(delay).await;
            }
        }
        Ok(total)
    }

    /// Retrieve processed records from the secondary site.
    pub async fn retrieve_processed(&mut self) -> Result<usize> {
        let target = self.target(&self.spec.output_port)?;
        let max_records = self.spec.event_count.saturating_mul(2);

        let records = self
            .exchange
            .retrieve(&target, Site::Secondary, self.format, max_records, self.validation_timeout)
            .await?;
        info!(count = records.len(), "Retrieved processed data");
        observability::record_records("retrieved", records.len());

        self.save_snapshot("retrieved", &records);
        self.retrieved = records;
        Ok(self.retrieved.len())
    }

    /// Reconcile the two snapshots.
    pub fn validate(&self) -> ReconciliationResult {
        let keys = ReconcileKeys {
            id_field: &self.spec.id_field,
            timestamp_field: &self.spec.timestamp_field,
        };
        let result = reconcile(&self.injected, &self.retrieved, keys, self.expected_loss_percentage);
        observability::record_records("missing", result.missing_events);
        result
    }

    fn save_snapshot(&self, label: &str, records: &[Record]) {
        if let Err(e) = write_snapshot(&self.storage_dir, label, records) {
            warn!(label, error = %e, "Failed to save data snapshot");
        }
    }
}

fn write_snapshot(dir: &Path, label: &str, records: &[Record]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = format!("{}_{}_data.json", Local::now().format("%Y%m%d%H%M%S"), label);
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(records)?)?;
    debug!(path = %path.display(), count = records.len(), "Saved data snapshot");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ApiOperationKind, ApiSpec, FaultScenario};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Loopback {
        batches: Mutex<Vec<usize>>,
        stored: Mutex<Vec<Record>>,
        keep: Option<usize>,
    }

    #[async_trait::async_trait]
    impl DataExchange for Loopback {
        async fn inject(
            &self,
            _target: &PortTarget,
            records: &[Record],
            site: Site,
            _format: DataFormat,
        ) -> Result<InjectionSummary> {
            assert_eq!(site, Site::Primary);
            self.batches.lock().push(records.len());
            self.stored.lock().extend_from_slice(records);
            Ok(InjectionSummary {
                count: records.len(),
                batches: 1,
            })
        }

        async fn retrieve(
            &self,
            target: &PortTarget,
            site: Site,
            _format: DataFormat,
            max_records: usize,
            _timeout: Duration,
        ) -> Result<Vec<Record>> {
            assert_eq!(site, Site::Secondary);
            assert_eq!(target.port, "output");
            let stored = self.stored.lock();
            let keep = self.keep.unwrap_or(stored.len()).min(max_records);
            Ok(stored[..keep].to_vec())
        }
    }

    fn scenario(event_count: usize, rate: Option<f64>, expected_loss: f64) -> TestScenario {
        TestScenario {
            test_id: "data-test".into(),
            description: String::new(),
            streams_application_sab: PathBuf::from("app.sab"),
            submission_params: Default::default(),
            job_id: None,
            pre_failover_data: PreFailoverData {
                event_count,
                injection_rate_events_per_second: rate,
                batch_size: 100,
                ..PreFailoverData::default()
            },
            fault_scenario: FaultScenario::ApiInitiated(ApiSpec {
                api_operation: ApiOperationKind::StopJob,
                instance_id: Some("i1".into()),
                job_id: Some("7".into()),
                operator_id: None,
                datacenter: Site::Primary,
            }),
            failover_trigger_method: Default::default(),
            expected_recovery_time_seconds: 60.0,
            expected_data_loss_percentage: expected_loss,
            expected_metrics: Default::default(),
            post_failover_validation_checks: Vec::new(),
        }
    }

    fn config(dir: &Path) -> TesterConfig {
        let mut config = TesterConfig::development();
        config.data_handler.storage_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_pacing_delay_never_negative() {
        assert_eq!(pacing_delay(100, 50.0, Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(pacing_delay(100, 50.0, Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(pacing_delay(100, 0.0, Duration::ZERO), Duration::ZERO);
        assert_eq!(pacing_delay(100, f64::NAN, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_pacing_delay_tiny_rate_saturates() {
        assert_eq!(pacing_delay(100, 1e-20, Duration::ZERO), Duration::MAX);
        assert_eq!(
            pacing_delay(100, f64::MIN_POSITIVE, Duration::from_secs(3)),
            Duration::MAX - Duration::from_secs(3)
        );
    }

    #[tokio::test]
    async fn test_inject_retrieve_and_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(Loopback {
            keep: Some(990),
            ..Loopback::default()
        });
        let mut handler = DataHandler::new(exchange.clone(), &config(dir.path()), &scenario(1000, None, 2.0));

        let report = handler.generate_and_inject().await.unwrap();
        assert_eq!(report.count, 1000);
        assert_eq!(exchange.batches.lock().len(), 1);

        assert_eq!(handler.retrieve_processed().await.unwrap(), 990);
        let result = handler.validate();
        assert!(result.success);
        assert_eq!(result.loss_percentage, 1.0);
        assert_eq!(result.missing_events, 10);

        let snapshots: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(snapshots.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_injection_is_paced() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(Loopback::default());
        let mut handler = DataHandler::new(exchange.clone(), &config(dir.path()), &scenario(300, Some(100.0), 0.0));

        let started = Instant::now();
        let report = handler.generate_and_inject().await.unwrap();

        assert_eq!(*exchange.batches.lock(), vec![100, 100, 100]);
        assert_eq!(report.batches, 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_ids_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.data_handler.job_id = None;
        config.monitoring.job_id = None;
        let mut handler = DataHandler::new(Arc::new(Loopback::default()), &config, &scenario(10, None, 0.0));

        let err = handler.generate_and_inject().await.unwrap_err();
        assert!(err.to_string().contains("Instance ID and Job ID must be specified"));
    }

    #[test]
    fn test_validate_without_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let handler = DataHandler::new(Arc::new(Loopback::default()), &config(dir.path()), &scenario(10, None, 0.0));

        let result = handler.validate();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No injected data to validate against"));
    }
}
