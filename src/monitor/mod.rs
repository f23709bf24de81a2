//! Failover monitor.
//!
//! A single background task polls both sites on a fixed interval. It is the
//! only writer of [`FailoverStatus`], which it publishes as immutable
//! snapshots through a `watch` channel; phase code only ever reads them.
//!
//! Detection per tick, until failover is latched:
//!
//! 1. Classify the primary. A lookup failure or any state other than up
//!    counts as a primary failure.
//! 2. Once the primary has failed, check the secondary job. Running and
//!    healthy latches `failover_detected` and the transition time.
//!
//! Every tick also collects metrics from the active site (the secondary once
//! failover is detected) into the rolling `current` snapshot and the numeric
//! time series.

mod collector;
mod prometheus;
mod validator;

pub use collector::{health_percentage, ControlPlaneCollector, MetricsCollector, MonitorTargets};
pub use prometheus::{parse_query_response, PrometheusCollector};
pub use validator::{find_metric, validate_metrics, MetricCheck, MetricsValidation};

use crate::client::{site_status, ControlPlane};
use crate::config::{ExpectedMetric, TesterConfig};
use crate::error::Result;
use crate::observability;
use crate::types::{Site, SiteStatus};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ============================================================================
// Status
// ============================================================================

/// Snapshot of both sites as last seen by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverStatus {
    pub primary_status: SiteStatus,
    pub secondary_status: SiteStatus,
    /// Latched: never goes back to false within a run.
    pub failover_detected: bool,
    pub failover_time: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MetricsStore {
    current: Map<String, Value>,
    baseline: Map<String, Value>,
    post_failover: Map<String, Value>,
    time_series: Map<String, Value>,
}

impl MetricsStore {
    fn record_series(&mut self, metric: &str, timestamp: &str, value: Value) {
        let series = self
            .time_series
            .entry(metric.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(points) = series {
            points.insert(timestamp.to_string(), value);
        }
    }
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

// ============================================================================
// Poller
// ============================================================================

/// State shared with the background task.
struct Poller {
    primary: Arc<dyn ControlPlane>,
    secondary: Arc<dyn ControlPlane>,
    targets: MonitorTargets,
    collectors: Vec<Box<dyn MetricsCollector>>,
    status_tx: watch::Sender<FailoverStatus>,
    store: RwLock<MetricsStore>,
}

impl Poller {
    async fn tick(&self) {
        let mut status = self.status_tx.borrow().clone();

        if !status.failover_detected {
            self.detect(&mut status).await;
        }
        status.last_check = Some(Utc::now());
        self.status_tx.send_replace(status.clone());

        let site = if status.failover_detected {
            Site::Secondary
        } else {
            Site::Primary
        };
        let metrics = self.collect(site).await;

        let timestamp = format!("{:.3}", epoch_seconds(Utc::now()));
        let mut store = self.store.write();
        for (key, value) in &metrics {
            if value.is_number() {
                store.record_series(key, &timestamp, value.clone());
            }
        }
        store.current.extend(metrics);
    }

    async fn detect(&self, status: &mut FailoverStatus) {
        let primary = site_status(
            self.primary.as_ref(),
            self.targets.instance_id(Site::Primary),
            self.targets.job_id(),
        )
        .await;
        let changed = primary != status.primary_status;
        status.primary_status = primary;

        if primary.is_up() {
            return;
        }
        // Lookup failures count as a primary outage.
        if changed {
            warn!(status = %primary, "Primary DC failure detected");
        }

        let (secondary, activated) = self.secondary_activation().await;
        status.secondary_status = secondary;
        if activated {
            let now = Utc::now();
            status.failover_detected = true;
            status.failover_time = Some(now);
            info!(failover_time = %now, "Secondary DC activation detected");
        }
    }

    /// Secondary job classification and whether it is running and healthy.
    async fn secondary_activation(&self) -> (SiteStatus, bool) {
        let (Some(instance_id), Some(job_id)) =
            (self.targets.instance_id(Site::Secondary), self.targets.job_id())
        else {
            warn!("Job ID or instance ID not configured, can't check secondary activation");
            return (SiteStatus::Unknown, false);
        };

        match self.secondary.get_job(instance_id, job_id).await {
            Ok(job) => {
                let running = job.state.eq_ignore_ascii_case("running");
                let status = if job.is_healthy() {
                    SiteStatus::Up
                } else if job.is_running() {
                    SiteStatus::Degraded
                } else {
                    SiteStatus::Down
                };
                (status, running && job.is_healthy())
            }
            Err(e) => {
                warn!(error = %e, "Error checking secondary DC status");
                (SiteStatus::Down, false)
            }
        }
    }

    async fn collect(&self, site: Site) -> Map<String, Value> {
        let mut merged = Map::new();
        for collector in &self.collectors {
            match collector.collect(site).await {
                Ok(metrics) => {
                    observability::record_monitor_poll(site.as_str(), true);
                    merged.extend(metrics);
                }
                Err(e) => {
                    observability::record_monitor_poll(site.as_str(), false);
                    warn!(collector = collector.name(), site = %site, error = %e, "Error collecting metrics");
                }
            }
        }
        merged
    }
}

// ============================================================================
// Monitor
// ============================================================================

struct MonitorTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct MetricsMonitor {
    poller: Arc<Poller>,
    status_rx: watch::Receiver<FailoverStatus>,
    interval: Duration,
    task: Mutex<Option<MonitorTask>>,
}

impl MetricsMonitor {
    pub fn new(
        primary: Arc<dyn ControlPlane>,
        secondary: Arc<dyn ControlPlane>,
        targets: MonitorTargets,
        collectors: Vec<Box<dyn MetricsCollector>>,
        interval: Duration,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(FailoverStatus::default());
        Self {
            poller: Arc::new(Poller {
                primary,
                secondary,
                targets,
                collectors,
                status_tx,
                store: RwLock::new(MetricsStore::default()),
            }),
            status_rx,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Build the monitor with the control-plane collector and, when
    /// configured, the Prometheus collector.
    pub fn from_config(
        config: &TesterConfig,
        primary: Arc<dyn ControlPlane>,
        secondary: Arc<dyn ControlPlane>,
    ) -> Result<Self> {
        let targets = MonitorTargets {
            primary_instance_id: config.monitored_instance(Site::Primary),
            secondary_instance_id: config.monitored_instance(Site::Secondary),
            job_id: config.monitoring.job_id.clone(),
        };

        let mut collectors: Vec<Box<dyn MetricsCollector>> = vec![Box::new(
            ControlPlaneCollector::new(primary.clone(), secondary.clone(), targets.clone()),
        )];
        if let Some(prometheus) = &config.monitoring.prometheus {
            collectors.push(Box::new(PrometheusCollector::new(prometheus.clone())?));
            info!("Prometheus metrics collector initialized");
        }

        Ok(Self::new(
            primary,
            secondary,
            targets,
            collectors,
            config.monitoring.collection_interval(),
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start the background polling task.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Metrics collection already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poller = self.poller.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => poller.tick().await,
                    _ = shutdown_rx.changed() => {
                        debug!("Metrics monitor shutting down");
                        break;
                    }
                }
            }
        });

        *task = Some(MonitorTask { shutdown_tx, handle });
        info!(interval_secs = interval.as_secs_f64(), "Started metrics collection");
    }

    /// Stop the background task, waiting up to two intervals for it.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            warn!("Metrics collection not running");
            return;
        };

        let _ = task.shutdown_tx.send(true);
        let mut handle = task.handle;
        let grace = self.interval * 2;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Metrics monitor task failed"),
            Err(_) => {
                warn!("Collection task did not terminate gracefully");
                handle.abort();
            }
        }
        info!("Stopped metrics collection");
    }

    /// Latest published status snapshot.
    pub fn status(&self) -> FailoverStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status snapshots as they are published.
    pub fn subscribe(&self) -> watch::Receiver<FailoverStatus> {
        self.status_rx.clone()
    }

    /// Block until failover is detected or `timeout` elapses.
    ///
    /// Returns whether failover was detected and the time waited. A failover
    /// latched before the call returns immediately.
    pub async fn wait_for_failover(&self, timeout: Duration) -> (bool, Duration) {
        info!(timeout_secs = timeout.as_secs_f64(), "Waiting for failover to complete");
        let start = Instant::now();
        let start_wall = Utc::now();
        self.poller
            .store
            .write()
            .record_series("failover", "start_time", json!(epoch_seconds(start_wall)));

        let mut rx = self.status_rx.clone();
        let detected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| s.failover_detected)).await,
            Ok(Ok(_))
        );
        let elapsed = start.elapsed();

        if detected {
            let mut store = self.poller.store.write();
            store.record_series("failover", "end_time", json!(epoch_seconds(Utc::now())));
            store.record_series("failover", "recovery_time", json!(elapsed.as_secs_f64()));
            info!(recovery_secs = elapsed.as_secs_f64(), "Failover completed");
        } else {
            warn!(timeout_secs = timeout.as_secs_f64(), "Failover did not complete within timeout");
        }
        observability::record_failover(detected, elapsed);
        (detected, elapsed)
    }

    /// Collect and store the primary baseline.
    pub async fn collect_baseline(&self) -> Map<String, Value> {
        info!("Collecting baseline metrics");
        let baseline = self.poller.collect(Site::Primary).await;
        self.poller.store.write().baseline = baseline.clone();
        baseline
    }

    /// Collect and store the secondary post-failover snapshot.
    pub async fn collect_post_failover(&self) -> Map<String, Value> {
        info!("Collecting post-failover metrics");
        let post_failover = self.poller.collect(Site::Secondary).await;
        self.poller.store.write().post_failover = post_failover.clone();
        post_failover
    }

    /// `{current, baseline, post_failover, time_series}`.
    pub fn all_metrics(&self) -> Map<String, Value> {
        let store = self.poller.store.read();
        let mut all = Map::new();
        all.insert("current".into(), Value::Object(store.current.clone()));
        all.insert("baseline".into(), Value::Object(store.baseline.clone()));
        all.insert("post_failover".into(), Value::Object(store.post_failover.clone()));
        all.insert("time_series".into(), Value::Object(store.time_series.clone()));
        all
    }

    /// Validate the post-failover snapshot, or `current` when none was taken.
    pub fn validate_metrics(&self, expected: &BTreeMap<String, ExpectedMetric>) -> MetricsValidation {
        info!("Validating metrics against expected values");
        let store = self.poller.store.read();
        let metrics = if store.post_failover.is_empty() {
            &store.current
        } else {
            &store.post_failover
        };
        validate_metrics(metrics, expected)
    }
}
