//! Status view of the cross-datacenter failover toolkit.
//!
//! The toolkit runs inside the monitored application; its state is inferred
//! from the job on each site and latched the first time the primary is seen
//! down while the secondary is up.

use super::{site_status, ControlPlane};
use crate::config::ToolkitConfig;
use crate::error::Result;
use crate::resilience::with_timeout;
use crate::types::{Site, SiteStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Snapshot returned by [`ToolkitClient::get_failover_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolkitStatus {
    pub primary_dc_status: SiteStatus,
    pub secondary_dc_status: SiteStatus,
    pub failover_detected: bool,
    pub failover_time: Option<DateTime<Utc>>,
    pub operation_mode: String,
    pub local_dc_name: String,
    pub remote_dc_name: String,
}

/// Availability of the monitored job on each site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAvailability {
    pub primary_dc_available: bool,
    pub secondary_dc_available: bool,
    pub service_available: bool,
}

#[derive(Debug, Default)]
struct Latch {
    primary: SiteStatus,
    secondary: SiteStatus,
    failover_time: Option<DateTime<Utc>>,
}

pub struct ToolkitClient {
    primary: Arc<dyn ControlPlane>,
    secondary: Arc<dyn ControlPlane>,
    config: ToolkitConfig,
    check_timeout: Duration,
    latch: Mutex<Latch>,
}

impl ToolkitClient {
    pub fn new(
        primary: Arc<dyn ControlPlane>,
        secondary: Arc<dyn ControlPlane>,
        config: ToolkitConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            latch: Mutex::new(Latch::default()),
        }
    }

    /// Bound each status check.
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    fn client(&self, site: Site) -> &dyn ControlPlane {
        match site {
            Site::Primary => self.primary.as_ref(),
            Site::Secondary => self.secondary.as_ref(),
        }
    }

    fn snapshot(&self) -> ToolkitStatus {
        let latch = self.latch.lock();
        ToolkitStatus {
            primary_dc_status: latch.primary,
            secondary_dc_status: latch.secondary,
            failover_detected: latch.failover_time.is_some(),
            failover_time: latch.failover_time,
            operation_mode: if self.config.operation_mode == 1 {
                "active".to_string()
            } else {
                "passive".to_string()
            },
            local_dc_name: self.config.local_dc_name.clone(),
            remote_dc_name: self.config.remote_dc_name.clone(),
        }
    }

    /// Refresh both site statuses and update the failover latch.
    ///
    /// Without an instance and job id the last known status is returned.
    pub async fn get_failover_status(&self) -> Result<ToolkitStatus> {
        let (Some(instance_id), Some(job_id)) =
            (self.config.instance_id.as_deref(), self.config.job_id.as_deref())
        else {
            warn!("Instance ID and/or Job ID not set, can't get detailed status");
            return Ok(self.snapshot());
        };

        let (primary, secondary) = with_timeout(self.check_timeout, || async {
            Ok(futures::join!(
                site_status(self.client(Site::Primary), Some(instance_id), Some(job_id)),
                site_status(self.client(Site::Secondary), Some(instance_id), Some(job_id)),
            ))
        })
        .await?;

        {
            let mut latch = self.latch.lock();
            latch.primary = primary;
            latch.secondary = secondary;
            if primary == SiteStatus::Down && secondary.is_up() && latch.failover_time.is_none() {
                let now = Utc::now();
                latch.failover_time = Some(now);
                info!(failover_time = %now, "Toolkit failover detected");
            }
        }

        Ok(self.snapshot())
    }

    /// Poll the status until failover is latched or `timeout` elapses.
    pub async fn wait_for_failover_completion(&self, timeout: Duration) -> Result<bool> {
        let interval = Duration::from_secs_f64(self.config.status_check_interval_seconds.max(0.1));
        let deadline = Instant::now() + timeout;
        info!(timeout_secs = timeout.as_secs_f64(), "Waiting for failover completion");

        loop {
            match self.get_failover_status().await {
                Ok(status) if status.failover_detected => return Ok(true),
                Ok(status) => debug!(
                    primary = %status.primary_dc_status,
                    secondary = %status.secondary_dc_status,
                    "Failover not detected yet"
                ),
                Err(e) => warn!(error = %e, "Error during status check"),
            }
            if Instant::now() + interval > deadline {
                break;
            }
            sleep(interval).await;
        }

        warn!(timeout_secs = timeout.as_secs_f64(), "Failover did not complete in time");
        Ok(false)
    }

    /// A site is available when its job is running and healthy.
    pub async fn get_service_availability(&self) -> ServiceAvailability {
        let primary = self.job_available(Site::Primary).await;
        let secondary = self.job_available(Site::Secondary).await;
        ServiceAvailability {
            primary_dc_available: primary,
            secondary_dc_available: secondary,
            service_available: primary || secondary,
        }
    }

    async fn job_available(&self, site: Site) -> bool {
        let (Some(instance_id), Some(job_id)) =
            (self.config.instance_id.as_deref(), self.config.job_id.as_deref())
        else {
            return false;
        };
        match self.client(site).get_job(instance_id, job_id).await {
            Ok(job) => job.is_running() && job.is_healthy(),
            Err(e) => {
                debug!(site = %site, error = %e, "Service not available");
                false
            }
        }
    }

    /// Toolkit-related job and PE metrics of both sites.
    pub async fn get_toolkit_metrics(&self) -> Value {
        let mut out = Map::new();
        for site in [Site::Primary, Site::Secondary] {
            let metrics = match self.site_metrics(site).await {
                Ok(metrics) => Value::Object(metrics),
                Err(e) => {
                    warn!(site = %site, error = %e, "Failed to get toolkit metrics");
                    serde_json::json!({ "error": e.to_string() })
                }
            };
            out.insert(format!("{}_dc", site), metrics);
        }
        Value::Object(out)
    }

    async fn site_metrics(&self, site: Site) -> Result<Map<String, Value>> {
        let mut metrics = Map::new();
        let (Some(instance_id), Some(job_id)) =
            (self.config.instance_id.as_deref(), self.config.job_id.as_deref())
        else {
            return Ok(metrics);
        };
        let client = self.client(site);

        for metric in client.get_metrics(instance_id, "jobs", job_id).await?.metrics {
            if is_toolkit_metric(&metric.name) {
                metrics.insert(metric.name, metric.value);
            }
        }

        match client.get_processing_elements(instance_id, job_id).await {
            Ok(pes) => {
                for pe in pes.into_iter().filter(|pe| !pe.id.is_empty()) {
                    let pe_metrics = match client.get_metrics(instance_id, "pes", &pe.id).await {
                        Ok(m) => m.metrics,
                        Err(e) => {
                            debug!(pe_id = %pe.id, error = %e, "PE metrics unavailable");
                            continue;
                        }
                    };
                    for metric in pe_metrics {
                        if is_toolkit_metric(&metric.name) {
                            metrics.insert(format!("pe_{}_{}", pe.id, metric.name), metric.value);
                        }
                    }
                }
            }
            Err(e) => debug!(error = %e, "Error getting PE metrics"),
        }

        Ok(metrics)
    }
}

fn is_toolkit_metric(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("crossdc") || name.contains("failover")
}
