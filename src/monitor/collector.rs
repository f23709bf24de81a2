//! Metric sources polled by the monitor.

use crate::client::ControlPlane;
use crate::error::Result;
use crate::types::Site;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

/// A source of point-in-time metrics for one site.
#[async_trait::async_trait]
pub trait MetricsCollector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Collect a snapshot. Missing ids yield an empty map, not an error.
    async fn collect(&self, site: Site) -> Result<Map<String, Value>>;
}

/// Instance and job watched on each site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorTargets {
    pub primary_instance_id: Option<String>,
    pub secondary_instance_id: Option<String>,
    pub job_id: Option<String>,
}

impl MonitorTargets {
    pub fn instance_id(&self, site: Site) -> Option<&str> {
        match site {
            Site::Primary => self.primary_instance_id.as_deref(),
            Site::Secondary => self.secondary_instance_id.as_deref(),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

/// Health label to percentage.
pub fn health_percentage(health: &str) -> f64 {
    match health.to_ascii_lowercase().as_str() {
        "healthy" => 100.0,
        "partially healthy" => 75.0,
        "unhealthy" => 0.0,
        _ => 50.0,
    }
}

/// Job metrics promoted to the top level of a snapshot.
const TOP_LEVEL_JOB_METRICS: [&str; 2] = ["nTuplesProcessed", "nTuplesSubmitted"];

/// Collects instance, job and processing-element state from the control plane.
pub struct ControlPlaneCollector {
    primary: Arc<dyn ControlPlane>,
    secondary: Arc<dyn ControlPlane>,
    targets: MonitorTargets,
}

impl ControlPlaneCollector {
    pub fn new(primary: Arc<dyn ControlPlane>, secondary: Arc<dyn ControlPlane>, targets: MonitorTargets) -> Self {
        Self {
            primary,
            secondary,
            targets,
        }
    }

    fn client(&self, site: Site) -> &dyn ControlPlane {
        match site {
            Site::Primary => self.primary.as_ref(),
            Site::Secondary => self.secondary.as_ref(),
        }
    }

    async fn collect_job(
        &self,
        client: &dyn ControlPlane,
        instance_id: &str,
        job_id: &str,
        metrics: &mut Map<String, Value>,
    ) -> Result<()> {
        let job = client.get_job(instance_id, job_id).await?;
        let mut job_map = Map::new();
        job_map.insert("id".into(), json!(job.id));
        job_map.insert("name".into(), json!(job.name));
        job_map.insert("state".into(), json!(job.state));
        job_map.insert("health".into(), json!(job.health));
        job_map.insert("submission_time".into(), job.submission_time.clone());
        job_map.insert("pe_count".into(), json!(job.pe_count));

        if !job.health.is_empty() {
            let percentage = health_percentage(&job.health);
            metrics.insert("health_percentage".into(), json!(percentage));
            job_map.insert("health_percentage".into(), json!(percentage));
        }

        match client.get_metrics(instance_id, "jobs", job_id).await {
            Ok(response) => {
                for metric in response.metrics {
                    if metric.name.is_empty() || metric.name == "health" {
                        continue;
                    }
                    if TOP_LEVEL_JOB_METRICS.contains(&metric.name.as_str()) {
                        metrics.insert(metric.name.clone(), metric.value.clone());
                    }
                    job_map.insert(metric.name, metric.value);
                }
            }
            Err(e) => warn!(job_id, error = %e, "Failed to collect job metrics"),
        }
        metrics.insert("job".into(), Value::Object(job_map));

        match client.get_processing_elements(instance_id, job_id).await {
            Ok(pes) => {
                let mut pe_map = Map::new();
                pe_map.insert("count".into(), json!(pes.len()));
                let healthy = pes.iter().filter(|pe| pe.health.eq_ignore_ascii_case("healthy")).count();
                for pe in &pes {
                    if pe.id.is_empty() {
                        continue;
                    }
                    pe_map.insert(
                        pe.id.clone(),
                        json!({
                            "health": pe.health.to_ascii_lowercase(),
                            "status": pe.status,
                            "launchCount": pe.launch_count,
                        }),
                    );
                }
                if !pes.is_empty() {
                    metrics.insert(
                        "pe_health_percentage".into(),
                        json!(healthy as f64 / pes.len() as f64 * 100.0),
                    );
                }
                metrics.insert("processing_elements".into(), Value::Object(pe_map));
            }
            Err(e) => warn!(job_id, error = %e, "Failed to collect PE metrics"),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricsCollector for ControlPlaneCollector {
    fn name(&self) -> &'static str {
        "control_plane"
    }

    async fn collect(&self, site: Site) -> Result<Map<String, Value>> {
        let Some(instance_id) = self.targets.instance_id(site) else {
            warn!(site = %site, "Instance ID not configured, skipping control-plane metrics");
            return Ok(Map::new());
        };
        let client = self.client(site);

        let mut metrics = Map::new();
        metrics.insert("dc_type".into(), json!(site));
        metrics.insert("timestamp".into(), json!(Utc::now().timestamp_millis() as f64 / 1000.0));
        metrics.insert("instance".into(), json!({}));
        metrics.insert("job".into(), json!({}));
        metrics.insert("processing_elements".into(), json!({}));

        match client.get_instance(instance_id).await {
            Ok(instance) => {
                metrics.insert(
                    "instance".into(),
                    json!({
                        "id": instance.id,
                        "status": instance.status,
                        "health": instance.health,
                        "jobs_count": instance.jobs.len(),
                    }),
                );
            }
            Err(e) => warn!(site = %site, error = %e, "Failed to collect instance metrics"),
        }

        if let Some(job_id) = self.targets.job_id() {
            if let Err(e) = self.collect_job(client, instance_id, job_id, &mut metrics).await {
                warn!(site = %site, error = %e, "Failed to collect job information");
            }
        }

        Ok(metrics)
    }
}
