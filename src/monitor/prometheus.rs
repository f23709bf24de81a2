//! Prometheus HTTP API collector.

use super::collector::MetricsCollector;
use crate::config::PrometheusConfig;
use crate::error::{FailoverError, Result};
use crate::types::Site;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Labels tried, in order, to key one series of a multi-series result.
const SERIES_KEY_LABELS: [&str; 4] = ["__name__", "job", "instance", "name"];

const JOB_METRICS: [&str; 4] = [
    "streams_job_healthy",
    "streams_job_nTuplesProcessed",
    "streams_job_nTuplesSubmitted",
    "streams_job_nTuplesDropped",
];

const INSTANCE_METRICS: [&str; 3] = [
    "streams_instance_status",
    "streams_instance_job_count",
    "streams_instance_cpu_usage",
];

pub struct PrometheusCollector {
    config: PrometheusConfig,
    client: reqwest::Client,
}

impl PrometheusCollector {
    pub fn new(config: PrometheusConfig) -> Result<Self> {
        for site in [Site::Primary, Site::Secondary] {
            if config.url(site).is_none() {
                warn!(site = %site, "Prometheus URL not configured");
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| FailoverError::Config(format!("Failed to build Prometheus client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Run one instant query. `Ok(None)` when the query returned no data.
    pub async fn query(&self, base_url: &str, query: &str) -> Result<Option<Value>> {
        let url = format!("{}/api/v1/query", base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url).query(&[("query", query)]);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FailoverError::Api {
                status: status.as_u16(),
                message: format!("Prometheus query failed: {}", query),
            });
        }
        let body: Value = response.json().await?;
        Ok(parse_query_response(&body))
    }

    async fn query_group(&self, base_url: &str, metrics: &[&str], label: &str, id: &str) -> Map<String, Value> {
        let mut group = Map::new();
        for metric in metrics {
            let query = format!("{}{{{}=\"{}\"}}", metric, label, id);
            match self.query(base_url, &query).await {
                Ok(Some(value)) => {
                    group.insert(metric.to_string(), value);
                }
                Ok(None) => {}
                Err(e) => warn!(query = %query, error = %e, "Failed to collect grouped metric"),
            }
        }
        group
    }
}

/// Extract the value of an instant-query response.
///
/// A single series yields its sample, several yield a map keyed by the
/// first present label of `__name__`, `job`, `instance`, `name`.
pub fn parse_query_response(body: &Value) -> Option<Value> {
    if body.get("status").and_then(Value::as_str) != Some("success") {
        let error = body.get("error").and_then(Value::as_str).unwrap_or("Unknown error");
        warn!(error, "Prometheus query failed");
        return None;
    }

    let results = body.pointer("/data/result").and_then(Value::as_array)?;
    match results.as_slice() {
        [] => None,
        [single] => sample_value(single),
        many => {
            let mut values = Map::new();
            for series in many {
                let Some(value) = sample_value(series) else {
                    continue;
                };
                values.insert(series_key(series), value);
            }
            Some(Value::Object(values))
        }
    }
}

fn sample_value(series: &Value) -> Option<Value> {
    let raw = series.pointer("/value/1")?;
    let value = match raw {
        Value::String(s) => s.parse::<f64>().map(|f| json!(f)).unwrap_or_else(|_| json!(s)),
        Value::Null => return None,
        other => other.clone(),
    };
    Some(value)
}

fn series_key(series: &Value) -> String {
    let labels = series.get("metric").and_then(Value::as_object);
    let Some(labels) = labels else {
        return String::new();
    };
    SERIES_KEY_LABELS
        .iter()
        .find_map(|label| labels.get(*label).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            labels
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v.as_str().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("_")
        })
}

#[async_trait::async_trait]
impl MetricsCollector for PrometheusCollector {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn collect(&self, site: Site) -> Result<Map<String, Value>> {
        let Some(base_url) = self.config.url(site) else {
            warn!(site = %site, "Prometheus URL not configured for site");
            return Ok(Map::new());
        };

        let mut metrics = Map::new();
        metrics.insert("source".into(), json!("prometheus"));
        metrics.insert("dc_type".into(), json!(site));
        metrics.insert("timestamp".into(), json!(Utc::now().timestamp_millis() as f64 / 1000.0));

        for metric in &self.config.metrics {
            match self.query(base_url, metric).await {
                Ok(Some(value)) => {
                    metrics.insert(metric.clone(), value);
                }
                Ok(None) => {}
                Err(e) => warn!(metric = %metric, error = %e, "Failed to collect metric"),
            }
        }

        if let Some(job_id) = &self.config.job_id {
            let job = self.query_group(base_url, &JOB_METRICS, "job_id", job_id).await;
            metrics.insert("job".into(), Value::Object(job));
        }
        if let Some(instance_id) = &self.config.instance_id {
            let instance = self
                .query_group(base_url, &INSTANCE_METRICS, "instance_id", instance_id)
                .await;
            metrics.insert("instance".into(), Value::Object(instance));
        }

        Ok(metrics)
    }
}
