//! Clients for the stream-processing control plane.
//!
//! [`ControlPlane`] is the seam every component talks through: the REST
//! client [`StreamsClient`] implements it over HTTP, tests implement it with
//! canned responses. All typed operations are provided methods layered on a
//! single [`ControlPlane::send`].

mod data_exchange;
mod toolkit;

pub use data_exchange::{
    parse_csv, to_csv, DataExchange, DataExchangeClient, InjectionSummary, PortTarget,
};
pub use toolkit::{ServiceAvailability, ToolkitClient, ToolkitStatus};

use crate::config::DatacenterConfig;
use crate::error::{FailoverError, Result};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::types::SiteStatus;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Default request timeout for control-plane calls.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest error body quoted in an error message.
const MAX_ERROR_BODY: usize = 200;

// ============================================================================
// Requests
// ============================================================================

/// Body of a control-plane request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Text { content_type: String, body: String },
}

/// A control-plane request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn text(mut self, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text {
            content_type: content_type.into(),
            body: body.into(),
        };
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Typed Views
// ============================================================================

/// A streams instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    pub status: String,
    pub health: String,
    pub jobs: Vec<Value>,
}

/// A job running on an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    pub name: String,
    pub state: String,
    pub status: String,
    pub health: String,
    pub submission_time: Value,
    pub pe_count: u64,
}

impl Job {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running") || self.status.eq_ignore_ascii_case("running")
    }

    pub fn is_healthy(&self) -> bool {
        self.health.eq_ignore_ascii_case("healthy")
    }
}

/// A processing element of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingElement {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    pub health: String,
    pub status: String,
    pub launch_count: u64,
}

/// Metrics of one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsResponse {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metric {
    pub name: String,
    pub value: Value,
}

/// Accepts ids encoded as strings or numbers.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(FailoverError::from)
}

fn list_field<T: DeserializeOwned>(mut value: Value, field: &str) -> Result<Vec<T>> {
    match value.get_mut(field).map(Value::take) {
        Some(items) => decode(items),
        None => Ok(Vec::new()),
    }
}

// ============================================================================
// Control Plane
// ============================================================================

/// Control-plane API of one datacenter.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Send a request and return the decoded JSON response.
    ///
    /// Empty responses decode to `{}`; non-JSON bodies are returned as
    /// `{"raw_response": <text>}`.
    async fn send(&self, request: ApiRequest) -> Result<Value>;

    /// Generic request with an optional JSON body.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    async fn get_instances(&self) -> Result<Vec<Instance>> {
        let response = self.send(ApiRequest::get("instances")).await?;
        list_field(response, "instances")
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        decode(self.send(ApiRequest::get(format!("instances/{}", instance_id))).await?)
    }

    async fn get_jobs(&self, instance_id: &str) -> Result<Vec<Job>> {
        let response = self
            .send(ApiRequest::get(format!("instances/{}/jobs", instance_id)))
            .await?;
        list_field(response, "jobs")
    }

    async fn get_job(&self, instance_id: &str, job_id: &str) -> Result<Job> {
        decode(
            self.send(ApiRequest::get(format!(
                "instances/{}/jobs/{}",
                instance_id, job_id
            )))
            .await?,
        )
    }

    async fn get_processing_elements(
        &self,
        instance_id: &str,
        job_id: &str,
    ) -> Result<Vec<ProcessingElement>> {
        let response = self
            .send(ApiRequest::get(format!(
                "instances/{}/jobs/{}/pes",
                instance_id, job_id
            )))
            .await?;
        list_field(response, "pes")
    }

    async fn get_metrics(
        &self,
        instance_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<MetricsResponse> {
        decode(
            self.send(ApiRequest::get(format!(
                "instances/{}/metrics/{}/{}",
                instance_id, resource_type, resource_id
            )))
            .await?,
        )
    }

    async fn cancel_job(&self, instance_id: &str, job_id: &str) -> Result<Value> {
        self.send(ApiRequest::new(
            Method::DELETE,
            format!("instances/{}/jobs/{}", instance_id, job_id),
        ))
        .await
    }

    /// Poll until the job reaches `target_state`.
    ///
    /// Returns `false` on timeout or when the job disappears; other errors
    /// are logged and polling continues.
    async fn wait_for_job_state(
        &self,
        instance_id: &str,
        job_id: &str,
        target_state: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool> {
        self.wait_for_job(instance_id, job_id, timeout, interval, &|job| {
            job.state.eq_ignore_ascii_case(target_state)
        })
        .await
    }

    /// Poll until the job reports `target_health`.
    async fn wait_for_job_health(
        &self,
        instance_id: &str,
        job_id: &str,
        target_health: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool> {
        self.wait_for_job(instance_id, job_id, timeout, interval, &|job| {
            job.health.eq_ignore_ascii_case(target_health)
        })
        .await
    }

    #[doc(hidden)]
    async fn wait_for_job(
        &self,
        instance_id: &str,
        job_id: &str,
        timeout: Duration,
        interval: Duration,
        reached: &(dyn for<'j> Fn(&'j Job) -> bool + Send + Sync),
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match self.get_job(instance_id, job_id).await {
                Ok(job) if reached(&job) => {
                    info!(job_id = %job_id, state = %job.state, health = %job.health, "Job reached target");
                    return Ok(true);
                }
                Ok(job) => {
                    debug!(job_id = %job_id, state = %job.state, health = %job.health, "Waiting for job");
                }
                Err(e) if e.is_not_found() => {
                    error!(job_id = %job_id, "Job not found while waiting");
                    return Ok(false);
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "API error while waiting for job");
                }
            }
            sleep(interval).await;
        }

        warn!(job_id = %job_id, "Timeout waiting for job");
        Ok(false)
    }
}

/// Classify one site from its control plane.
///
/// Any lookup failure counts as down. With a job: healthy is up, running
/// but not healthy is degraded. Without a job the instance status decides;
/// without an instance the reachability of the instance list decides.
pub async fn site_status(
    client: &dyn ControlPlane,
    instance_id: Option<&str>,
    job_id: Option<&str>,
) -> SiteStatus {
    let Some(instance_id) = instance_id else {
        return match client.get_instances().await {
            Ok(_) => SiteStatus::Up,
            Err(e) => {
                debug!(error = %e, "Instance list unavailable");
                SiteStatus::Down
            }
        };
    };

    let instance = match client.get_instance(instance_id).await {
        Ok(instance) => instance,
        Err(e) => {
            debug!(instance_id = %instance_id, error = %e, "Instance lookup failed");
            return SiteStatus::Down;
        }
    };

    match job_id {
        Some(job_id) => match client.get_job(instance_id, job_id).await {
            Ok(job) if job.is_healthy() => SiteStatus::Up,
            Ok(job) if job.is_running() => SiteStatus::Degraded,
            Ok(_) => SiteStatus::Down,
            Err(e) => {
                debug!(job_id = %job_id, error = %e, "Job lookup failed");
                SiteStatus::Down
            }
        },
        None => {
            let status = instance.status.to_ascii_lowercase();
            if status == "running" || status == "healthy" {
                SiteStatus::Up
            } else {
                SiteStatus::Down
            }
        }
    }
}

// ============================================================================
// REST Client
// ============================================================================

/// REST management API client of one datacenter.
#[derive(Clone)]
pub struct StreamsClient {
    base_url: String,
    auth_token: String,
    client: Client,
    retry: RetryExecutor,
    timeout: Duration,
}

impl StreamsClient {
    /// Create a client with the default timeout and retry policy.
    pub fn new(base_url: &str, auth_token: &str, verify_ssl: bool) -> Result<Self> {
        Self::with_options(
            base_url,
            auth_token,
            verify_ssl,
            DEFAULT_REQUEST_TIMEOUT,
            RetryConfig::default(),
        )
    }

    pub fn with_options(
        base_url: &str,
        auth_token: &str,
        verify_ssl: bool,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .timeout(timeout)
            .build()
            .map_err(|e| FailoverError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            client,
            retry: RetryExecutor::new(retry),
            timeout,
        })
    }

    /// Build from a datacenter section and the API tuning section.
    pub fn from_config(dc: &DatacenterConfig, api: &crate::config::ApiConfig) -> Result<Self> {
        Self::with_options(
            &dc.api_url,
            &dc.auth_token,
            dc.verify_ssl,
            api.timeout(),
            RetryConfig::from_backoff(api.max_retries, api.backoff_factor),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<Value> {
        let url = self.url(&request.path);
        debug!(method = %request.method, url = %url, "Control-plane request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.auth_token))
            .header(ACCEPT, "application/json")
            .timeout(request.timeout.unwrap_or(self.timeout));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Text { content_type, body } => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(body.clone()),
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        interpret_response(status, &text, &request.path)
    }
}

/// Map an HTTP status and body to the decoded response or an error.
pub(crate) fn interpret_response(status: StatusCode, text: &str, path: &str) -> Result<Value> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(FailoverError::Authentication(
            "Authentication failed. Check your auth token.".to_string(),
        ));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(FailoverError::NotFound(format!(
            "Resource not found: {}",
            path
        )));
    }
    if !status.is_success() {
        let message = match serde_json::from_str::<Value>(text) {
            Ok(body) => body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| truncate(text)),
            Err(_) => truncate(text),
        };
        return Err(FailoverError::Api {
            status: status.as_u16(),
            message,
        });
    }

    if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
        return Ok(json!({}));
    }

    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(body = %truncate(text), "Failed to parse JSON response");
            Ok(json!({ "raw_response": text }))
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait::async_trait]
impl ControlPlane for StreamsClient {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        self.retry.execute(|| self.send_once(&request)).await
    }
}
