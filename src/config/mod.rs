//! Configuration module for the failover tester.
//!
//! The global configuration is a YAML document describing both datacenters,
//! credentials, fault-injection access, monitoring and data handling. Test
//! scenarios live in their own files, see [`scenario`].

pub mod scenario;

pub use scenario::{
    ExpectedMetric, FailoverTrigger, FieldType, GeneratorType, PreFailoverData, TestScenario,
    ValidationCheck, ValidationCheckType,
};

use crate::chaos::FaultInjectionConfig;
use crate::error::{FailoverError, Result};
use crate::types::{DataFormat, Site};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const ENV_PREFIX: &str = "$ENV:";
const CRED_PREFIX: &str = "$CRED:";

/// Main configuration for a failover test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterConfig {
    /// Control-plane endpoints of both datacenters.
    pub datacenters: DatacentersConfig,
    /// Named credentials, referenced elsewhere as `$CRED:<name>`.
    #[serde(default)]
    pub credentials: HashMap<String, Value>,
    /// Remote access used by fault injectors.
    #[serde(default)]
    pub fault_injection: FaultInjectionConfig,
    /// Metrics monitor configuration.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Data-exchange client configuration.
    #[serde(default)]
    pub data_exchange: DataExchangeConfig,
    /// Dataset handling configuration.
    #[serde(default)]
    pub data_handler: DataHandlerConfig,
    /// Optional cross-DC failover toolkit status checks.
    #[serde(default)]
    pub crossdc_toolkit: Option<ToolkitConfig>,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Control-plane client tuning.
    #[serde(default)]
    pub api: ApiConfig,
}

impl TesterConfig {
    /// Load configuration from a YAML file, resolving credential references
    /// against the process environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FailoverError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Loading configuration");
        Self::from_yaml_str(&content, |name| std::env::var(name).ok())
    }

    /// Parse configuration from YAML text with a custom environment lookup.
    pub fn from_yaml_str<F>(content: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw: Value = serde_yaml::from_str(content)
            .map_err(|e| FailoverError::Config(format!("Failed to parse config: {}", e)))?;

        resolve_credentials(&mut raw, env);

        let config: Self = serde_json::from_value(raw)
            .map_err(|e| FailoverError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        for site in [Site::Primary, Site::Secondary] {
            let dc = self.datacenters.get(site);
            if !(dc.api_url.starts_with("http://") || dc.api_url.starts_with("https://")) {
                return Err(FailoverError::InvalidConfig {
                    field: format!("datacenters.{}.api_url", site),
                    reason: format!("'{}' is not an http(s) URL", dc.api_url),
                });
            }
            if dc.auth_token.is_empty() {
                return Err(FailoverError::InvalidConfig {
                    field: format!("datacenters.{}.auth_token", site),
                    reason: "auth token must not be empty".to_string(),
                });
            }
        }

        if self.monitoring.metrics_collection_interval_seconds <= 0.0 {
            return Err(FailoverError::InvalidConfig {
                field: "monitoring.metrics_collection_interval_seconds".to_string(),
                reason: "interval must be positive".to_string(),
            });
        }

        if self.data_exchange.max_batch_size == 0 {
            return Err(FailoverError::InvalidConfig {
                field: "data_exchange.max_batch_size".to_string(),
                reason: "batch size must be non-zero".to_string(),
            });
        }

        if let Some(prometheus) = &self.monitoring.prometheus {
            for (field, url) in [
                ("primary_url", &prometheus.primary_url),
                ("secondary_url", &prometheus.secondary_url),
            ] {
                if let Some(url) = url {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return Err(FailoverError::InvalidConfig {
                            field: format!("monitoring.prometheus.{}", field),
                            reason: format!("'{}' is not an http(s) URL", url),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Instance monitored on the given site.
    pub fn monitored_instance(&self, site: Site) -> Option<String> {
        let direct = match site {
            Site::Primary => self.monitoring.primary_instance_id.clone(),
            Site::Secondary => self.monitoring.secondary_instance_id.clone(),
        };
        direct.or_else(|| self.datacenters.get(site).instance_id.clone())
    }

    /// Create a configuration pointing at local mock endpoints.
    pub fn development() -> Self {
        Self {
            datacenters: DatacentersConfig {
                primary: DatacenterConfig::local("http://127.0.0.1:8443/streams/rest", "instance-a"),
                secondary: DatacenterConfig::local("http://127.0.0.1:9443/streams/rest", "instance-b"),
            },
            credentials: HashMap::new(),
            fault_injection: FaultInjectionConfig::default(),
            monitoring: MonitoringConfig {
                metrics_collection_interval_seconds: 1.0,
                job_id: Some("job-1".to_string()),
                ..MonitoringConfig::default()
            },
            data_exchange: DataExchangeConfig::default(),
            data_handler: DataHandlerConfig {
                instance_id: Some("instance-a".to_string()),
                job_id: Some("job-1".to_string()),
                validation_timeout_seconds: 30.0,
                storage_dir: PathBuf::from("/tmp/failover-tester/data"),
            },
            crossdc_toolkit: None,
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Resolve `$ENV:` credentials and replace `$CRED:` references in place.
pub fn resolve_credentials<F>(raw: &mut Value, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved: HashMap<String, Value> = HashMap::new();

    if let Some(Value::Object(credentials)) = raw.get("credentials") {
        for (name, value) in credentials {
            match value.as_str().and_then(|s| s.strip_prefix(ENV_PREFIX)) {
                Some(var) => match env(var) {
                    Some(found) => {
                        resolved.insert(name.clone(), Value::String(found));
                    }
                    None => {
                        warn!(credential = %name, variable = %var, "Environment variable not found for credential");
                    }
                },
                None => {
                    resolved.insert(name.clone(), value.clone());
                }
            }
        }
    }

    if let Some(Value::Object(credentials)) = raw.get_mut("credentials") {
        for (name, value) in credentials.iter_mut() {
            if let Some(found) = resolved.get(name) {
                *value = found.clone();
            }
        }
    }

    replace_credential_refs(raw, &resolved);
}

fn replace_credential_refs(value: &mut Value, credentials: &HashMap<String, Value>) {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix(CRED_PREFIX) {
                match credentials.get(name) {
                    Some(found) => *value = found.clone(),
                    None => warn!(credential = %name, "Credential not found"),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_credential_refs(item, credentials);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                replace_credential_refs(item, credentials);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Both datacenters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacentersConfig {
    pub primary: DatacenterConfig,
    pub secondary: DatacenterConfig,
}

impl DatacentersConfig {
    pub fn get(&self, site: Site) -> &DatacenterConfig {
        match site {
            Site::Primary => &self.primary,
            Site::Secondary => &self.secondary,
        }
    }
}

/// Control-plane access for one datacenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterConfig {
    /// Base URL of the REST management API.
    pub api_url: String,
    /// Bearer token.
    pub auth_token: String,
    /// Verify TLS certificates.
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub domain_id: Option<String>,
    /// Instance hosting the application under test.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl DatacenterConfig {
    fn local(api_url: &str, instance_id: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            auth_token: "dev-token".to_string(),
            verify_ssl: false,
            domain_id: None,
            instance_id: Some(instance_id.to_string()),
        }
    }
}

/// Metrics monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Poll interval of the background monitor.
    #[serde(default = "default_collection_interval")]
    pub metrics_collection_interval_seconds: f64,
    /// Job watched for health and activation.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub primary_instance_id: Option<String>,
    #[serde(default)]
    pub secondary_instance_id: Option<String>,
    /// Optional Prometheus source.
    #[serde(default)]
    pub prometheus: Option<PrometheusConfig>,
}

impl MonitoringConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs_f64(self.metrics_collection_interval_seconds.max(0.001))
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_collection_interval_seconds: default_collection_interval(),
            job_id: None,
            primary_instance_id: None,
            secondary_instance_id: None,
            prometheus: None,
        }
    }
}

/// Prometheus servers of both datacenters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub primary_url: Option<String>,
    #[serde(default)]
    pub secondary_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// Metric names or PromQL expressions queried on every collection.
    #[serde(default = "default_prometheus_metrics")]
    pub metrics: Vec<String>,
    #[serde(default = "default_prometheus_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl PrometheusConfig {
    pub fn url(&self, site: Site) -> Option<&str> {
        match site {
            Site::Primary => self.primary_url.as_deref(),
            Site::Secondary => self.secondary_url.as_deref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.001))
    }
}

/// Data-exchange client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataExchangeConfig {
    #[serde(default = "default_endpoint_timeout")]
    pub endpoint_timeout_seconds: f64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub default_format: DataFormat,
}

impl DataExchangeConfig {
    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.endpoint_timeout_seconds.max(0.001))
    }
}

impl Default for DataExchangeConfig {
    fn default() -> Self {
        Self {
            endpoint_timeout_seconds: default_endpoint_timeout(),
            max_batch_size: default_max_batch_size(),
            default_format: DataFormat::Json,
        }
    }
}

/// Dataset handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataHandlerConfig {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_seconds: f64,
    /// Directory for dataset snapshots and relative input files.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl DataHandlerConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.validation_timeout_seconds.max(0.001))
    }
}

impl Default for DataHandlerConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            job_id: None,
            validation_timeout_seconds: default_validation_timeout(),
            storage_dir: default_storage_dir(),
        }
    }
}

/// Cross-DC failover toolkit status configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolkitConfig {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default = "default_toolkit_interval")]
    pub status_check_interval_seconds: f64,
    #[serde(default)]
    pub local_dc_name: String,
    #[serde(default)]
    pub remote_dc_name: String,
    /// 1 = active, 0 = passive.
    #[serde(default = "default_operation_mode")]
    pub operation_mode: u8,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Console log level (DEBUG, INFO, WARNING, ERROR, CRITICAL).
    #[serde(default = "default_console_level")]
    pub console_level: String,
    /// Emit JSON lines on the console.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: default_console_level(),
            json_logs: false,
        }
    }
}

/// Control-plane client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.001))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_api_timeout(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_collection_interval() -> f64 {
    5.0
}

fn default_prometheus_metrics() -> Vec<String> {
    [
        "up",
        "process_cpu_seconds_total",
        "process_resident_memory_bytes",
        "streams_job_healthy",
        "streams_job_nTuplesProcessed",
        "streams_job_nTuplesSubmitted",
        "streams_instance_status",
        "jvm_memory_bytes_used",
        "jvm_threads_current",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_prometheus_timeout() -> f64 {
    10.0
}

fn default_endpoint_timeout() -> f64 {
    60.0
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_validation_timeout() -> f64 {
    300.0
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_toolkit_interval() -> f64 {
    10.0
}

fn default_operation_mode() -> u8 {
    1
}

fn default_console_level() -> String {
    "INFO".to_string()
}

fn default_api_timeout() -> f64 {
    60.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    0.5
}
