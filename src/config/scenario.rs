//! Test scenario definition.
//!
//! A scenario is loaded once per run and never mutated afterwards.

use crate::chaos::FaultScenario;
use crate::error::{FailoverError, Result};
use crate::types::DataFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// One failover test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestScenario {
    pub test_id: String,
    pub description: String,
    /// Application bundle submitted for the test.
    pub streams_application_sab: PathBuf,
    #[serde(default)]
    pub submission_params: HashMap<String, Value>,
    /// Job under test when it differs from the configured one.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub pre_failover_data: PreFailoverData,
    pub fault_scenario: FaultScenario,
    #[serde(default)]
    pub failover_trigger_method: FailoverTrigger,
    #[serde(default = "default_recovery_time")]
    pub expected_recovery_time_seconds: f64,
    #[serde(default)]
    pub expected_data_loss_percentage: f64,
    /// Expected metric conditions keyed by metric name or dotted path.
    #[serde(default)]
    pub expected_metrics: BTreeMap<String, ExpectedMetric>,
    #[serde(default)]
    pub post_failover_validation_checks: Vec<ValidationCheck>,
}

impl TestScenario {
    /// Load and validate a scenario file.
    ///
    /// A relative application bundle path is resolved against the scenario
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FailoverError::Config(format!(
                "Failed to read scenario file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut scenario = Self::from_yaml_str(&content)?;

        if scenario.streams_application_sab.is_relative() {
            if let Some(base) = path.parent() {
                scenario.streams_application_sab = base.join(&scenario.streams_application_sab);
            }
        }

        debug!(
            test_id = %scenario.test_id,
            fault = scenario.fault_scenario.kind(),
            "Loaded scenario"
        );
        Ok(scenario)
    }

    /// Parse and validate a scenario from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(content)
            .map_err(|e| FailoverError::Config(format!("Failed to parse scenario: {}", e)))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject malformed scenarios before any phase starts.
    pub fn validate(&self) -> Result<()> {
        if self.test_id.trim().is_empty() {
            return Err(FailoverError::InvalidConfig {
                field: "test_id".to_string(),
                reason: "test id must not be empty".to_string(),
            });
        }

        if !(self.expected_recovery_time_seconds > 0.0) {
            return Err(FailoverError::InvalidConfig {
                field: "expected_recovery_time_seconds".to_string(),
                reason: "recovery time must be positive".to_string(),
            });
        }

        if !(0.0..=100.0).contains(&self.expected_data_loss_percentage) {
            return Err(FailoverError::InvalidConfig {
                field: "expected_data_loss_percentage".to_string(),
                reason: "loss percentage must be between 0 and 100".to_string(),
            });
        }

        self.pre_failover_data.validate()?;
        self.fault_scenario.leaves()?;

        for check in &self.post_failover_validation_checks {
            if check.check_type == ValidationCheckType::Performance && check.metric.is_none() {
                return Err(FailoverError::InvalidConfig {
                    field: "post_failover_validation_checks".to_string(),
                    reason: "performance checks need a metric".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Bound on the FAILOVER_MONITORING wait: twice the expected recovery time.
    pub fn failover_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.expected_recovery_time_seconds * 2.0)
    }
}

/// How the pre-failover dataset is produced and injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFailoverData {
    #[serde(default)]
    pub generator_type: GeneratorType,
    #[serde(default = "default_event_count")]
    pub event_count: usize,
    /// Field name to field type; insertion order is kept.
    #[serde(default, with = "ordered_schema")]
    pub schema: Vec<(String, FieldType)>,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub data_format: Option<DataFormat>,
    /// Target rate; `None` injects the whole dataset at once.
    #[serde(default)]
    pub injection_rate_events_per_second: Option<f64>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_input_port")]
    pub input_port: String,
    #[serde(default = "default_output_port")]
    pub output_port: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
}

impl PreFailoverData {
    fn validate(&self) -> Result<()> {
        if self.generator_type == GeneratorType::File && self.input_file.is_none() {
            return Err(FailoverError::InvalidConfig {
                field: "pre_failover_data.input_file".to_string(),
                reason: "input file not specified for file generator".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(FailoverError::InvalidConfig {
                field: "pre_failover_data.batch_size".to_string(),
                reason: "batch size must be non-zero".to_string(),
            });
        }
        if let Some(rate) = self.injection_rate_events_per_second {
            if !(rate > 0.0) {
                return Err(FailoverError::InvalidConfig {
                    field: "pre_failover_data.injection_rate_events_per_second".to_string(),
                    reason: "injection rate must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Schema in use, falling back to the default event layout.
    pub fn effective_schema(&self) -> Vec<(String, FieldType)> {
        if !self.schema.is_empty() {
            return self.schema.clone();
        }
        vec![
            ("event_id".to_string(), FieldType::String),
            ("timestamp".to_string(), FieldType::Timestamp),
            ("value".to_string(), FieldType::Number),
            ("payload".to_string(), FieldType::String),
        ]
    }
}

impl Default for PreFailoverData {
    fn default() -> Self {
        Self {
            generator_type: GeneratorType::default(),
            event_count: default_event_count(),
            schema: Vec::new(),
            input_file: None,
            data_format: None,
            injection_rate_events_per_second: None,
            batch_size: default_batch_size(),
            input_port: default_input_port(),
            output_port: default_output_port(),
            id_field: default_id_field(),
            timestamp_field: default_timestamp_field(),
        }
    }
}

/// Dataset generator kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorType {
    #[default]
    Deterministic,
    Random,
    File,
}

/// Field type of a generated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Timestamp,
    Object,
    Array,
    /// Unrecognised types produce no value.
    #[serde(other)]
    Unknown,
}

/// How failover is expected to be triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverTrigger {
    #[default]
    Automatic,
    ApiInitiated,
    Manual,
}

/// Expected bounds for one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedMetric {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Compared numerically against numbers, by JSON equality otherwise.
    #[serde(default)]
    pub equals: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Post-failover check folded into the validation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    #[serde(rename = "type")]
    pub check_type: ValidationCheckType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub metric: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCheckType {
    DataIntegrity,
    Performance,
    Availability,
}

fn default_recovery_time() -> f64 {
    300.0
}

fn default_event_count() -> usize {
    100
}

fn default_batch_size() -> usize {
    100
}

fn default_input_port() -> String {
    "input".to_string()
}

fn default_output_port() -> String {
    "output".to_string()
}

fn default_id_field() -> String {
    "event_id".to_string()
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

/// Reads a schema mapping as an ordered list of fields.
mod ordered_schema {
    use super::FieldType;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(fields: &[(String, FieldType)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (name, field_type) in fields {
            map.serialize_entry(name, field_type)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, FieldType)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Vec<(String, FieldType)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of field name to field type")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, field_type)) = access.next_entry::<String, FieldType>()? {
                    fields.push((name, field_type));
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}
