//! Fault scenario model.
//!
//! [`FaultScenario`] is the serialized form found in scenario files. It is
//! lowered into validated [`LeafFault`]s, one per injection mechanism, before
//! any injector is built.

use crate::error::{FailoverError, Result};
use crate::types::Site;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Scenario Types
// ============================================================================

/// Fault to inject, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultScenario {
    NetworkPartition(PartitionSpec),
    NetworkLatency(LatencySpec),
    NetworkPacketLoss(PacketLossSpec),
    NetworkBandwidth(BandwidthSpec),
    ProcessKill(ProcessSpec),
    ProcessHang(ProcessSpec),
    ResourceExhaustion(ResourceSpec),
    ApiInitiated(ApiSpec),
    Combined(CombinedSpec),
}

impl FaultScenario {
    /// Scenario kind as written in scenario files.
    pub fn kind(&self) -> &'static str {
        match self {
            FaultScenario::NetworkPartition(_) => "network_partition",
            FaultScenario::NetworkLatency(_) => "network_latency",
            FaultScenario::NetworkPacketLoss(_) => "network_packet_loss",
            FaultScenario::NetworkBandwidth(_) => "network_bandwidth",
            FaultScenario::ProcessKill(_) => "process_kill",
            FaultScenario::ProcessHang(_) => "process_hang",
            FaultScenario::ResourceExhaustion(_) => "resource_exhaustion",
            FaultScenario::ApiInitiated(_) => "api_initiated",
            FaultScenario::Combined(_) => "combined",
        }
    }

    /// Lower the scenario into validated leaf faults.
    ///
    /// A leaf scenario yields exactly one fault. A combined scenario yields
    /// one fault per declared mechanism, in network, process, api order.
    pub fn leaves(&self) -> Result<Vec<LeafFault>> {
        match self {
            FaultScenario::Combined(combined) => {
                let mut leaves = Vec::new();
                if let Some(nested) = &combined.network_faults {
                    leaves.push(nested.leaf_for(Mechanism::Network)?);
                }
                if let Some(nested) = &combined.process_faults {
                    leaves.push(nested.leaf_for(Mechanism::Process)?);
                }
                if let Some(nested) = &combined.api_faults {
                    leaves.push(nested.leaf_for(Mechanism::Api)?);
                }
                if leaves.is_empty() {
                    return Err(FailoverError::Scenario(
                        "combined fault scenario declares no sub-scenarios".to_string(),
                    ));
                }
                Ok(leaves)
            }
            leaf => Ok(vec![leaf.leaf()?]),
        }
    }

    fn leaf_for(&self, expected: Mechanism) -> Result<LeafFault> {
        if matches!(self, FaultScenario::Combined(_)) {
            return Err(FailoverError::Scenario(
                "combined fault scenarios cannot be nested".to_string(),
            ));
        }
        let leaf = self.leaf()?;
        if leaf.mechanism() != expected {
            return Err(FailoverError::Scenario(format!(
                "{} faults cannot contain a {} scenario",
                expected,
                self.kind()
            )));
        }
        Ok(leaf)
    }

    fn leaf(&self) -> Result<LeafFault> {
        let leaf = match self {
            FaultScenario::NetworkPartition(spec) => LeafFault::Network(NetworkFault::Partition {
                host: require_host(&spec.host, "network partition")?,
                target_network: spec.target_network.clone(),
            }),
            FaultScenario::NetworkLatency(spec) => LeafFault::Network(NetworkFault::Latency {
                host: require_host(&spec.host, "network latency")?,
                interface: spec.interface.clone(),
                latency_ms: require_positive(spec.latency_ms, "Latency (ms)")?,
            }),
            FaultScenario::NetworkPacketLoss(spec) => {
                let percentage =
                    require_positive(spec.packet_loss_percentage, "Packet loss percentage")?;
                if percentage > 100.0 {
                    return Err(FailoverError::Scenario(
                        "Packet loss percentage must not exceed 100".to_string(),
                    ));
                }
                LeafFault::Network(NetworkFault::PacketLoss {
                    host: require_host(&spec.host, "packet loss")?,
                    interface: spec.interface.clone(),
                    percentage,
                })
            }
            FaultScenario::NetworkBandwidth(spec) => LeafFault::Network(NetworkFault::Bandwidth {
                host: require_host(&spec.host, "bandwidth limitation")?,
                interface: spec.interface.clone(),
                limit_kbps: require_positive(spec.bandwidth_limit_kbps, "Bandwidth limit (kbps)")?,
            }),
            FaultScenario::ProcessKill(spec) => LeafFault::Process(ProcessFault::Kill {
                host: require_host(&spec.host, "process kill")?,
                selector: spec.selector()?,
            }),
            FaultScenario::ProcessHang(spec) => LeafFault::Process(ProcessFault::Hang {
                host: require_host(&spec.host, "process hang")?,
                selector: spec.selector()?,
                terminate_after_continue: spec.terminate_after_continue,
            }),
            FaultScenario::ResourceExhaustion(spec) => {
                LeafFault::Process(ProcessFault::ResourceExhaustion(ResourceFault {
                    host: require_host(&spec.host, "resource exhaustion")?,
                    resource: spec.resource_type,
                    duration_seconds: spec.duration_seconds,
                    percentage: spec.resource_percentage,
                    io_path: spec.io_path.clone(),
                }))
            }
            FaultScenario::ApiInitiated(spec) => LeafFault::Api(spec.fault()?),
            FaultScenario::Combined(_) => {
                return Err(FailoverError::Scenario(
                    "combined scenario is not a leaf".to_string(),
                ))
            }
        };
        Ok(leaf)
    }
}

fn require_host(host: &Option<String>, what: &str) -> Result<String> {
    match host.as_deref().map(str::trim) {
        Some(h) if !h.is_empty() => Ok(h.to_string()),
        _ => Err(FailoverError::Scenario(format!(
            "Host must be specified for {}",
            what
        ))),
    }
}

fn require_positive(value: Option<f64>, what: &str) -> Result<f64> {
    match value {
        Some(v) if v > 0.0 => Ok(v),
        _ => Err(FailoverError::Scenario(format!("{} must be specified", what))),
    }
}

/// `network_partition` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionSpec {
    #[serde(default, alias = "target")]
    pub host: Option<String>,
    /// Address range to block; defaults to the configured primary network.
    #[serde(default)]
    pub target_network: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// `network_latency` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySpec {
    #[serde(default, alias = "target")]
    pub host: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// `network_packet_loss` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketLossSpec {
    #[serde(default, alias = "target")]
    pub host: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub packet_loss_percentage: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// `network_bandwidth` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSpec {
    #[serde(default, alias = "target")]
    pub host: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub bandwidth_limit_kbps: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// `process_kill` / `process_hang` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    #[serde(default, alias = "target")]
    pub host: Option<String>,
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default)]
    pub process_pattern: Option<String>,
    /// Send SIGTERM after resuming a hung process during cleanup.
    #[serde(default)]
    pub terminate_after_continue: bool,
}

impl ProcessSpec {
    fn selector(&self) -> Result<ProcessSelector> {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|v| !v.trim().is_empty()).cloned();
        match (non_empty(&self.process_name), non_empty(&self.process_pattern)) {
            (Some(name), _) => Ok(ProcessSelector::Name(name)),
            (None, Some(pattern)) => Ok(ProcessSelector::Pattern(pattern)),
            (None, None) => Err(FailoverError::Scenario(
                "Process name or pattern must be specified".to_string(),
            )),
        }
    }
}

/// `resource_exhaustion` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, alias = "target")]
    pub host: Option<String>,
    #[serde(default)]
    pub resource_type: ResourceType,
    #[serde(default = "default_stress_duration")]
    pub duration_seconds: u64,
    /// Share of total memory to consume.
    #[serde(default = "default_resource_percentage")]
    pub resource_percentage: f64,
    #[serde(default = "default_io_path")]
    pub io_path: String,
}

/// `api_initiated` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub api_operation: ApiOperationKind,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub operator_id: Option<String>,
    /// Site whose control plane receives the operation.
    #[serde(default)]
    pub datacenter: Site,
}

impl ApiSpec {
    fn fault(&self) -> Result<ApiFault> {
        let instance = || {
            self.instance_id.clone().ok_or_else(|| {
                FailoverError::Scenario(format!(
                    "Instance ID must be specified for {} operation",
                    self.api_operation
                ))
            })
        };
        let job = || {
            self.job_id.clone().ok_or_else(|| {
                FailoverError::Scenario(format!(
                    "Job ID must be specified for {} operation",
                    self.api_operation
                ))
            })
        };

        let operation = match self.api_operation {
            ApiOperationKind::StopJob => ApiOperation::StopJob {
                instance_id: instance()?,
                job_id: job()?,
            },
            ApiOperationKind::PauseJob => ApiOperation::PauseJob {
                instance_id: instance()?,
                job_id: job()?,
            },
            ApiOperationKind::TerminateInstance => ApiOperation::TerminateInstance {
                instance_id: instance()?,
            },
            ApiOperationKind::DisableOperator => ApiOperation::DisableOperator {
                instance_id: instance()?,
                job_id: job()?,
                operator_id: self.operator_id.clone().ok_or_else(|| {
                    FailoverError::Scenario(
                        "Operator ID must be specified for disable_operator operation".to_string(),
                    )
                })?,
            },
            ApiOperationKind::TriggerFailover => ApiOperation::TriggerFailover {
                instance_id: instance()?,
                job_id: job()?,
            },
        };

        Ok(ApiFault {
            operation,
            datacenter: self.datacenter,
        })
    }
}

/// `combined` parameters: one nested scenario per mechanism.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedSpec {
    #[serde(default)]
    pub network_faults: Option<Box<FaultScenario>>,
    #[serde(default)]
    pub process_faults: Option<Box<FaultScenario>>,
    #[serde(default)]
    pub api_faults: Option<Box<FaultScenario>>,
}

fn default_stress_duration() -> u64 {
    60
}

fn default_resource_percentage() -> f64 {
    80.0
}

fn default_io_path() -> String {
    "/tmp/stress_io_test".to_string()
}

// ============================================================================
// Validated Leaf Faults
// ============================================================================

/// Injection mechanism of a leaf fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    Network,
    Process,
    Api,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mechanism::Network => "network",
            Mechanism::Process => "process",
            Mechanism::Api => "api",
        };
        f.write_str(s)
    }
}

/// A validated fault handled by a single injector.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafFault {
    Network(NetworkFault),
    Process(ProcessFault),
    Api(ApiFault),
}

impl LeafFault {
    pub fn mechanism(&self) -> Mechanism {
        match self {
            LeafFault::Network(_) => Mechanism::Network,
            LeafFault::Process(_) => Mechanism::Process,
            LeafFault::Api(_) => Mechanism::Api,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkFault {
    Partition {
        host: String,
        target_network: Option<String>,
    },
    Latency {
        host: String,
        interface: Option<String>,
        latency_ms: f64,
    },
    PacketLoss {
        host: String,
        interface: Option<String>,
        percentage: f64,
    },
    Bandwidth {
        host: String,
        interface: Option<String>,
        limit_kbps: f64,
    },
}

impl NetworkFault {
    pub fn host(&self) -> &str {
        match self {
            NetworkFault::Partition { host, .. }
            | NetworkFault::Latency { host, .. }
            | NetworkFault::PacketLoss { host, .. }
            | NetworkFault::Bandwidth { host, .. } => host,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NetworkFault::Partition { .. } => "network_partition",
            NetworkFault::Latency { .. } => "network_latency",
            NetworkFault::PacketLoss { .. } => "network_packet_loss",
            NetworkFault::Bandwidth { .. } => "network_bandwidth",
        }
    }
}

/// How target processes are located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSelector {
    /// Whole-word match on the command line.
    Name(String),
    /// Substring match on the command line.
    Pattern(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessFault {
    Kill {
        host: String,
        selector: ProcessSelector,
    },
    Hang {
        host: String,
        selector: ProcessSelector,
        terminate_after_continue: bool,
    },
    ResourceExhaustion(ResourceFault),
}

impl ProcessFault {
    pub fn host(&self) -> &str {
        match self {
            ProcessFault::Kill { host, .. } | ProcessFault::Hang { host, .. } => host,
            ProcessFault::ResourceExhaustion(fault) => &fault.host,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProcessFault::Kill { .. } => "process_kill",
            ProcessFault::Hang { .. } => "process_hang",
            ProcessFault::ResourceExhaustion(_) => "resource_exhaustion",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceFault {
    pub host: String,
    pub resource: ResourceType,
    pub duration_seconds: u64,
    pub percentage: f64,
    pub io_path: String,
}

/// Resource consumed by a resource exhaustion fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[default]
    Cpu,
    Memory,
    Io,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::Io => "io",
        };
        f.write_str(s)
    }
}

/// Control-plane operation requested in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiOperationKind {
    StopJob,
    PauseJob,
    TerminateInstance,
    DisableOperator,
    TriggerFailover,
}

impl fmt::Display for ApiOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiOperationKind::StopJob => "stop_job",
            ApiOperationKind::PauseJob => "pause_job",
            ApiOperationKind::TerminateInstance => "terminate_instance",
            ApiOperationKind::DisableOperator => "disable_operator",
            ApiOperationKind::TriggerFailover => "trigger_failover",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiFault {
    pub operation: ApiOperation,
    pub datacenter: Site,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiOperation {
    StopJob {
        instance_id: String,
        job_id: String,
    },
    PauseJob {
        instance_id: String,
        job_id: String,
    },
    TerminateInstance {
        instance_id: String,
    },
    DisableOperator {
        instance_id: String,
        job_id: String,
        operator_id: String,
    },
    TriggerFailover {
        instance_id: String,
        job_id: String,
    },
}

impl ApiOperation {
    pub fn kind(&self) -> ApiOperationKind {
        match self {
            ApiOperation::StopJob { .. } => ApiOperationKind::StopJob,
            ApiOperation::PauseJob { .. } => ApiOperationKind::PauseJob,
            ApiOperation::TerminateInstance { .. } => ApiOperationKind::TerminateInstance,
            ApiOperation::DisableOperator { .. } => ApiOperationKind::DisableOperator,
            ApiOperation::TriggerFailover { .. } => ApiOperationKind::TriggerFailover,
        }
    }
}
