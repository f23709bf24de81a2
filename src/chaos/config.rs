//! Remote access configuration for fault injection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Fault injection configuration (`fault_injection` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    /// SSH access used by network and process injectors.
    #[serde(default)]
    pub ssh: SshConfig,
    /// Network layout used by network injectors.
    #[serde(default)]
    pub network: NetworkConfig,
}

/// SSH defaults plus per-host overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Host aliases used in scenarios.
    #[serde(default)]
    pub hosts: HashMap<String, SshHostConfig>,
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: None,
            private_key_path: None,
            password: None,
            connection_timeout: default_connection_timeout(),
            hosts: HashMap::new(),
        }
    }
}

/// One SSH host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshHostConfig {
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

/// Network layout of the two datacenters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to shape per host alias.
    #[serde(default)]
    pub interfaces: HashMap<String, String>,
    /// Address range of the primary site.
    #[serde(default)]
    pub primary_network: Option<String>,
    /// Address range of the secondary site.
    #[serde(default)]
    pub secondary_network: Option<String>,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_ssh_port() -> u16 {
    22
}
