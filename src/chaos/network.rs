//! Network faults applied with `iptables` and `tc` over a remote shell.

use super::config::NetworkConfig;
use super::injector::{FaultInjectionResult, FaultInjector};
use super::types::{Mechanism, NetworkFault};
use crate::error::{FailoverError, Result};
use crate::remote::{ExecutedCommand, RemoteExecutor, RemoteSession};
use regex::Regex;
use serde_json::json;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_INTERFACE: &str = "eth0";
const DEFAULT_ROUTE_COMMAND: &str = "ip route | grep default | awk '{print $5}' | head -n 1";

pub struct NetworkInjector {
    fault: NetworkFault,
    network: NetworkConfig,
    session: RemoteSession,
    /// Interface resolved during injection.
    interface: Option<String>,
}

impl NetworkInjector {
    pub fn new(
        fault: NetworkFault,
        network: NetworkConfig,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            fault,
            network,
            session: RemoteSession::new(executor),
            interface: None,
        }
    }

    fn host(&self) -> &str {
        self.fault.host()
    }

    fn fail(&self, message: String) -> FailoverError {
        FailoverError::FaultInjection(format!("Failed to inject {}: {}", self.fault.kind(), message))
    }

    /// Partition target network, falling back to the primary network.
    fn target_network(&self) -> Result<String> {
        let network = match &self.fault {
            NetworkFault::Partition { target_network, .. } => target_network.clone(),
            _ => None,
        }
        .or_else(|| self.network.primary_network.clone())
        .ok_or_else(|| {
            self.fail("Target network must be specified for network partition".to_string())
        })?;

        if !is_valid_network(&network) {
            return Err(self.fail(format!("Invalid target network format: {}", network)));
        }
        Ok(network)
    }

    /// Interface from the scenario, the config, the default route, or `eth0`.
    async fn resolve_interface(&mut self) -> Result<String> {
        if let Some(interface) = &self.interface {
            return Ok(interface.clone());
        }

        let explicit = match &self.fault {
            NetworkFault::Latency { interface, .. }
            | NetworkFault::PacketLoss { interface, .. }
            | NetworkFault::Bandwidth { interface, .. } => interface.clone(),
            NetworkFault::Partition { .. } => None,
        };

        let interface = match explicit.or_else(|| self.network.interfaces.get(self.host()).cloned()) {
            Some(interface) => interface,
            None => {
                let output = self.session.run(self.fault.host(), DEFAULT_ROUTE_COMMAND).await?;
                let detected = output.stdout.trim();
                if output.success() && !detected.is_empty() {
                    detected.to_string()
                } else {
                    warn!(host = %self.host(), "Could not determine default interface, using {}", DEFAULT_INTERFACE);
                    DEFAULT_INTERFACE.to_string()
                }
            }
        };

        self.interface = Some(interface.clone());
        Ok(interface)
    }

    async fn apply(&mut self) -> Result<FaultInjectionResult> {
        let host = self.host().to_string();

        if let NetworkFault::Partition { .. } = self.fault {
            let network = self.target_network()?;
            let command = format!(
                "sudo iptables -A INPUT -s {net} -j DROP && sudo iptables -A OUTPUT -d {net} -j DROP",
                net = network
            );
            let output = self.session.run(&host, &command).await?;
            if !output.success() {
                return Err(self.fail(format!("Failed to create iptables rules: {}", output.stderr)));
            }

            info!(host = %host, target_network = %network, "Injected network partition");
            return Ok(self.result(
                true,
                json!({"host": host, "target_network": network, "rules_added": true}),
            ));
        }

        let check = self.session.run(&host, "which tc").await?;
        if !check.success() {
            return Err(self.fail(format!("tc command not available on {}", host)));
        }

        let interface = self.resolve_interface().await?;

        // An existing root qdisc would make `add` fail; a missing one is fine.
        self.session
            .run(&host, &format!("sudo tc qdisc del dev {} root", interface))
            .await?;

        let (command, details) = match &self.fault {
            NetworkFault::Latency { latency_ms, .. } => (
                format!("sudo tc qdisc add dev {} root netem delay {}ms", interface, latency_ms),
                json!({"host": host, "interface": interface, "latency_ms": latency_ms}),
            ),
            NetworkFault::PacketLoss { percentage, .. } => (
                format!("sudo tc qdisc add dev {} root netem loss {}%", interface, percentage),
                json!({"host": host, "interface": interface, "packet_loss_percentage": percentage}),
            ),
            NetworkFault::Bandwidth { limit_kbps, .. } => (
                format!(
                    "sudo tc qdisc add dev {if_} root handle 1: htb default 10 && \
                     sudo tc class add dev {if_} parent 1: classid 1:10 htb rate {rate}kbit",
                    if_ = interface,
                    rate = limit_kbps
                ),
                json!({"host": host, "interface": interface, "bandwidth_limit_kbps": limit_kbps}),
            ),
            NetworkFault::Partition { .. } => {
                return Err(FailoverError::Internal(
                    "partition faults do not use tc".to_string(),
                ))
            }
        };

        let output = self.session.run(&host, &command).await?;
        if !output.success() {
            return Err(self.fail(format!("Failed to add tc rules: {}", output.stderr)));
        }

        info!(host = %host, interface = %interface, kind = self.fault.kind(), "Injected network fault");
        Ok(self.result(true, details))
    }

    fn result(&self, success: bool, details: serde_json::Value) -> FaultInjectionResult {
        FaultInjectionResult::new(success, Mechanism::Network, self.fault.kind(), details)
            .with_actions(self.session.executed())
    }
}

#[async_trait::async_trait]
impl FaultInjector for NetworkInjector {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Network
    }

    fn kind(&self) -> &'static str {
        self.fault.kind()
    }

    async fn inject(&mut self) -> Result<FaultInjectionResult> {
        info!(kind = self.fault.kind(), host = %self.host(), "Injecting network fault");

        match self.apply().await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(kind = self.fault.kind(), error = %e, "Network fault injection failed");
                if let Err(cleanup_error) = self.cleanup().await {
                    warn!(error = %cleanup_error, "Cleanup after failed injection failed");
                }
                Err(e)
            }
        }
    }

    async fn verify(&mut self) -> Result<FaultInjectionResult> {
        let host = self.host().to_string();

        let (command, signature, interface) = match &self.fault {
            NetworkFault::Partition { .. } => ("sudo iptables -L -n".to_string(), "DROP", None),
            fault => {
                let signature = if matches!(fault, NetworkFault::Bandwidth { .. }) {
                    "htb"
                } else {
                    "netem"
                };
                let interface = self.resolve_interface().await?;
                (format!("sudo tc qdisc show dev {}", interface), signature, Some(interface))
            }
        };

        let output = self.session.run(&host, &command).await?;
        if !output.success() {
            return Err(FailoverError::FaultInjection(format!(
                "Failed to verify {} on {}: {}",
                self.fault.kind(),
                host,
                output.stderr
            )));
        }

        let rules_found = output.stdout.contains(signature);
        if rules_found {
            info!(host = %host, kind = self.fault.kind(), "Verified network fault rules");
        } else {
            warn!(host = %host, kind = self.fault.kind(), "Network fault rules not found");
        }

        Ok(FaultInjectionResult::new(
            rules_found,
            Mechanism::Network,
            self.fault.kind(),
            json!({
                "host": host,
                "interface": interface,
                "rules_found": rules_found,
                "output": output.stdout,
            }),
        ))
    }

    async fn cleanup(&mut self) -> Result<FaultInjectionResult> {
        info!(kind = self.fault.kind(), "Cleaning up network fault injection");

        let executed = self.session.executed();
        let tc_targets = tc_cleanup_targets(&executed);
        let iptables_hosts = iptables_cleanup_hosts(&executed);

        let mut success = true;
        let mut performed = Vec::new();

        for (host, interface) in &tc_targets {
            let command = format!("sudo tc qdisc del dev {} root", interface);
            match self.session.run(host, &command).await {
                Ok(output) if output.success() => performed.push(ExecutedCommand {
                    host: host.clone(),
                    command,
                    exit_code: output.exit_code,
                }),
                Ok(output) => {
                    warn!(host = %host, interface = %interface, stderr = %output.stderr, "Failed to remove tc rules");
                    success = false;
                }
                Err(e) => {
                    warn!(host = %host, interface = %interface, error = %e, "Failed to remove tc rules");
                    success = false;
                }
            }
        }

        for host in &iptables_hosts {
            let command = "sudo iptables -F".to_string();
            match self.session.run(host, &command).await {
                Ok(output) if output.success() => performed.push(ExecutedCommand {
                    host: host.clone(),
                    command,
                    exit_code: output.exit_code,
                }),
                Ok(output) => {
                    warn!(host = %host, stderr = %output.stderr, "Failed to flush iptables rules");
                    success = false;
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "Failed to flush iptables rules");
                    success = false;
                }
            }
        }

        self.session.reset().await;
        self.interface = None;

        Ok(FaultInjectionResult::new(
            success,
            Mechanism::Network,
            self.fault.kind(),
            json!({
                "tc_cleanup": tc_targets.len(),
                "iptables_cleanup": iptables_hosts.len(),
            }),
        )
        .with_actions(performed))
    }
}

/// `(host, interface)` pairs that received a tc qdisc.
fn tc_cleanup_targets(executed: &[ExecutedCommand]) -> BTreeSet<(String, String)> {
    let Ok(pattern) = Regex::new(r"tc qdisc add dev (\S+)") else {
        return BTreeSet::new();
    };
    executed
        .iter()
        .filter_map(|c| {
            pattern
                .captures(&c.command)
                .map(|caps| (c.host.clone(), caps[1].to_string()))
        })
        .collect()
}

/// Hosts that received iptables rules.
fn iptables_cleanup_hosts(executed: &[ExecutedCommand]) -> BTreeSet<String> {
    executed
        .iter()
        .filter(|c| c.command.contains("iptables -A"))
        .map(|c| c.host.clone())
        .collect()
}

/// Accepts an address or a CIDR block.
fn is_valid_network(network: &str) -> bool {
    let (addr, prefix) = match network.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (network, None),
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    match prefix {
        None => true,
        Some(p) => p.parse::<u8>().map(|p| p <= max_prefix).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CommandOutput;
    use parking_lot::Mutex;

    /// Replies by command prefix; unmatched commands succeed silently.
    #[derive(Default)]
    struct Scripted {
        replies: Vec<(&'static str, CommandOutput)>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RemoteExecutor for Scripted {
        async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput> {
            self.log.lock().push(format!("{}: {}", host, command));
            Ok(self
                .replies
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, out)| out.clone())
                .unwrap_or_default())
        }

        async fn close(&self) {}
    }

    fn latency() -> NetworkFault {
        NetworkFault::Latency {
            host: "node-1".into(),
            interface: None,
            latency_ms: 200.0,
        }
    }

    #[test]
    fn test_is_valid_network() {
        assert!(is_valid_network("10.0.0.0/24"));
        assert!(is_valid_network("10.0.0.5"));
        assert!(is_valid_network("fd00::/8"));
        assert!(!is_valid_network("10.0.0.0/33"));
        assert!(!is_valid_network("primary-net"));
    }

    #[tokio::test]
    async fn test_latency_uses_default_route_interface() {
        let executor = Arc::new(Scripted {
            replies: vec![
                ("ip route", CommandOutput::new("ens5", "", 0)),
                ("sudo tc qdisc show", CommandOutput::new("qdisc netem 8001: root", "", 0)),
            ],
            ..Scripted::default()
        });
        let mut injector = NetworkInjector::new(latency(), NetworkConfig::default(), executor.clone());

        let result = injector.inject().await.unwrap();
        assert!(result.success);
        assert_eq!(result.details["interface"], "ens5");
        assert!(executor
            .log
            .lock()
            .contains(&"node-1: sudo tc qdisc add dev ens5 root netem delay 200ms".to_string()));

        let verify = injector.verify().await.unwrap();
        assert!(verify.success);
    }

    #[tokio::test]
    async fn test_cleanup_derives_interface_from_journal() {
        let executor = Arc::new(Scripted::default());
        let mut network = NetworkConfig::default();
        network.interfaces.insert("node-1".into(), "bond0".into());
        let mut injector = NetworkInjector::new(latency(), network, executor.clone());

        injector.inject().await.unwrap();
        let cleanup = injector.cleanup().await.unwrap();
        assert!(cleanup.success);
        assert_eq!(cleanup.details["tc_cleanup"], 1);
        assert_eq!(
            executor.log.lock().last().unwrap(),
            "node-1: sudo tc qdisc del dev bond0 root"
        );

        // Second cleanup has nothing left to undo.
        let again = injector.cleanup().await.unwrap();
        assert!(again.success);
        assert!(again.actions.is_empty());
    }

    #[tokio::test]
    async fn test_partition_falls_back_to_primary_network() {
        let executor = Arc::new(Scripted {
            replies: vec![("sudo iptables -L", CommandOutput::new("Chain INPUT\nACCEPT", "", 0))],
            ..Scripted::default()
        });
        let network = NetworkConfig {
            primary_network: Some("10.1.0.0/16".into()),
            ..NetworkConfig::default()
        };
        let fault = NetworkFault::Partition {
            host: "node-1".into(),
            target_network: None,
        };
        let mut injector = NetworkInjector::new(fault, network, executor.clone());

        let result = injector.inject().await.unwrap();
        assert_eq!(result.details["target_network"], "10.1.0.0/16");

        let verify = injector.verify().await.unwrap();
        assert!(!verify.success);

        let cleanup = injector.cleanup().await.unwrap();
        assert_eq!(cleanup.details["iptables_cleanup"], 1);
        assert!(executor
            .log
            .lock()
            .contains(&"node-1: sudo iptables -F".to_string()));
    }

    #[tokio::test]
    async fn test_failed_injection_cleans_up() {
        let executor = Arc::new(Scripted {
            replies: vec![("which tc", CommandOutput::new("", "not found", 1))],
            ..Scripted::default()
        });
        let mut injector = NetworkInjector::new(latency(), NetworkConfig::default(), executor);

        let err = injector.inject().await.unwrap_err();
        assert!(err.to_string().contains("tc command not available on node-1"));
    }

    #[tokio::test]
    async fn test_verify_signature_matches_fault() {
        let netem_only = || CommandOutput::new("qdisc netem 8001: root refcnt 2", "", 0);

        let executor = Arc::new(Scripted {
            replies: vec![("sudo tc qdisc show", netem_only())],
            ..Scripted::default()
        });
        let bandwidth = NetworkFault::Bandwidth {
            host: "node-1".into(),
            interface: Some("eth1".into()),
            limit_kbps: 512.0,
        };
        let mut injector = NetworkInjector::new(bandwidth, NetworkConfig::default(), executor);
        injector.inject().await.unwrap();
        let verify = injector.verify().await.unwrap();
        assert!(!verify.success, "a netem qdisc does not confirm a bandwidth limit");

        let executor = Arc::new(Scripted {
            replies: vec![("sudo tc qdisc show", CommandOutput::new("qdisc htb 1: root", "", 0))],
            ..Scripted::default()
        });
        let mut injector = NetworkInjector::new(latency(), NetworkConfig::default(), executor);
        injector.inject().await.unwrap();
        let verify = injector.verify().await.unwrap();
        assert!(!verify.success, "an htb qdisc does not confirm added latency");
    }

    #[tokio::test]
    async fn test_failed_tc_removal_degrades_cleanup() {
        let executor = Arc::new(Scripted {
            replies: vec![(
                "sudo tc qdisc del",
                CommandOutput::new("", "Cannot find device \"bond0\"", 2),
            )],
            ..Scripted::default()
        });
        let mut network = NetworkConfig::default();
        network.interfaces.insert("node-1".into(), "bond0".into());
        let mut injector = NetworkInjector::new(latency(), network, executor);

        injector.inject().await.unwrap();
        let cleanup = injector.cleanup().await.unwrap();

        assert!(!cleanup.success);
        assert!(cleanup.actions.is_empty());
        assert_eq!(cleanup.details["tc_cleanup"], 1);
    }
}
