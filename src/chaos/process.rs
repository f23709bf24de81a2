//! Process signalling and resource exhaustion over a remote shell.

use super::injector::{FaultInjectionResult, FaultInjector};
use super::types::{Mechanism, ProcessFault, ProcessSelector, ResourceFault, ResourceType};
use crate::error::{FailoverError, Result};
use crate::remote::{RemoteExecutor, RemoteSession};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

const STRESS_PROBE: &str = "which stress-ng || which stress || echo not_available";
const CPU_COUNT_COMMAND: &str = "nproc";
const TOTAL_MEMORY_COMMAND: &str = "free -m | grep Mem | awk '{print $2}'";
const DEFAULT_TOTAL_MEMORY_MB: u64 = 1024;

/// A row of `ps -eo pid,ppid,user,cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub user: String,
    pub cmd: String,
}

/// Parse `ps -eo pid,ppid,user,cmd` rows, skipping malformed lines.
pub fn parse_ps_output(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let (pid, rest) = line.trim().split_once(char::is_whitespace)?;
            let (ppid, rest) = rest.trim_start().split_once(char::is_whitespace)?;
            let (user, cmd) = rest.trim_start().split_once(char::is_whitespace)?;
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                ppid: ppid.parse().ok()?,
                user: user.to_string(),
                cmd: cmd.trim().to_string(),
            })
        })
        .collect()
}

// ============================================================================
// Stress Strategies
// ============================================================================

/// Load generators for resource exhaustion, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressStrategy {
    StressNg,
    Stress,
    /// `dd` and `python3` loops, available everywhere.
    Manual,
}

impl StressStrategy {
    pub const ORDERED: [StressStrategy; 3] =
        [StressStrategy::StressNg, StressStrategy::Stress, StressStrategy::Manual];

    pub fn name(&self) -> &'static str {
        match self {
            StressStrategy::StressNg => "stress-ng",
            StressStrategy::Stress => "stress",
            StressStrategy::Manual => "manual",
        }
    }

    /// Whether the probe output shows this tool installed.
    pub fn is_available(&self, probe: &str) -> bool {
        let probe = probe.trim();
        match self {
            StressStrategy::StressNg => probe.contains("stress-ng"),
            StressStrategy::Stress => {
                !probe.contains("not_available") && !probe.contains("stress-ng") && probe.ends_with("stress")
            }
            StressStrategy::Manual => true,
        }
    }

    /// First available strategy for a probe output.
    pub fn select(probe: &str) -> StressStrategy {
        Self::ORDERED
            .into_iter()
            .find(|s| s.is_available(probe))
            .unwrap_or(StressStrategy::Manual)
    }

    /// Command generating load for `fault`.
    pub fn command(&self, fault: &ResourceFault, cpu_count: u64, total_memory_mb: u64) -> String {
        let duration = fault.duration_seconds;
        let target_memory = (total_memory_mb as f64 * fault.percentage / 100.0) as u64;

        match (self, fault.resource) {
            (StressStrategy::StressNg, ResourceType::Cpu) => {
                format!("stress-ng --cpu {} --timeout {}s --background", cpu_count, duration)
            }
            (StressStrategy::StressNg, ResourceType::Memory) => format!(
                "stress-ng --vm 1 --vm-bytes {}M --timeout {}s --background",
                target_memory, duration
            ),
            (StressStrategy::StressNg, ResourceType::Io) => {
                format!("stress-ng --io 4 --timeout {}s --background", duration)
            }
            (StressStrategy::Stress, ResourceType::Cpu) => {
                format!("stress --cpu {} --timeout {}s &", cpu_count, duration)
            }
            (StressStrategy::Stress, ResourceType::Memory) => format!(
                "stress --vm 1 --vm-bytes {}M --timeout {}s &",
                target_memory, duration
            ),
            (StressStrategy::Stress, ResourceType::Io) => {
                format!("stress --io 4 --timeout {}s &", duration)
            }
            (StressStrategy::Manual, ResourceType::Cpu) => format!(
                "for i in $(seq 1 {}); do dd if=/dev/zero of=/dev/null bs=1M count=10000 & done; \
                 sleep {}; pkill -f 'dd if=/dev/zero'",
                cpu_count, duration
            ),
            (StressStrategy::Manual, ResourceType::Memory) => format!(
                "python3 -c 'import time; data = bytearray({} * 1024 * 1024); time.sleep({})' &",
                target_memory, duration
            ),
            (StressStrategy::Manual, ResourceType::Io) => format!(
                "dd if=/dev/zero of={path} bs=1M count=1000 oflag=direct & sleep {}; \
                 pkill -f 'dd if=/dev/zero'; rm -f {path}",
                duration,
                path = fault.io_path
            ),
        }
    }
}

/// Utilisation probe and threshold proving a resource is saturated.
fn utilisation_check(resource: ResourceType) -> (&'static str, f64) {
    match resource {
        ResourceType::Cpu => ("top -bn1 | grep 'Cpu(s)' | awk '{print $2}'", 70.0),
        ResourceType::Memory => ("free | grep Mem | awk '{print $3/$2 * 100.0}'", 70.0),
        ResourceType::Io => ("iostat -x 1 2 | tail -n 4 | head -n 1 | awk '{print $NF}'", 50.0),
    }
}

// ============================================================================
// Injector
// ============================================================================

pub struct ProcessInjector {
    fault: ProcessFault,
    session: RemoteSession,
    /// Processes signalled by `inject`.
    affected: Vec<ProcessInfo>,
    stress_started: bool,
}

impl ProcessInjector {
    pub fn new(fault: ProcessFault, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            fault,
            session: RemoteSession::new(executor),
            affected: Vec::new(),
            stress_started: false,
        }
    }

    fn host(&self) -> &str {
        self.fault.host()
    }

    fn result(&self, success: bool, details: serde_json::Value) -> FaultInjectionResult {
        FaultInjectionResult::new(success, Mechanism::Process, self.fault.kind(), details)
            .with_actions(self.session.executed())
    }

    async fn find_processes(&self, selector: &ProcessSelector) -> Result<Vec<ProcessInfo>> {
        let command = match selector {
            ProcessSelector::Name(name) => {
                format!("ps -eo pid,ppid,user,cmd | grep -v grep | grep -w '{}'", name)
            }
            ProcessSelector::Pattern(pattern) => {
                format!("ps -eo pid,ppid,user,cmd | grep -v grep | grep '{}'", pattern)
            }
        };

        let output = self.session.run(self.host(), &command).await?;
        // grep exits 1 when nothing matches
        if output.exit_code > 1 {
            return Err(FailoverError::FaultInjection(format!(
                "Failed to search for processes: {}",
                output.stderr
            )));
        }
        Ok(parse_ps_output(&output.stdout))
    }

    /// Send `signal` to every matching process; fails if none were signalled.
    async fn signal_processes(
        &self,
        selector: &ProcessSelector,
        signal: &str,
        verb: &str,
    ) -> Result<Vec<ProcessInfo>> {
        let processes = self.find_processes(selector).await?;
        if processes.is_empty() {
            return Err(FailoverError::FaultInjection(
                "No matching processes found".to_string(),
            ));
        }

        let host = self.host().to_string();
        let mut signalled = Vec::new();
        for process in processes {
            let output = self
                .session
                .run(&host, &format!("sudo kill -{} {}", signal, process.pid))
                .await?;
            if output.success() {
                info!(host = %host, pid = process.pid, cmd = %process.cmd, signal = %signal, "Signalled process");
                signalled.push(process);
            } else {
                warn!(host = %host, pid = process.pid, stderr = %output.stderr, "Failed to signal process");
            }
        }

        if signalled.is_empty() {
            return Err(FailoverError::FaultInjection(format!(
                "Failed to {} any processes",
                verb
            )));
        }
        Ok(signalled)
    }

    async fn start_stress(&mut self, fault: &ResourceFault) -> Result<FaultInjectionResult> {
        let host = self.host().to_string();

        let cpu_count = match fault.resource {
            ResourceType::Cpu => {
                let out = self.session.run(&host, CPU_COUNT_COMMAND).await?;
                out.stdout.trim().parse::<u64>().ok().filter(|_| out.success()).unwrap_or(1)
            }
            _ => 1,
        };
        let total_memory = match fault.resource {
            ResourceType::Memory => {
                let out = self.session.run(&host, TOTAL_MEMORY_COMMAND).await?;
                out.stdout
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|_| out.success())
                    .unwrap_or(DEFAULT_TOTAL_MEMORY_MB)
            }
            _ => DEFAULT_TOTAL_MEMORY_MB,
        };

        let probe = self.session.run(&host, STRESS_PROBE).await?;
        let strategy = StressStrategy::select(&probe.stdout);
        let command = strategy.command(fault, cpu_count, total_memory);

        let output = self.session.run(&host, &command).await?;
        if !output.success() {
            return Err(FailoverError::FaultInjection(format!(
                "Failed to start resource exhaustion: {}",
                output.stderr
            )));
        }
        self.stress_started = true;

        info!(
            host = %host,
            resource = %fault.resource,
            strategy = strategy.name(),
            duration_secs = fault.duration_seconds,
            "Started resource exhaustion"
        );
        Ok(self.result(
            true,
            json!({
                "host": host,
                "resource_type": fault.resource,
                "duration_seconds": fault.duration_seconds,
                "strategy": strategy.name(),
                "command": command,
            }),
        ))
    }

    async fn apply(&mut self) -> Result<FaultInjectionResult> {
        let host = self.host().to_string();
        match self.fault.clone() {
            ProcessFault::Kill { selector, .. } => {
                let killed = self.signal_processes(&selector, "9", "kill").await?;
                self.affected = killed.clone();
                Ok(self.result(
                    true,
                    json!({"host": host, "processes_killed": killed.len(), "killed_processes": killed}),
                ))
            }
            ProcessFault::Hang { selector, .. } => {
                let stopped = self.signal_processes(&selector, "STOP", "stop").await?;
                self.affected = stopped.clone();
                Ok(self.result(
                    true,
                    json!({"host": host, "processes_stopped": stopped.len(), "stopped_processes": stopped}),
                ))
            }
            ProcessFault::ResourceExhaustion(fault) => self.start_stress(&fault).await,
        }
    }

    async fn verify_stress(&self, resource: ResourceType) -> Result<FaultInjectionResult> {
        let (command, threshold) = utilisation_check(resource);
        let output = self.session.run(self.host(), command).await?;
        let raw = output.stdout.trim().replace(',', ".");

        let details = match raw.parse::<f64>() {
            Ok(usage) if output.success() => {
                let high = usage > threshold;
                return Ok(FaultInjectionResult::new(
                    high,
                    Mechanism::Process,
                    self.fault.kind(),
                    json!({"host": self.host(), "resource_type": resource, "usage_percent": usage, "threshold": threshold}),
                ));
            }
            _ if !output.success() || raw.is_empty() => {
                json!({"host": self.host(), "error": format!("Failed to check {} usage", resource)})
            }
            _ => json!({"host": self.host(), "error": format!("Invalid {} usage value: {}", resource, raw)}),
        };
        Ok(FaultInjectionResult::new(false, Mechanism::Process, self.fault.kind(), details))
    }
}

#[async_trait::async_trait]
impl FaultInjector for ProcessInjector {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Process
    }

    fn kind(&self) -> &'static str {
        self.fault.kind()
    }

    async fn inject(&mut self) -> Result<FaultInjectionResult> {
        info!(kind = self.fault.kind(), host = %self.host(), "Injecting process fault");

        match self.apply().await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(kind = self.fault.kind(), error = %e, "Process fault injection failed");
                if let Err(cleanup_error) = self.cleanup().await {
                    warn!(error = %cleanup_error, "Cleanup after failed injection failed");
                }
                Err(FailoverError::FaultInjection(format!(
                    "Failed to inject {}: {}",
                    self.fault.kind(),
                    e
                )))
            }
        }
    }

    async fn verify(&mut self) -> Result<FaultInjectionResult> {
        let host = self.host().to_string();

        match &self.fault {
            ProcessFault::Kill { .. } => {
                let mut still_running = Vec::new();
                for process in &self.affected {
                    let out = self
                        .session
                        .run(&host, &format!("ps -p {} -o pid= || echo 'Process not found'", process.pid))
                        .await?;
                    let stdout = out.stdout.trim();
                    if !stdout.is_empty() && !stdout.contains("Process not found") {
                        still_running.push(process.pid);
                    }
                }
                if !still_running.is_empty() {
                    warn!(host = %host, pids = ?still_running, "Killed processes are still running");
                }
                Ok(FaultInjectionResult::new(
                    still_running.is_empty(),
                    Mechanism::Process,
                    self.fault.kind(),
                    json!({"host": host, "processes_still_running": still_running, "expected": 0}),
                ))
            }
            ProcessFault::Hang { .. } => {
                let mut not_stopped = Vec::new();
                for process in &self.affected {
                    let out = self
                        .session
                        .run(&host, &format!("ps -o stat= -p {} 2>/dev/null || echo ''", process.pid))
                        .await?;
                    if !out.stdout.contains('T') {
                        not_stopped.push(process.pid);
                    }
                }
                Ok(FaultInjectionResult::new(
                    not_stopped.is_empty() && !self.affected.is_empty(),
                    Mechanism::Process,
                    self.fault.kind(),
                    json!({"host": host, "processes_not_stopped": not_stopped, "expected": 0}),
                ))
            }
            ProcessFault::ResourceExhaustion(fault) => self.verify_stress(fault.resource).await,
        }
    }

    async fn cleanup(&mut self) -> Result<FaultInjectionResult> {
        let host = self.host().to_string();
        let mut details = json!({"host": host});

        match self.fault.clone() {
            // A kill cannot be undone.
            ProcessFault::Kill { .. } => {
                details["message"] = json!("Process kill is irreversible");
            }
            ProcessFault::Hang {
                terminate_after_continue,
                ..
            } => {
                let mut continued = 0;
                for process in std::mem::take(&mut self.affected) {
                    let out = self
                        .session
                        .run(
                            &host,
                            &format!("sudo kill -CONT {} 2>/dev/null || echo 'Process not found'", process.pid),
                        )
                        .await?;
                    if out.stdout.contains("Process not found") {
                        continue;
                    }
                    continued += 1;
                    if terminate_after_continue {
                        self.session
                            .run(
                                &host,
                                &format!("sudo kill -TERM {} 2>/dev/null || echo 'Process not found'", process.pid),
                            )
                            .await?;
                    }
                }
                info!(host = %host, continued, "Resumed stopped processes");
                details["processes_continued"] = json!(continued);
                details["terminated_after_continue"] = json!(terminate_after_continue);
            }
            ProcessFault::ResourceExhaustion(fault) => {
                if self.stress_started {
                    for command in [
                        "pkill -f 'stress' || pkill -f 'stress-ng' || echo 'No stress processes found'"
                            .to_string(),
                        "pkill -f 'dd if=/dev/zero' || echo 'No dd processes found'".to_string(),
                        "pkill -f 'data = bytearray' || echo 'No Python memory stress processes found'"
                            .to_string(),
                        format!("rm -f {}", fault.io_path),
                    ] {
                        self.session.run(&host, &command).await?;
                    }
                    self.stress_started = false;
                    info!(host = %host, "Stopped resource exhaustion");
                }
                details["resource_type"] = json!(fault.resource);
            }
        }

        let actions = self.session.executed();
        self.session.reset().await;
        self.affected.clear();

        Ok(FaultInjectionResult::new(true, Mechanism::Process, self.fault.kind(), details)
            .with_actions(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CommandOutput;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Scripted {
        replies: Vec<(&'static str, CommandOutput)>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RemoteExecutor for Scripted {
        async fn execute(&self, _host: &str, command: &str) -> Result<CommandOutput> {
            self.log.lock().push(command.to_string());
            Ok(self
                .replies
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, out)| out.clone())
                .unwrap_or_default())
        }

        async fn close(&self) {}
    }

    const PS_ROWS: &str = "  101     1 streams /opt/streams/bin/streams-pec -i 1\n  202   101 streams streams-pec -i 2\n";

    fn resource(resource: ResourceType) -> ResourceFault {
        ResourceFault {
            host: "node-1".into(),
            resource,
            duration_seconds: 30,
            percentage: 50.0,
            io_path: "/tmp/stress_io_test".into(),
        }
    }

    #[test]
    fn test_parse_ps_output() {
        let rows = parse_ps_output(PS_ROWS);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pid, 101);
        assert_eq!(rows[1].ppid, 101);
        assert_eq!(rows[1].cmd, "streams-pec -i 2");
        assert!(parse_ps_output("garbage\n").is_empty());
    }

    #[test]
    fn test_strategy_order() {
        assert_eq!(StressStrategy::select("/usr/bin/stress-ng"), StressStrategy::StressNg);
        assert_eq!(StressStrategy::select("/usr/bin/stress"), StressStrategy::Stress);
        assert_eq!(StressStrategy::select("not_available"), StressStrategy::Manual);
    }

    #[test]
    fn test_strategy_commands() {
        let memory = resource(ResourceType::Memory);
        assert_eq!(
            StressStrategy::StressNg.command(&memory, 4, 8000),
            "stress-ng --vm 1 --vm-bytes 4000M --timeout 30s --background"
        );
        assert!(StressStrategy::Manual
            .command(&memory, 4, 2048)
            .contains("data = bytearray(1024 * 1024 * 1024)"));
        assert_eq!(
            StressStrategy::Stress.command(&resource(ResourceType::Cpu), 8, 0),
            "stress --cpu 8 --timeout 30s &"
        );
    }

    #[tokio::test]
    async fn test_hang_and_resume() {
        let executor = Arc::new(Scripted {
            replies: vec![
                ("ps -eo", CommandOutput::new(PS_ROWS, "", 0)),
                ("ps -o stat=", CommandOutput::new("T", "", 0)),
            ],
            ..Scripted::default()
        });
        let fault = ProcessFault::Hang {
            host: "node-1".into(),
            selector: ProcessSelector::Name("streams-pec".into()),
            terminate_after_continue: true,
        };
        let mut injector = ProcessInjector::new(fault, executor.clone());

        let result = injector.inject().await.unwrap();
        assert_eq!(result.details["processes_stopped"], 2);
        assert!(injector.verify().await.unwrap().success);

        let cleanup = injector.cleanup().await.unwrap();
        assert_eq!(cleanup.details["processes_continued"], 2);
        let log = executor.log.lock();
        assert!(log.contains(&"sudo kill -STOP 101".to_string()));
        assert!(log.iter().any(|c| c.starts_with("sudo kill -TERM 202")));
    }

    #[tokio::test]
    async fn test_kill_without_matches_fails() {
        let executor = Arc::new(Scripted {
            replies: vec![("ps -eo", CommandOutput::new("", "", 1))],
            ..Scripted::default()
        });
        let fault = ProcessFault::Kill {
            host: "node-1".into(),
            selector: ProcessSelector::Pattern("pec".into()),
        };
        let mut injector = ProcessInjector::new(fault, executor);

        let err = injector.inject().await.unwrap_err();
        assert!(err.to_string().contains("No matching processes found"));
        // Cleanup of a kill is always a no-op.
        assert!(injector.cleanup().await.unwrap().success);
    }

    #[tokio::test]
    async fn test_resource_exhaustion_uses_fallback() {
        let executor = Arc::new(Scripted {
            replies: vec![
                ("nproc", CommandOutput::new("2", "", 0)),
                ("which", CommandOutput::new("not_available", "", 0)),
                ("top -bn1", CommandOutput::new("93,5", "", 0)),
            ],
            ..Scripted::default()
        });
        let mut injector = ProcessInjector::new(
            ProcessFault::ResourceExhaustion(resource(ResourceType::Cpu)),
            executor.clone(),
        );

        let result = injector.inject().await.unwrap();
        assert_eq!(result.details["strategy"], "manual");
        let verify = injector.verify().await.unwrap();
        assert!(verify.success);
        assert_eq!(verify.details["usage_percent"], 93.5);

        injector.cleanup().await.unwrap();
        assert_eq!(
            executor.log.lock().last().unwrap(),
            "rm -f /tmp/stress_io_test"
        );
    }
}
