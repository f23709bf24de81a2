//! OpenSSH-backed remote executor.
//!
//! Commands run through the system `ssh` client. Each host gets a
//! multiplexed master connection (`ControlMaster`) whose socket lives in a
//! pool directory owned by the executor; [`SshExecutor::close`] shuts every
//! master down and removes the directory.

use super::{CommandOutput, RemoteExecutor};
use crate::chaos::SshConfig;
use crate::error::{FailoverError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// How long an idle master connection survives.
const CONTROL_PERSIST_SECS: u64 = 600;

/// Exit status reserved by `ssh` for its own failures.
const SSH_FAILURE_EXIT: i32 = 255;

/// Resolved connection parameters for one host alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
}

impl SshTarget {
    /// Resolve a host alias against the SSH configuration.
    ///
    /// Unknown aliases are used as the hostname with port 22. Per-host
    /// credentials take precedence over the defaults.
    pub fn resolve(config: &SshConfig, alias: &str) -> Result<Self> {
        let host = config.hosts.get(alias);

        let hostname = host
            .map(|h| h.hostname.clone())
            .unwrap_or_else(|| alias.to_string());
        let port = host.map(|h| h.port).unwrap_or(22);
        let username = host
            .and_then(|h| h.username.clone())
            .or_else(|| config.username.clone())
            .ok_or_else(|| FailoverError::RemoteCommand {
                host: alias.to_string(),
                message: format!("SSH username not specified for {}", alias),
            })?;
        let password = host
            .and_then(|h| h.password.clone())
            .or_else(|| config.password.clone());
        let private_key_path = host
            .and_then(|h| h.private_key_path.clone())
            .or_else(|| config.private_key_path.clone());

        if password.is_none() && private_key_path.is_none() {
            return Err(FailoverError::RemoteCommand {
                host: alias.to_string(),
                message: format!("No authentication method specified for {}", alias),
            });
        }

        Ok(Self {
            alias: alias.to_string(),
            hostname,
            port,
            username,
            password,
            private_key_path,
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }
}

/// Per-host master connections, keyed by alias.
#[derive(Debug)]
pub struct SshConnectionPool {
    control_dir: PathBuf,
    targets: Mutex<HashMap<String, SshTarget>>,
}

impl SshConnectionPool {
    pub fn new(control_dir: PathBuf) -> Self {
        Self {
            control_dir,
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Pool rooted in a fresh directory under the system temp dir.
    pub fn in_temp_dir() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(std::env::temp_dir().join(format!("failover-ssh-{}", &id[..8])))
    }

    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    /// Socket path template; `%C` is expanded by ssh to a connection hash.
    pub fn control_path(&self) -> PathBuf {
        self.control_dir.join("%C")
    }

    fn get(&self, alias: &str) -> Option<SshTarget> {
        self.targets.lock().get(alias).cloned()
    }

    fn insert(&self, target: SshTarget) {
        self.targets.lock().insert(target.alias.clone(), target);
    }

    fn drain(&self) -> Vec<SshTarget> {
        self.targets.lock().drain().map(|(_, t)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`RemoteExecutor`] that shells out to `ssh`.
pub struct SshExecutor {
    config: SshConfig,
    pool: SshConnectionPool,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            pool: SshConnectionPool::in_temp_dir(),
        }
    }

    pub fn with_pool(config: SshConfig, pool: SshConnectionPool) -> Self {
        Self { config, pool }
    }

    pub fn pool(&self) -> &SshConnectionPool {
        &self.pool
    }

    async fn target(&self, alias: &str) -> Result<SshTarget> {
        if let Some(target) = self.pool.get(alias) {
            return Ok(target);
        }

        let target = SshTarget::resolve(&self.config, alias)?;
        tokio::fs::create_dir_all(self.pool.control_dir()).await?;
        debug!(host = %alias, hostname = %target.hostname, port = target.port, "Opening SSH connection");
        self.pool.insert(target.clone());
        Ok(target)
    }

    fn command_for(&self, target: &SshTarget) -> Command {
        let args = ssh_args(
            target,
            &self.pool.control_path(),
            self.config.connect_timeout(),
        );

        match &target.password {
            Some(password) if target.private_key_path.is_none() => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").args(args).env("SSHPASS", password);
                cmd
            }
            _ => {
                let mut cmd = Command::new("ssh");
                cmd.args(args);
                cmd
            }
        }
    }
}

/// Arguments for `ssh`, excluding the remote command.
pub(crate) fn ssh_args(target: &SshTarget, control_path: &Path, timeout: Duration) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        target.port.to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", timeout.as_secs().max(1)),
        "-o".to_string(),
        "ControlMaster=auto".to_string(),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
        "-o".to_string(),
        format!("ControlPersist={}", CONTROL_PERSIST_SECS),
    ];

    if let Some(key) = &target.private_key_path {
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }

    args.push(target.destination());
    args
}

#[async_trait::async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let target = self.target(host).await?;

        let output = self
            .command_for(&target)
            .arg("--")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FailoverError::RemoteCommand {
                host: host.to_string(),
                message: format!("failed to spawn ssh: {}", e),
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if exit_code == SSH_FAILURE_EXIT && stdout.is_empty() {
            return Err(FailoverError::RemoteCommand {
                host: host.to_string(),
                message: format!("SSH connection to {} failed: {}", host, stderr),
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn close(&self) {
        for target in self.pool.drain() {
            let mut cmd = self.command_for(&target);
            cmd.arg("-O").arg("exit");
            match cmd.output().await {
                Ok(_) => debug!(host = %target.alias, "Closed SSH connection"),
                Err(e) => warn!(host = %target.alias, error = %e, "Failed to close SSH connection"),
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(self.pool.control_dir()).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.pool.control_dir().display(), error = %e, "Failed to remove SSH control directory");
            }
        }
    }
}
