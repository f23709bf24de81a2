//! Remote command execution used by fault injectors.

mod ssh;

pub use ssh::{SshConnectionPool, SshExecutor, SshTarget};

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands on named hosts.
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `command` on `host` and capture its output.
    ///
    /// A non-zero exit code is returned in [`CommandOutput`], not as an error.
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput>;

    /// Release any connections held for reuse.
    async fn close(&self);
}

/// A command that was run through a [`RemoteSession`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedCommand {
    pub host: String,
    pub command: String,
    pub exit_code: i32,
}

/// Executor wrapper that journals every command it runs.
///
/// Injectors derive cleanup actions from the journal rather than from
/// scenario parameters.
pub struct RemoteSession {
    executor: Arc<dyn RemoteExecutor>,
    journal: Mutex<Vec<ExecutedCommand>>,
}

impl RemoteSession {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Run a command and record it.
    pub async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        debug!(host = %host, command = %command, "Executing remote command");

        let output = self.executor.execute(host, command).await?;

        if output.success() {
            debug!(host = %host, stdout = %output.stdout, "Remote command succeeded");
        } else {
            warn!(
                host = %host,
                command = %command,
                exit_code = output.exit_code,
                stderr = %output.stderr,
                "Remote command exited with non-zero status"
            );
        }

        self.journal.lock().push(ExecutedCommand {
            host: host.to_string(),
            command: command.to_string(),
            exit_code: output.exit_code,
        });

        Ok(output)
    }

    /// Snapshot of the commands run so far.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.journal.lock().clone()
    }

    /// Forget recorded commands and release pooled connections.
    pub async fn reset(&self) {
        self.journal.lock().clear();
        self.executor.close().await;
    }
}
