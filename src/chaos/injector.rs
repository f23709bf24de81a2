//! Injector capability shared by every fault mechanism.

use super::types::Mechanism;
use crate::error::Result;
use crate::remote::ExecutedCommand;
use crate::types::Site;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A concrete action an injector performed against remote infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteAction {
    Command(ExecutedCommand),
    Api {
        site: Site,
        method: String,
        path: String,
    },
}

impl From<ExecutedCommand> for RemoteAction {
    fn from(command: ExecutedCommand) -> Self {
        RemoteAction::Command(command)
    }
}

/// Outcome of one inject, verify or cleanup call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultInjectionResult {
    pub success: bool,
    pub mechanism: Mechanism,
    /// Scenario kind, e.g. `network_latency`.
    pub kind: String,
    /// Mechanism-specific payload.
    pub details: Value,
    /// Remote actions performed by this call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RemoteAction>,
}

impl FaultInjectionResult {
    pub fn new(success: bool, mechanism: Mechanism, kind: &str, details: Value) -> Self {
        Self {
            success,
            mechanism,
            kind: kind.to_string(),
            details,
            actions: Vec::new(),
        }
    }

    pub fn with_actions<I, A>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<RemoteAction>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }
}

/// One fault-injection mechanism.
///
/// `verify` and `cleanup` must not assume `inject` succeeded. `cleanup` is
/// idempotent: a second call, or a call without a prior `inject`, is a
/// successful no-op.
#[async_trait::async_trait]
pub trait FaultInjector: Send + Sync {
    fn mechanism(&self) -> Mechanism;

    /// Scenario kind handled by this injector.
    fn kind(&self) -> &'static str;

    async fn inject(&mut self) -> Result<FaultInjectionResult>;

    async fn verify(&mut self) -> Result<FaultInjectionResult>;

    async fn cleanup(&mut self) -> Result<FaultInjectionResult>;
}
