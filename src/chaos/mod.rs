//! Fault injection for failover tests.
//!
//! A [`FaultScenario`] is lowered into one [`LeafFault`] per mechanism and
//! each leaf gets its own injector:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  FaultCoordinator                    │
//! ├──────────────────────────────────────────────────────┤
//! │ NetworkInjector   │ ProcessInjector │ ApiInjector    │
//! │ (iptables / tc)   │ (signals/stress)│ (control plane)│
//! ├──────────────────────────────────────────────────────┤
//! │ RemoteExecutor (ssh)              │ ControlPlane     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every injector implements [`FaultInjector`]; `cleanup` is idempotent and
//! safe to call when `inject` failed or never ran.

mod api;
mod config;
mod coordinator;
mod injector;
mod network;
mod process;
mod types;

pub use config::{FaultInjectionConfig, NetworkConfig, SshConfig, SshHostConfig};

pub use types::{
    ApiFault, ApiOperation, ApiOperationKind, ApiSpec, BandwidthSpec, CombinedSpec, FaultScenario,
    LatencySpec, LeafFault, Mechanism, NetworkFault, PacketLossSpec, PartitionSpec, ProcessFault,
    ProcessSelector, ProcessSpec, ResourceFault, ResourceSpec, ResourceType,
};

pub use injector::{FaultInjectionResult, FaultInjector, RemoteAction};

pub use api::{ApiInjector, PauseStrategy};
pub use network::NetworkInjector;
pub use process::{parse_ps_output, ProcessInfo, ProcessInjector, StressStrategy};

pub use coordinator::{CleanupOutcome, CoordinatorEvent, FaultCoordinator};
