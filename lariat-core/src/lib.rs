//! Lariat: a control-plane engine for VM lifecycle orchestration.
//!
//! The engine validates lifecycle transitions, maintains per-VM snapshot
//! trees, admits resource requests against a finite pool, and dispatches
//! the resulting commands to an external hypervisor with retry, circuit
//! breaking, and compensation semantics. The hypervisor itself is an
//! external collaborator consumed through the [`hypervisor::Hypervisor`]
//! trait; Lariat never implements virtualization.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod hypervisor;
pub mod network;
pub mod orchestrator;
pub mod registry;
pub mod resource_pool;
pub mod snapshot_tree;
pub mod state_machine;
pub mod types;

pub use config::OrchestratorConfig;
pub use error::{LariatError, LariatResult};
pub use events::EventFilter;
pub use hypervisor::{Hypervisor, HypervisorVmState, MockHypervisor};
pub use orchestrator::Orchestrator;
pub use types::{
    OperationId, OperationKind, OperationRecord, OperationStatus, SnapshotId, StateChangeEvent,
    VmId, VmInfo, VmLifecycleState, VmSpec,
};
