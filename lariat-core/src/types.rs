use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{LariatError, LariatResult};

/// Unique identifier for a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VmId(pub Uuid);

impl VmId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VmId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a snapshot node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource specification for a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl Default for VmSpec {
    fn default() -> Self {
        Self {
            vcpus: 1,
            memory_mb: 1024,
            disk_gb: 10,
        }
    }
}

impl VmSpec {
    /// Validate the resource specification
    pub fn validate(&self) -> LariatResult<()> {
        if self.vcpus == 0 {
            return Err(LariatError::Validation {
                field: "vcpus".to_string(),
                message: "VM must have at least 1 vCPU".to_string(),
            });
        }
        if self.memory_mb == 0 {
            return Err(LariatError::Validation {
                field: "memory_mb".to_string(),
                message: "VM must have at least 1 MB of memory".to_string(),
            });
        }
        if self.disk_gb == 0 {
            return Err(LariatError::Validation {
                field: "disk_gb".to_string(),
                message: "VM must have at least 1 GB of disk".to_string(),
            });
        }
        Ok(())
    }
}

/// Lifecycle states a VM moves through. `Deleted` is terminal; transitional
/// states (`Starting`, `Stopping`, ...) are held only while an operation is
/// in flight against the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmLifecycleState {
    Defined,
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Resuming,
    Stopping,
    SnapshotInProgress,
    Error,
    Deleted,
}

impl VmLifecycleState {
    /// States in which no operation is in flight and the VM is healthy.
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            VmLifecycleState::Stopped | VmLifecycleState::Running | VmLifecycleState::Paused
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VmLifecycleState::Deleted)
    }
}

/// The closed set of operations the engine accepts, each carrying its own
/// parameter payload. Matched exhaustively by the state machine controller
/// and the command dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Start,
    Stop,
    Pause,
    Resume,
    CreateSnapshot {
        label: Option<String>,
    },
    RevertSnapshot {
        snapshot: SnapshotId,
    },
    DeleteSnapshot {
        snapshot: SnapshotId,
        cascade: bool,
    },
    SetResources {
        spec: VmSpec,
    },
    AttachNetwork {
        port: u32,
        switch: String,
    },
    DetachNetwork {
        port: u32,
    },
    /// Re-query hypervisor truth and resynchronize local state. The only
    /// path out of `Error`.
    Reconcile,
}

impl OperationKind {
    /// Short name used in logs and error messages, aligned with the
    /// hypervisor management command vocabulary.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
            OperationKind::Pause => "pause",
            OperationKind::Resume => "resume",
            OperationKind::CreateSnapshot { .. } => "snapshot-create",
            OperationKind::RevertSnapshot { .. } => "snapshot-revert",
            OperationKind::DeleteSnapshot { .. } => "snapshot-delete",
            OperationKind::SetResources { .. } => "set-resources",
            OperationKind::AttachNetwork { .. } => "attach-network",
            OperationKind::DetachNetwork { .. } => "detach-network",
            OperationKind::Reconcile => "reconcile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
    Compensating,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }
}

/// Record of a submitted operation, retained until pruned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub vm: VmId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) cancel_requested: bool,
}

impl OperationRecord {
    pub(crate) fn new(id: OperationId, vm: VmId, kind: OperationKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            vm,
            kind,
            status: OperationStatus::Pending,
            retry_count: 0,
            last_error: None,
            submitted_at: now,
            updated_at: now,
            cancel_requested: false,
        }
    }
}

/// Point-in-time view of a VM, as returned by `list_vms` / `get_vm`.
#[derive(Debug, Clone, Serialize)]
pub struct VmInfo {
    pub id: VmId,
    pub name: String,
    pub state: VmLifecycleState,
    pub spec: VmSpec,
    pub attachments: BTreeMap<u32, String>,
    pub current_snapshot: SnapshotId,
}

/// Published on every observable lifecycle change, including operation
/// failures (which carry the error text).
#[derive(Debug, Clone, Serialize)]
pub struct StateChangeEvent {
    pub vm: VmId,
    pub operation: Option<OperationId>,
    pub from: VmLifecycleState,
    pub to: VmLifecycleState,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}
