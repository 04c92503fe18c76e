//! Abstract interface to the external hypervisor management API.
//!
//! The engine consumes this API, it never implements virtualization. All
//! operations are async and must be `Send + Sync`; implementations talk to
//! whatever management surface the hypervisor exposes (CLI, REST, libvirt).
//! Transient faults are reported as [`LariatError::TransientFailure`] so the
//! dispatcher can apply retry policy; definitive rejections as
//! [`LariatError::HypervisorRejected`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::info;

use crate::error::{LariatError, LariatResult};
use crate::types::{VmId, VmSpec};

/// VM state as reported by the hypervisor itself. This is the ground truth
/// the engine reconciles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HypervisorVmState {
    /// The hypervisor does not know the VM.
    Unknown,
    Stopped,
    Running,
    Paused,
}

#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Register a VM with the hypervisor. Returns the opaque disk-state
    /// reference backing the VM's root snapshot.
    async fn create(&self, vm: VmId, name: &str, spec: &VmSpec) -> LariatResult<String>;

    /// Unregister a VM and discard its disk state.
    async fn destroy(&self, vm: VmId) -> LariatResult<()>;

    async fn start(&self, vm: VmId) -> LariatResult<()>;
    async fn stop(&self, vm: VmId) -> LariatResult<()>;
    async fn pause(&self, vm: VmId) -> LariatResult<()>;
    async fn resume(&self, vm: VmId) -> LariatResult<()>;

    /// Read-only query of the hypervisor's view of the VM.
    async fn query_state(&self, vm: VmId) -> LariatResult<HypervisorVmState>;

    /// Capture the VM's disk state; returns the new opaque reference.
    async fn snapshot_create(&self, vm: VmId) -> LariatResult<String>;
    async fn snapshot_revert(&self, vm: VmId, disk_ref: &str) -> LariatResult<()>;
    async fn snapshot_delete(&self, vm: VmId, disk_ref: &str) -> LariatResult<()>;

    async fn set_resources(&self, vm: VmId, spec: &VmSpec) -> LariatResult<()>;

    async fn attach_network(&self, vm: VmId, port: u32, switch: &str) -> LariatResult<()>;
    async fn detach_network(&self, vm: VmId, port: u32) -> LariatResult<()>;
}

#[derive(Debug, Default)]
struct MockInner {
    vms: HashMap<VmId, HypervisorVmState>,
    disk_refs: HashMap<VmId, HashSet<String>>,
    next_ref: u64,
    /// Fail the next N calls with a transient error.
    transient_faults: u32,
    /// Operations (by name) that return a definitive rejection.
    rejected_ops: HashSet<String>,
    /// When set, a mutating call applies its effect before reporting an
    /// injected transient fault, simulating an ack lost in transit.
    apply_before_fault: bool,
}

/// In-memory hypervisor for tests: tracks VM states and disk references,
/// with injectable transient faults, rejections, and latency.
pub struct MockHypervisor {
    inner: Mutex<MockInner>,
    latency: Duration,
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner::default()),
            latency: Duration::ZERO,
        }
    }

    /// Every call sleeps for `latency` before touching state, so tests can
    /// observe in-flight operations.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Mutex::new(MockInner::default()),
            latency,
        }
    }

    pub fn inject_transient_failures(&self, count: u32) {
        self.inner.lock().transient_faults = count;
    }

    pub fn set_apply_before_fault(&self, apply: bool) {
        self.inner.lock().apply_before_fault = apply;
    }

    pub fn reject_operation(&self, op: &str) {
        self.inner.lock().rejected_ops.insert(op.to_string());
    }

    pub fn clear_rejections(&self) {
        self.inner.lock().rejected_ops.clear();
    }

    /// Force the hypervisor-side state, bypassing the normal command path.
    /// Used to simulate out-of-band drift for reconciliation tests.
    pub fn set_state(&self, vm: VmId, state: HypervisorVmState) {
        self.inner.lock().vms.insert(vm, state);
    }

    pub fn state_of(&self, vm: VmId) -> HypervisorVmState {
        self.inner
            .lock()
            .vms
            .get(&vm)
            .copied()
            .unwrap_or(HypervisorVmState::Unknown)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Consume any injected fault for `op`. When `effect` is provided and
    /// `apply_before_fault` is set, the effect lands even though the call
    /// reports a transient failure.
    fn take_fault(&self, vm: VmId, op: &str, effect: Option<HypervisorVmState>) -> LariatResult<()> {
        let mut inner = self.inner.lock();
        if inner.rejected_ops.contains(op) {
            return Err(LariatError::HypervisorRejected {
                operation: op.to_string(),
                reason: "rejected by hypervisor".to_string(),
            });
        }
        if inner.transient_faults > 0 {
            inner.transient_faults -= 1;
            if inner.apply_before_fault {
                if let Some(state) = effect {
                    inner.vms.insert(vm, state);
                }
            }
            return Err(LariatError::TransientFailure {
                details: format!("injected fault during {}", op),
            });
        }
        Ok(())
    }

    fn require_vm(inner: &MockInner, vm: VmId) -> LariatResult<HypervisorVmState> {
        inner
            .vms
            .get(&vm)
            .copied()
            .ok_or_else(|| LariatError::HypervisorRejected {
                operation: "query-state".to_string(),
                reason: format!("VM {} is not registered", vm),
            })
    }

    fn transition(&self, vm: VmId, op: &str, target: HypervisorVmState) -> LariatResult<()> {
        self.take_fault(vm, op, Some(target))?;
        let mut inner = self.inner.lock();
        Self::require_vm(&inner, vm).map_err(|_| LariatError::HypervisorRejected {
            operation: op.to_string(),
            reason: format!("VM {} is not registered", vm),
        })?;
        inner.vms.insert(vm, target);
        info!(%vm, op, ?target, "mock hypervisor applied command");
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn create(&self, vm: VmId, name: &str, _spec: &VmSpec) -> LariatResult<String> {
        self.delay().await;
        self.take_fault(vm, "create", None)?;
        let mut inner = self.inner.lock();
        if inner.vms.contains_key(&vm) {
            return Err(LariatError::HypervisorRejected {
                operation: "create".to_string(),
                reason: format!("VM {} already registered", vm),
            });
        }
        inner.vms.insert(vm, HypervisorVmState::Stopped);
        let disk_ref = format!("disk-{}", inner.next_ref);
        inner.next_ref += 1;
        inner
            .disk_refs
            .entry(vm)
            .or_default()
            .insert(disk_ref.clone());
        info!(%vm, name, disk_ref = %disk_ref, "mock hypervisor registered VM");
        Ok(disk_ref)
    }

    async fn destroy(&self, vm: VmId) -> LariatResult<()> {
        self.delay().await;
        self.take_fault(vm, "destroy", Some(HypervisorVmState::Unknown))?;
        let mut inner = self.inner.lock();
        inner.vms.remove(&vm);
        inner.disk_refs.remove(&vm);
        Ok(())
    }

    async fn start(&self, vm: VmId) -> LariatResult<()> {
        self.delay().await;
        self.transition(vm, "start", HypervisorVmState::Running)
    }

    async fn stop(&self, vm: VmId) -> LariatResult<()> {
        self.delay().await;
        self.transition(vm, "stop", HypervisorVmState::Stopped)
    }

    async fn pause(&self, vm: VmId) -> LariatResult<()> {
        self.delay().await;
        self.transition(vm, "pause", HypervisorVmState::Paused)
    }

    async fn resume(&self, vm: VmId) -> LariatResult<()> {
        self.delay().await;
        self.transition(vm, "resume", HypervisorVmState::Running)
    }

    async fn query_state(&self, vm: VmId) -> LariatResult<HypervisorVmState> {
        self.delay().await;
        self.take_fault(vm, "query-state", None)?;
        let inner = self.inner.lock();
        Ok(inner
            .vms
            .get(&vm)
            .copied()
            .unwrap_or(HypervisorVmState::Unknown))
    }

    async fn snapshot_create(&self, vm: VmId) -> LariatResult<String> {
        self.delay().await;
        self.take_fault(vm, "snapshot-create", None)?;
        let mut inner = self.inner.lock();
        Self::require_vm(&inner, vm)?;
        let disk_ref = format!("disk-{}", inner.next_ref);
        inner.next_ref += 1;
        inner
            .disk_refs
            .entry(vm)
            .or_default()
            .insert(disk_ref.clone());
        Ok(disk_ref)
    }

    async fn snapshot_revert(&self, vm: VmId, disk_ref: &str) -> LariatResult<()> {
        self.delay().await;
        self.take_fault(vm, "snapshot-revert", None)?;
        let inner = self.inner.lock();
        Self::require_vm(&inner, vm)?;
        let known = inner
            .disk_refs
            .get(&vm)
            .map(|refs| refs.contains(disk_ref))
            .unwrap_or(false);
        if !known {
            return Err(LariatError::HypervisorRejected {
                operation: "snapshot-revert".to_string(),
                reason: format!("unknown disk reference '{}'", disk_ref),
            });
        }
        Ok(())
    }

    async fn snapshot_delete(&self, vm: VmId, disk_ref: &str) -> LariatResult<()> {
        self.delay().await;
        self.take_fault(vm, "snapshot-delete", None)?;
        let mut inner = self.inner.lock();
        Self::require_vm(&inner, vm)?;
        if let Some(refs) = inner.disk_refs.get_mut(&vm) {
            refs.remove(disk_ref);
        }
        Ok(())
    }

    async fn set_resources(&self, vm: VmId, _spec: &VmSpec) -> LariatResult<()> {
        self.delay().await;
        self.take_fault(vm, "set-resources", None)?;
        let inner = self.inner.lock();
        Self::require_vm(&inner, vm)?;
        Ok(())
    }

    async fn attach_network(&self, vm: VmId, _port: u32, _switch: &str) -> LariatResult<()> {
        self.delay().await;
        self.take_fault(vm, "attach-network", None)?;
        let inner = self.inner.lock();
        Self::require_vm(&inner, vm)?;
        Ok(())
    }

    async fn detach_network(&self, vm: VmId, _port: u32) -> LariatResult<()> {
        self.delay().await;
        self.take_fault(vm, "detach-network", None)?;
        let inner = self.inner.lock();
        Self::require_vm(&inner, vm)?;
        Ok(())
    }
}
