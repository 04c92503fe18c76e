//! Resource admission control.
//!
//! A single pool tracks total capacity and per-VM allocations. Every
//! admission decision happens inside one critical section so concurrent
//! requests can never both observe stale remaining capacity, and a request
//! either reserves all of its dimensions or none of them.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use crate::config::ResourceCapacity;
use crate::error::{LariatError, LariatResult};
use crate::types::{VmId, VmSpec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolUsage {
    pub cpu: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

#[derive(Debug)]
pub struct ResourcePool {
    capacity: ResourceCapacity,
    allocations: Mutex<HashMap<VmId, VmSpec>>,
}

impl ResourcePool {
    pub fn new(capacity: ResourceCapacity) -> Self {
        Self {
            capacity,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> ResourceCapacity {
        self.capacity
    }

    fn used_locked(allocations: &HashMap<VmId, VmSpec>) -> PoolUsage {
        let mut used = PoolUsage::default();
        for spec in allocations.values() {
            used.cpu += spec.vcpus;
            used.memory_mb += spec.memory_mb;
            used.disk_gb += spec.disk_gb;
        }
        used
    }

    // Compared in headroom form (capacity - used) rather than used + requested,
    // which would overflow near the numeric limits.
    fn admit_locked(
        &self,
        used: PoolUsage,
        spec: &VmSpec,
    ) -> LariatResult<()> {
        let available = self.capacity.cpu.saturating_sub(used.cpu);
        if spec.vcpus > available {
            return Err(LariatError::ResourceExhausted {
                resource: "cpu".to_string(),
                requested: spec.vcpus as u64,
                available: available as u64,
            });
        }
        let available = self.capacity.memory_mb.saturating_sub(used.memory_mb);
        if spec.memory_mb > available {
            return Err(LariatError::ResourceExhausted {
                resource: "memory_mb".to_string(),
                requested: spec.memory_mb,
                available,
            });
        }
        let available = self.capacity.disk_gb.saturating_sub(used.disk_gb);
        if spec.disk_gb > available {
            return Err(LariatError::ResourceExhausted {
                resource: "disk_gb".to_string(),
                requested: spec.disk_gb,
                available,
            });
        }
        Ok(())
    }

    /// Reserve capacity for a VM. All-or-nothing: a rejection leaves no
    /// partial reservation behind.
    pub fn allocate(&self, vm: VmId, spec: &VmSpec) -> LariatResult<()> {
        let mut allocations = self.allocations.lock();
        if allocations.contains_key(&vm) {
            return Err(LariatError::StateConflict {
                message: format!("VM {} already holds an allocation", vm),
            });
        }
        let used = Self::used_locked(&allocations);
        self.admit_locked(used, spec)?;
        allocations.insert(vm, *spec);
        debug!(%vm, vcpus = spec.vcpus, memory_mb = spec.memory_mb, "resource allocation admitted");
        Ok(())
    }

    /// Release a VM's allocation. Releasing an unallocated VM is a no-op.
    pub fn release(&self, vm: VmId) {
        let mut allocations = self.allocations.lock();
        if allocations.remove(&vm).is_some() {
            debug!(%vm, "resource allocation released");
        }
    }

    /// Replace a VM's allocation with a new spec, evaluated as
    /// release-then-allocate inside one critical section: a shrink cannot
    /// transiently fail, and a rejected growth leaves the prior allocation
    /// untouched.
    pub fn resize(&self, vm: VmId, new_spec: &VmSpec) -> LariatResult<()> {
        let mut allocations = self.allocations.lock();
        let prior = allocations.remove(&vm);
        let used = Self::used_locked(&allocations);
        match self.admit_locked(used, new_spec) {
            Ok(()) => {
                allocations.insert(vm, *new_spec);
                debug!(%vm, vcpus = new_spec.vcpus, "resource allocation resized");
                Ok(())
            }
            Err(e) => {
                if let Some(prior) = prior {
                    allocations.insert(vm, prior);
                }
                Err(e)
            }
        }
    }

    pub fn allocation_of(&self, vm: VmId) -> Option<VmSpec> {
        self.allocations.lock().get(&vm).copied()
    }

    pub fn usage(&self) -> PoolUsage {
        Self::used_locked(&self.allocations.lock())
    }

    /// Invariant check: total allocations within capacity on every
    /// dimension. A violation indicates a bug and is fatal for the caller.
    pub fn verify(&self) -> LariatResult<()> {
        let used = self.usage();
        if used.cpu > self.capacity.cpu
            || used.memory_mb > self.capacity.memory_mb
            || used.disk_gb > self.capacity.disk_gb
        {
            return Err(LariatError::Corruption {
                message: format!(
                    "pool oversubscribed: used {:?} exceeds capacity {:?}",
                    used, self.capacity
                ),
            });
        }
        Ok(())
    }
}
