//! Authoritative in-memory record of known VMs.
//!
//! The registry owns every VM record. Each record sits behind its own async
//! mutex, which is the VM's serialization unit: operations targeting the
//! same VM run strictly in submission order, operations on different VMs
//! run concurrently. The registry map itself is only locked for bookkeeping,
//! never across an await.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{LariatError, LariatResult};
use crate::snapshot_tree::SnapshotTree;
use crate::types::{OperationId, VmId, VmLifecycleState, VmSpec};

/// Bookkeeping for the single operation a VM may have in flight.
#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    pub operation: OperationId,
    /// State to restore if the operation is cancelled before dispatch.
    pub prior: VmLifecycleState,
}

#[derive(Debug)]
pub struct VmRecord {
    pub id: VmId,
    pub name: String,
    pub state: VmLifecycleState,
    pub spec: VmSpec,
    pub tree: SnapshotTree,
    pub in_flight: Option<InFlight>,
    /// Set when an internal invariant was found violated. All operations
    /// except reconciliation fail until cleared.
    pub tainted: bool,
}

pub struct VmHandle {
    pub id: VmId,
    pub record: Mutex<VmRecord>,
}

#[derive(Default)]
struct RegistryInner {
    vms: HashMap<VmId, Arc<VmHandle>>,
    names: HashSet<String>,
}

#[derive(Default)]
pub struct VmRegistry {
    inner: RwLock<RegistryInner>,
}

impl VmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a display name before the definition is complete, so two
    /// concurrent defines cannot both win it.
    pub fn reserve_name(&self, name: &str) -> LariatResult<()> {
        let mut inner = self.inner.write();
        if !inner.names.insert(name.to_string()) {
            return Err(LariatError::AlreadyExists {
                resource: format!("VM '{}'", name),
            });
        }
        Ok(())
    }

    pub fn release_name(&self, name: &str) {
        self.inner.write().names.remove(name);
    }

    /// Insert a record whose name was previously reserved.
    pub fn insert(&self, record: VmRecord) -> Arc<VmHandle> {
        let handle = Arc::new(VmHandle {
            id: record.id,
            record: Mutex::new(record),
        });
        self.inner.write().vms.insert(handle.id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, vm: VmId) -> LariatResult<Arc<VmHandle>> {
        self.inner
            .read()
            .vms
            .get(&vm)
            .cloned()
            .ok_or_else(|| LariatError::NotFound {
                resource: format!("VM {}", vm),
            })
    }

    pub fn remove(&self, vm: VmId, name: &str) {
        let mut inner = self.inner.write();
        inner.vms.remove(&vm);
        inner.names.remove(name);
    }

    pub fn handles(&self) -> Vec<Arc<VmHandle>> {
        self.inner.read().vms.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> VmRecord {
        VmRecord {
            id: VmId::new(),
            name: name.to_string(),
            state: VmLifecycleState::Stopped,
            spec: VmSpec::default(),
            tree: SnapshotTree::new("disk-0".to_string()),
            in_flight: None,
            tainted: false,
        }
    }

    #[test]
    fn name_reservation_prevents_duplicates() {
        let registry = VmRegistry::new();
        registry.reserve_name("web").unwrap();
        assert!(matches!(
            registry.reserve_name("web"),
            Err(LariatError::AlreadyExists { .. })
        ));
        registry.release_name("web");
        registry.reserve_name("web").unwrap();
    }

    #[test]
    fn remove_frees_id_and_name() {
        let registry = VmRegistry::new();
        registry.reserve_name("db").unwrap();
        let rec = record("db");
        let id = rec.id;
        registry.insert(rec);
        assert_eq!(registry.len(), 1);

        registry.remove(id, "db");
        assert!(registry.is_empty());
        assert!(registry.get(id).is_err());
        registry.reserve_name("db").unwrap();
    }

    #[tokio::test]
    async fn handle_serializes_access_to_the_record() {
        let registry = VmRegistry::new();
        registry.reserve_name("a").unwrap();
        let handle = registry.insert(record("a"));

        let guard = handle.record.lock().await;
        assert_eq!(guard.state, VmLifecycleState::Stopped);
        assert!(handle.record.try_lock().is_err());
    }
}
