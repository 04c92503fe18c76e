//! Virtual network topology: named switches and per-VM port attachments.
//!
//! The topology is shared mutable state guarded by one mutex. A switch with
//! live attachments is pinned by its reference count and cannot be deleted;
//! re-attaching a port replaces the prior binding and adjusts the counts.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{LariatError, LariatResult};
use crate::types::VmId;

#[derive(Debug, Default)]
struct TopologyInner {
    /// Switch name -> number of attachments referencing it.
    switches: HashMap<String, u32>,
    /// (vm, port index) -> switch name.
    attachments: HashMap<(VmId, u32), String>,
}

#[derive(Debug, Default)]
pub struct NetworkTopology {
    inner: Mutex<TopologyInner>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_switch(&self, name: &str) -> LariatResult<()> {
        let mut inner = self.inner.lock();
        if inner.switches.contains_key(name) {
            return Err(LariatError::AlreadyExists {
                resource: format!("switch '{}'", name),
            });
        }
        inner.switches.insert(name.to_string(), 0);
        debug!(switch = name, "virtual switch created");
        Ok(())
    }

    pub fn delete_switch(&self, name: &str) -> LariatResult<()> {
        let mut inner = self.inner.lock();
        let refs = *inner
            .switches
            .get(name)
            .ok_or_else(|| LariatError::NotFound {
                resource: format!("switch '{}'", name),
            })?;
        if refs > 0 {
            return Err(LariatError::StateConflict {
                message: format!("switch '{}' has {} active attachments", name, refs),
            });
        }
        inner.switches.remove(name);
        debug!(switch = name, "virtual switch deleted");
        Ok(())
    }

    pub fn switch_exists(&self, name: &str) -> bool {
        self.inner.lock().switches.contains_key(name)
    }

    pub fn list_switches(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner.switches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Attach a VM port to a switch. Overwriting an existing attachment at
    /// the same port is permitted and releases the prior binding.
    pub fn attach(&self, vm: VmId, port: u32, switch: &str) -> LariatResult<()> {
        let mut inner = self.inner.lock();
        if !inner.switches.contains_key(switch) {
            return Err(LariatError::NotFound {
                resource: format!("switch '{}'", switch),
            });
        }
        if let Some(prior) = inner.attachments.insert((vm, port), switch.to_string()) {
            if let Some(refs) = inner.switches.get_mut(&prior) {
                *refs = refs.saturating_sub(1);
            }
        }
        if let Some(refs) = inner.switches.get_mut(switch) {
            *refs += 1;
        }
        debug!(%vm, port, switch, "port attached");
        Ok(())
    }

    pub fn detach(&self, vm: VmId, port: u32) -> LariatResult<()> {
        let mut inner = self.inner.lock();
        let switch = inner
            .attachments
            .remove(&(vm, port))
            .ok_or_else(|| LariatError::NotFound {
                resource: format!("attachment at VM {} port {}", vm, port),
            })?;
        if let Some(refs) = inner.switches.get_mut(&switch) {
            *refs = refs.saturating_sub(1);
        }
        debug!(%vm, port, switch = %switch, "port detached");
        Ok(())
    }

    pub fn is_attached(&self, vm: VmId, port: u32) -> bool {
        self.inner.lock().attachments.contains_key(&(vm, port))
    }

    /// Remove every attachment a VM holds, used on VM teardown.
    pub fn detach_all(&self, vm: VmId) {
        let mut inner = self.inner.lock();
        let ports: Vec<(VmId, u32)> = inner
            .attachments
            .keys()
            .filter(|(owner, _)| *owner == vm)
            .copied()
            .collect();
        for key in ports {
            if let Some(switch) = inner.attachments.remove(&key) {
                if let Some(refs) = inner.switches.get_mut(&switch) {
                    *refs = refs.saturating_sub(1);
                }
            }
        }
    }

    pub fn attachments_of(&self, vm: VmId) -> BTreeMap<u32, String> {
        let inner = self.inner.lock();
        inner
            .attachments
            .iter()
            .filter(|((owner, _), _)| *owner == vm)
            .map(|((_, port), switch)| (*port, switch.clone()))
            .collect()
    }
}
