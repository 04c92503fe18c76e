//! The operation API and the coordination around it.
//!
//! `submit_operation` validates an intent against the current lifecycle
//! state, the admission controller, and the snapshot tree, then spawns a
//! task that drives the hypervisor call and commits the local model on
//! completion. Preflight failures are synchronous and side-effect free;
//! boundary failures are recorded on the operation and emitted as events.

use chrono::Utc;
use dashmap::DashMap;
use futures::Stream;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{LariatError, LariatResult};
use crate::events::{EventFilter, EventNotifier};
use crate::hypervisor::{Hypervisor, HypervisorVmState};
use crate::network::NetworkTopology;
use crate::registry::{InFlight, VmRecord, VmRegistry};
use crate::resource_pool::{PoolUsage, ResourcePool};
use crate::snapshot_tree::{SnapshotTree, SnapshotTreeView};
use crate::state_machine::{self, SuccessState};
use crate::types::{
    OperationId, OperationKind, OperationRecord, OperationStatus, StateChangeEvent, VmId, VmInfo,
    VmLifecycleState, VmSpec,
};

/// Data captured during synchronous validation for use at dispatch and
/// commit time.
#[derive(Debug)]
enum Preflight {
    None,
    /// Disk reference of the snapshot a revert/delete targets.
    Snapshot { disk_ref: String },
    /// The allocation held before a SetResources reservation, for rollback.
    Resize { prior_spec: VmSpec },
}

/// What a successful hypervisor call handed back.
enum DispatchPayload {
    None,
    DiskRef(String),
    Observed(HypervisorVmState),
}

/// Best-effort inverse issued when a dispatched operation is cancelled.
struct Compensation {
    name: &'static str,
    in_flight: VmLifecycleState,
    final_state: VmLifecycleState,
    action: CompensationAction,
}

enum CompensationAction {
    Stop,
    Pause,
    Resume,
}

fn compensation_for(kind: &OperationKind) -> Option<Compensation> {
    match kind {
        OperationKind::Start => Some(Compensation {
            name: "stop",
            in_flight: VmLifecycleState::Stopping,
            final_state: VmLifecycleState::Stopped,
            action: CompensationAction::Stop,
        }),
        OperationKind::Resume => Some(Compensation {
            name: "pause",
            in_flight: VmLifecycleState::Pausing,
            final_state: VmLifecycleState::Paused,
            action: CompensationAction::Pause,
        }),
        OperationKind::Pause => Some(Compensation {
            name: "resume",
            in_flight: VmLifecycleState::Resuming,
            final_state: VmLifecycleState::Running,
            action: CompensationAction::Resume,
        }),
        _ => None,
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: VmRegistry,
    pool: ResourcePool,
    network: NetworkTopology,
    dispatcher: CommandDispatcher,
    notifier: EventNotifier,
    operations: DashMap<OperationId, OperationRecord>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, hypervisor: Arc<dyn Hypervisor>) -> Arc<Self> {
        let pool = ResourcePool::new(config.capacity);
        let dispatcher = CommandDispatcher::new(hypervisor, &config);
        let notifier = EventNotifier::new(config.event_capacity);
        Arc::new(Self {
            config,
            registry: VmRegistry::new(),
            pool,
            network: NetworkTopology::new(),
            dispatcher,
            notifier,
            operations: DashMap::new(),
        })
    }

    fn emit(
        &self,
        vm: VmId,
        operation: Option<OperationId>,
        from: VmLifecycleState,
        to: VmLifecycleState,
        error: Option<String>,
    ) {
        // Operations that hold the lifecycle state (attach, detach, a
        // reconcile that confirms the model) produce no observable change.
        if from == to && error.is_none() {
            return;
        }
        self.notifier.publish(StateChangeEvent {
            vm,
            operation,
            from,
            to,
            error,
            at: Utc::now(),
        });
    }

    fn update_operation<F: FnOnce(&mut OperationRecord)>(&self, id: OperationId, f: F) {
        if let Some(mut op) = self.operations.get_mut(&id) {
            f(&mut op);
            op.updated_at = Utc::now();
        }
    }

    /// Register a VM: admit its resources, create it on the hypervisor, and
    /// record it with a root snapshot node. On success the VM is `Stopped`
    /// and ready for `Start`; on any failure the definition is rolled back
    /// entirely.
    pub async fn define_vm(&self, name: &str, spec: VmSpec) -> LariatResult<VmId> {
        if name.trim().is_empty() {
            return Err(LariatError::Validation {
                field: "name".to_string(),
                message: "VM name cannot be empty".to_string(),
            });
        }
        spec.validate()?;

        let vm = VmId::new();
        self.registry.reserve_name(name)?;
        if let Err(e) = self.pool.allocate(vm, &spec) {
            self.registry.release_name(name);
            return Err(e);
        }

        let disk_ref = match self.dispatcher.create(vm, name, &spec).await {
            Ok(dispatched) => dispatched.value,
            Err(failure) => {
                self.pool.release(vm);
                self.registry.release_name(name);
                return Err(failure.error);
            }
        };

        self.registry.insert(VmRecord {
            id: vm,
            name: name.to_string(),
            state: VmLifecycleState::Stopped,
            spec,
            tree: SnapshotTree::new(disk_ref),
            in_flight: None,
            tainted: false,
        });
        info!(%vm, name, "VM defined");
        self.emit(
            vm,
            None,
            VmLifecycleState::Defined,
            VmLifecycleState::Stopped,
            None,
        );
        Ok(vm)
    }

    /// Destroy a VM and atomically remove every trace of it: registry
    /// entry, snapshot tree, resource allocation, and network attachments.
    pub async fn delete_vm(&self, vm: VmId) -> LariatResult<()> {
        let handle = self.registry.get(vm)?;
        let mut rec = handle.record.lock().await;
        if rec.tainted {
            return Err(LariatError::Corruption {
                message: format!("VM {} requires reconciliation", vm),
            });
        }
        if rec.in_flight.is_some() {
            return Err(LariatError::StateConflict {
                message: format!("VM {} has an operation in flight", vm),
            });
        }
        match rec.state {
            VmLifecycleState::Stopped | VmLifecycleState::Error => {}
            state => {
                return Err(LariatError::InvalidStateTransition {
                    vm,
                    from: state,
                    requested: "destroy".to_string(),
                });
            }
        }

        self.dispatcher.destroy(vm).await.map_err(LariatError::from)?;

        let from = rec.state;
        rec.state = VmLifecycleState::Deleted;
        self.network.detach_all(vm);
        self.pool.release(vm);
        self.registry.remove(vm, &rec.name);
        info!(%vm, name = %rec.name, "VM deleted");
        drop(rec);
        self.emit(vm, None, from, VmLifecycleState::Deleted, None);
        Ok(())
    }

    /// Validate and enqueue an operation. Returns immediately with the
    /// operation id; the hypervisor call runs on its own task and completion
    /// is observable via `query_operation` and the event stream.
    pub async fn submit_operation(
        self: &Arc<Self>,
        vm: VmId,
        kind: OperationKind,
    ) -> LariatResult<OperationId> {
        let handle = self.registry.get(vm)?;
        let mut rec = handle.record.lock().await;

        if rec.tainted && !matches!(kind, OperationKind::Reconcile) {
            return Err(LariatError::Corruption {
                message: format!("VM {} requires reconciliation", vm),
            });
        }
        if let Some(in_flight) = rec.in_flight {
            return Err(LariatError::StateConflict {
                message: format!(
                    "VM {} already has operation {} in flight",
                    vm, in_flight.operation
                ),
            });
        }

        let transition = state_machine::validate(vm, rec.state, &kind, &self.config.snapshot)?;
        let preflight = self.preflight(&mut rec, vm, &kind)?;

        let op_id = OperationId::new();
        self.operations
            .insert(op_id, OperationRecord::new(op_id, vm, kind.clone()));

        let prior = rec.state;
        rec.state = transition.in_flight;
        rec.in_flight = Some(InFlight {
            operation: op_id,
            prior,
        });
        info!(%vm, operation = %op_id, kind = kind.name(), "operation accepted");
        drop(rec);
        self.emit(vm, Some(op_id), prior, transition.in_flight, None);

        let this = Arc::clone(self);
        tokio::spawn(this.run_operation(
            op_id,
            vm,
            kind,
            prior,
            transition.on_success,
            preflight,
        ));
        Ok(op_id)
    }

    /// Synchronous parameter checks, performed before anything reaches the
    /// hypervisor boundary. A failure here leaves no side effect, except
    /// that a `SetResources` admission is reserved immediately so a
    /// concurrent define cannot double-spend the capacity (it is rolled
    /// back if the hypervisor call later fails).
    fn preflight(
        &self,
        rec: &mut VmRecord,
        vm: VmId,
        kind: &OperationKind,
    ) -> LariatResult<Preflight> {
        match kind {
            OperationKind::RevertSnapshot { snapshot } => {
                let node = rec
                    .tree
                    .node(*snapshot)
                    .ok_or_else(|| LariatError::NotFound {
                        resource: format!("snapshot {}", snapshot),
                    })?;
                Ok(Preflight::Snapshot {
                    disk_ref: node.disk_ref.clone(),
                })
            }
            OperationKind::DeleteSnapshot { snapshot, cascade } => {
                if *snapshot == rec.tree.root() {
                    return Err(LariatError::InvalidArgument {
                        message: "the root snapshot cannot be deleted".to_string(),
                    });
                }
                let node = rec
                    .tree
                    .node(*snapshot)
                    .ok_or_else(|| LariatError::NotFound {
                        resource: format!("snapshot {}", snapshot),
                    })?;
                if !node.children.is_empty() && !cascade {
                    return Err(LariatError::StateConflict {
                        message: format!("snapshot {} has descendants", snapshot),
                    });
                }
                Ok(Preflight::Snapshot {
                    disk_ref: node.disk_ref.clone(),
                })
            }
            OperationKind::SetResources { spec } => {
                spec.validate()?;
                let prior_spec = rec.spec;
                self.pool.resize(vm, spec)?;
                Ok(Preflight::Resize { prior_spec })
            }
            OperationKind::AttachNetwork { switch, .. } => {
                if !self.network.switch_exists(switch) {
                    return Err(LariatError::NotFound {
                        resource: format!("switch '{}'", switch),
                    });
                }
                Ok(Preflight::None)
            }
            OperationKind::DetachNetwork { port } => {
                if !self.network.is_attached(vm, *port) {
                    return Err(LariatError::NotFound {
                        resource: format!("attachment at VM {} port {}", vm, port),
                    });
                }
                Ok(Preflight::None)
            }
            _ => Ok(Preflight::None),
        }
    }

    async fn run_operation(
        self: Arc<Self>,
        op_id: OperationId,
        vm: VmId,
        kind: OperationKind,
        prior: VmLifecycleState,
        on_success: SuccessState,
        preflight: Preflight,
    ) {
        let handle = match self.registry.get(vm) {
            Ok(handle) => handle,
            Err(_) => return,
        };

        // Phase 1: mark dispatched, or honor a cancellation that arrived
        // while the operation was still pending.
        {
            let mut rec = handle.record.lock().await;
            let mut aborted = false;
            self.update_operation(op_id, |op| {
                if op.cancel_requested {
                    op.status = OperationStatus::Failed;
                    op.last_error = Some("cancelled before dispatch".to_string());
                    aborted = true;
                } else {
                    op.status = OperationStatus::Dispatched;
                }
            });
            if aborted {
                let from = rec.state;
                rec.state = prior;
                rec.in_flight = None;
                drop(rec);
                self.emit(
                    vm,
                    Some(op_id),
                    from,
                    prior,
                    Some("cancelled before dispatch".to_string()),
                );
                return;
            }
        }

        // Phase 2: the hypervisor call, with no VM lock held.
        let outcome: Result<(DispatchPayload, u32), crate::dispatcher::DispatchFailure> =
            match &kind {
                OperationKind::Start => self
                    .dispatcher
                    .start(vm)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::Stop => self
                    .dispatcher
                    .stop(vm)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::Pause => self
                    .dispatcher
                    .pause(vm)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::Resume => self
                    .dispatcher
                    .resume(vm)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::CreateSnapshot { .. } => self
                    .dispatcher
                    .snapshot_create(vm)
                    .await
                    .map(|d| (DispatchPayload::DiskRef(d.value), d.retries)),
                OperationKind::RevertSnapshot { .. } => {
                    let disk_ref = match &preflight {
                        Preflight::Snapshot { disk_ref } => disk_ref.clone(),
                        _ => String::new(),
                    };
                    self.dispatcher
                        .snapshot_revert(vm, &disk_ref)
                        .await
                        .map(|d| (DispatchPayload::None, d.retries))
                }
                OperationKind::DeleteSnapshot { .. } => {
                    let disk_ref = match &preflight {
                        Preflight::Snapshot { disk_ref } => disk_ref.clone(),
                        _ => String::new(),
                    };
                    self.dispatcher
                        .snapshot_delete(vm, &disk_ref)
                        .await
                        .map(|d| (DispatchPayload::None, d.retries))
                }
                OperationKind::SetResources { spec } => self
                    .dispatcher
                    .set_resources(vm, spec)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::AttachNetwork { port, switch } => self
                    .dispatcher
                    .attach_network(vm, *port, switch)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::DetachNetwork { port } => self
                    .dispatcher
                    .detach_network(vm, *port)
                    .await
                    .map(|d| (DispatchPayload::None, d.retries)),
                OperationKind::Reconcile => self
                    .dispatcher
                    .query_state(vm)
                    .await
                    .map(|d| (DispatchPayload::Observed(d.value), d.retries)),
            };

        // Phase 3: commit or record the failure, atomically for this VM.
        let mut rec = handle.record.lock().await;
        match outcome {
            Ok((payload, retries)) => {
                match self.commit_success(&mut rec, &kind, payload, prior, on_success) {
                    Ok(final_state) => {
                        let compensating = self
                            .operations
                            .get(&op_id)
                            .map(|op| op.cancel_requested)
                            .unwrap_or(false);
                        if compensating {
                            if let Some(comp) = compensation_for(&kind) {
                                drop(rec);
                                self.compensate(&handle, op_id, vm, comp, retries).await;
                                return;
                            }
                            // No sensible inverse exists; the operation
                            // completes and the cancellation is recorded as
                            // ineffective.
                            warn!(%vm, operation = %op_id, kind = kind.name(),
                                "cancellation ignored: operation has no compensating action");
                        }
                        let from = rec.state;
                        rec.state = final_state;
                        rec.in_flight = None;
                        self.update_operation(op_id, |op| {
                            op.status = OperationStatus::Succeeded;
                            op.retry_count = retries;
                        });
                        drop(rec);
                        self.emit(vm, Some(op_id), from, final_state, None);
                    }
                    Err(e) => {
                        // The hypervisor applied the command but the local
                        // commit failed; the model can no longer be trusted.
                        if matches!(e, LariatError::Corruption { .. }) {
                            rec.tainted = true;
                        }
                        let from = rec.state;
                        rec.state = VmLifecycleState::Error;
                        rec.in_flight = None;
                        let message = e.to_string();
                        error!(%vm, operation = %op_id, error = %message, "local commit failed");
                        self.update_operation(op_id, |op| {
                            op.status = OperationStatus::Failed;
                            op.retry_count = retries;
                            op.last_error = Some(message.clone());
                        });
                        drop(rec);
                        self.emit(
                            vm,
                            Some(op_id),
                            from,
                            VmLifecycleState::Error,
                            Some(message),
                        );
                    }
                }
            }
            Err(failure) => {
                if let Preflight::Resize { prior_spec } = &preflight {
                    if let Err(e) = self.pool.resize(vm, prior_spec) {
                        // The freed headroom was claimed concurrently; the
                        // record and the pool now disagree, so the VM is
                        // frozen until reconciled.
                        rec.tainted = true;
                        error!(%vm, error = %e, "failed to roll back resource reservation");
                    }
                }
                let from = rec.state;
                // Mutating commands leave the VM in Error; a failed
                // reconciliation query leaves the state as it was.
                let to = if matches!(kind, OperationKind::Reconcile) {
                    prior
                } else {
                    VmLifecycleState::Error
                };
                rec.state = to;
                rec.in_flight = None;
                let message = failure.error.to_string();
                warn!(%vm, operation = %op_id, kind = kind.name(), error = %message,
                    retries = failure.retries, "operation failed");
                self.update_operation(op_id, |op| {
                    op.status = OperationStatus::Failed;
                    op.retry_count = failure.retries;
                    op.last_error = Some(message.clone());
                });
                drop(rec);
                self.emit(vm, Some(op_id), from, to, Some(message));
            }
        }
    }

    /// Apply the local effects of an acknowledged command. Runs under the
    /// VM lock together with the state update, so registry, snapshot tree,
    /// allocation, and attachments change atomically with the lifecycle.
    fn commit_success(
        &self,
        rec: &mut VmRecord,
        kind: &OperationKind,
        payload: DispatchPayload,
        prior: VmLifecycleState,
        on_success: SuccessState,
    ) -> LariatResult<VmLifecycleState> {
        match kind {
            OperationKind::Start
            | OperationKind::Stop
            | OperationKind::Pause
            | OperationKind::Resume => {}
            OperationKind::CreateSnapshot { label } => {
                let disk_ref = match payload {
                    DispatchPayload::DiskRef(disk_ref) => disk_ref,
                    _ => {
                        return Err(LariatError::Internal {
                            message: "snapshot creation returned no disk reference".to_string(),
                        });
                    }
                };
                rec.tree.create(disk_ref, label.clone());
                rec.tree.verify()?;
            }
            OperationKind::RevertSnapshot { snapshot } => {
                rec.tree.revert(*snapshot)?;
                rec.tree.verify()?;
            }
            OperationKind::DeleteSnapshot { snapshot, cascade } => {
                rec.tree.delete(*snapshot, *cascade)?;
                rec.tree.verify()?;
            }
            OperationKind::SetResources { spec } => {
                rec.spec = *spec;
                self.pool.verify()?;
            }
            OperationKind::AttachNetwork { port, switch } => {
                self.network.attach(rec.id, *port, switch)?;
            }
            OperationKind::DetachNetwork { port } => {
                self.network.detach(rec.id, *port)?;
            }
            OperationKind::Reconcile => {
                let observed = match payload {
                    DispatchPayload::Observed(observed) => observed,
                    _ => {
                        return Err(LariatError::Internal {
                            message: "reconciliation returned no state".to_string(),
                        });
                    }
                };
                let state = match observed {
                    HypervisorVmState::Stopped => VmLifecycleState::Stopped,
                    HypervisorVmState::Running => VmLifecycleState::Running,
                    HypervisorVmState::Paused => VmLifecycleState::Paused,
                    HypervisorVmState::Unknown => {
                        return Err(LariatError::HypervisorRejected {
                            operation: "reconcile".to_string(),
                            reason: format!("hypervisor does not know VM {}", rec.id),
                        });
                    }
                };
                rec.tainted = false;
                info!(vm = %rec.id, ?observed, "reconciled against hypervisor truth");
                return Ok(state);
            }
        }
        Ok(on_success.resolve(prior))
    }

    /// Issue the best-effort inverse of a cancelled-but-completed command.
    async fn compensate(
        &self,
        handle: &Arc<crate::registry::VmHandle>,
        op_id: OperationId,
        vm: VmId,
        comp: Compensation,
        retries: u32,
    ) {
        {
            let mut rec = handle.record.lock().await;
            let from = rec.state;
            rec.state = comp.in_flight;
            self.update_operation(op_id, |op| {
                op.status = OperationStatus::Compensating;
                op.retry_count = retries;
            });
            drop(rec);
            self.emit(vm, Some(op_id), from, comp.in_flight, None);
        }
        info!(%vm, operation = %op_id, compensation = comp.name, "issuing compensating command");

        let result = match comp.action {
            CompensationAction::Stop => self.dispatcher.stop(vm).await,
            CompensationAction::Pause => self.dispatcher.pause(vm).await,
            CompensationAction::Resume => self.dispatcher.resume(vm).await,
        };

        let mut rec = handle.record.lock().await;
        match result {
            Ok(_) => {
                let from = rec.state;
                rec.state = comp.final_state;
                rec.in_flight = None;
                let note = format!("cancelled; compensated with {}", comp.name);
                self.update_operation(op_id, |op| {
                    op.status = OperationStatus::Failed;
                    op.last_error = Some(note.clone());
                });
                drop(rec);
                self.emit(vm, Some(op_id), from, comp.final_state, Some(note));
            }
            Err(failure) => {
                let from = rec.state;
                rec.state = VmLifecycleState::Error;
                rec.in_flight = None;
                let message = format!("compensation {} failed: {}", comp.name, failure.error);
                self.update_operation(op_id, |op| {
                    op.status = OperationStatus::Failed;
                    op.last_error = Some(message.clone());
                });
                drop(rec);
                self.emit(vm, Some(op_id), from, VmLifecycleState::Error, Some(message));
            }
        }
    }

    /// Cancel an operation. Only a still-pending operation can be aborted
    /// outright; a dispatched one cannot be interrupted mid-flight, so the
    /// request converts into a best-effort compensating command issued once
    /// the in-flight call completes.
    pub async fn cancel_operation(&self, operation: OperationId) -> LariatResult<()> {
        let vm = {
            let op = self
                .operations
                .get(&operation)
                .ok_or_else(|| LariatError::NotFound {
                    resource: format!("operation {}", operation),
                })?;
            if op.status.is_terminal() {
                return Err(LariatError::StateConflict {
                    message: format!("operation {} already completed", operation),
                });
            }
            op.vm
        };

        let handle = self.registry.get(vm)?;
        let _rec = handle.record.lock().await;
        let mut result = Ok(());
        self.update_operation(operation, |op| match op.status {
            OperationStatus::Pending => {
                op.cancel_requested = true;
            }
            OperationStatus::Dispatched => {
                op.cancel_requested = true;
                op.status = OperationStatus::Compensating;
            }
            OperationStatus::Compensating => {}
            OperationStatus::Succeeded | OperationStatus::Failed => {
                result = Err(LariatError::StateConflict {
                    message: format!("operation {} already completed", operation),
                });
            }
        });
        result
    }

    pub fn query_operation(&self, operation: OperationId) -> LariatResult<OperationRecord> {
        self.operations
            .get(&operation)
            .map(|op| op.clone())
            .ok_or_else(|| LariatError::NotFound {
                resource: format!("operation {}", operation),
            })
    }

    /// Discard operation records that reached a terminal status.
    pub fn prune_operations(&self) {
        self.operations.retain(|_, op| !op.status.is_terminal());
    }

    pub async fn list_vms(&self) -> Vec<VmInfo> {
        let mut infos = Vec::new();
        for handle in self.registry.handles() {
            let rec = handle.record.lock().await;
            infos.push(self.info_of(&rec));
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn get_vm(&self, vm: VmId) -> LariatResult<VmInfo> {
        let handle = self.registry.get(vm)?;
        let rec = handle.record.lock().await;
        Ok(self.info_of(&rec))
    }

    fn info_of(&self, rec: &VmRecord) -> VmInfo {
        VmInfo {
            id: rec.id,
            name: rec.name.clone(),
            state: rec.state,
            spec: rec.spec,
            attachments: self.network.attachments_of(rec.id),
            current_snapshot: rec.tree.current(),
        }
    }

    pub async fn get_snapshot_tree(&self, vm: VmId) -> LariatResult<SnapshotTreeView> {
        let handle = self.registry.get(vm)?;
        let rec = handle.record.lock().await;
        Ok(rec.tree.view())
    }

    pub fn subscribe(
        &self,
        filter: EventFilter,
    ) -> impl Stream<Item = StateChangeEvent> + Send + Unpin {
        self.notifier.subscribe(filter)
    }

    /// Submit an explicit reconciliation for a VM, the only path out of
    /// `Error` and the corruption taint.
    pub async fn reconcile(self: &Arc<Self>, vm: VmId) -> LariatResult<OperationId> {
        self.submit_operation(vm, OperationKind::Reconcile).await
    }

    // Switch management is topology-level, not per-VM, so it does not go
    // through the operation pipeline.

    pub fn create_switch(&self, name: &str) -> LariatResult<()> {
        self.network.create_switch(name)
    }

    pub fn delete_switch(&self, name: &str) -> LariatResult<()> {
        self.network.delete_switch(name)
    }

    pub fn list_switches(&self) -> Vec<String> {
        self.network.list_switches()
    }

    pub fn resource_usage(&self) -> PoolUsage {
        self.pool.usage()
    }

    pub fn vm_count(&self) -> usize {
        self.registry.len()
    }
}
