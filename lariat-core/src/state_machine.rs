//! The authority on legal lifecycle transitions.
//!
//! Validation is pure: given the current state, the requested operation, and
//! the snapshot policy, it either yields the transition to perform or an
//! error, with no side effects. The in-flight state is held while the
//! hypervisor call is outstanding; the success state is fixed for lifecycle
//! commands and "wherever the VM was" for operations that do not move it.

use crate::config::SnapshotPolicy;
use crate::error::{LariatError, LariatResult};
use crate::types::{OperationKind, VmId, VmLifecycleState};

/// The state a VM ends in once the hypervisor acknowledges the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessState {
    Fixed(VmLifecycleState),
    /// Return to the state held before dispatch (snapshot and configuration
    /// operations do not move the lifecycle).
    Prior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State held while the hypervisor call is outstanding.
    pub in_flight: VmLifecycleState,
    pub on_success: SuccessState,
}

impl SuccessState {
    pub fn resolve(self, prior: VmLifecycleState) -> VmLifecycleState {
        match self {
            SuccessState::Fixed(state) => state,
            SuccessState::Prior => prior,
        }
    }
}

fn invalid(
    vm: VmId,
    from: VmLifecycleState,
    kind: &OperationKind,
) -> LariatError {
    LariatError::InvalidStateTransition {
        vm,
        from,
        requested: kind.name().to_string(),
    }
}

/// Validate an operation against the current lifecycle state. Returns the
/// transition to apply, or an error with no side effect.
pub fn validate(
    vm: VmId,
    current: VmLifecycleState,
    kind: &OperationKind,
    policy: &SnapshotPolicy,
) -> LariatResult<Transition> {
    use VmLifecycleState as S;

    // Transitional and terminal states never accept new submissions; the
    // per-VM in-flight guard normally rejects these earlier with a
    // StateConflict, this is the backstop.
    match current {
        S::Starting | S::Stopping | S::Pausing | S::Resuming | S::SnapshotInProgress => {
            return Err(invalid(vm, current, kind));
        }
        S::Deleted => return Err(invalid(vm, current, kind)),
        _ => {}
    }

    // A VM in Error accepts nothing but an explicit reconciliation.
    if current == S::Error && !matches!(kind, OperationKind::Reconcile) {
        return Err(invalid(vm, current, kind));
    }

    match kind {
        OperationKind::Start => match current {
            S::Stopped => Ok(Transition {
                in_flight: S::Starting,
                on_success: SuccessState::Fixed(S::Running),
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::Stop => match current {
            S::Running | S::Paused => Ok(Transition {
                in_flight: S::Stopping,
                on_success: SuccessState::Fixed(S::Stopped),
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::Pause => match current {
            S::Running => Ok(Transition {
                in_flight: S::Pausing,
                on_success: SuccessState::Fixed(S::Paused),
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::Resume => match current {
            S::Paused => Ok(Transition {
                in_flight: S::Resuming,
                on_success: SuccessState::Fixed(S::Running),
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::CreateSnapshot { .. } => match current {
            S::Stopped | S::Running | S::Paused => Ok(Transition {
                in_flight: S::SnapshotInProgress,
                on_success: SuccessState::Prior,
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::RevertSnapshot { .. } => match current {
            S::Stopped => Ok(Transition {
                in_flight: S::SnapshotInProgress,
                on_success: SuccessState::Prior,
            }),
            S::Running | S::Paused if policy.live_revert => Ok(Transition {
                in_flight: S::SnapshotInProgress,
                on_success: SuccessState::Prior,
            }),
            S::Running | S::Paused => Err(LariatError::UnsupportedOperation {
                operation: kind.name().to_string(),
                reason: format!(
                    "live revert is disabled by configuration and the VM is {:?}",
                    current
                ),
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::DeleteSnapshot { .. } => match current {
            S::Stopped | S::Running | S::Paused => Ok(Transition {
                in_flight: S::SnapshotInProgress,
                on_success: SuccessState::Prior,
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::SetResources { .. } => match current {
            S::Stopped => Ok(Transition {
                in_flight: S::Stopped,
                on_success: SuccessState::Prior,
            }),
            _ => Err(invalid(vm, current, kind)),
        },
        OperationKind::AttachNetwork { .. } | OperationKind::DetachNetwork { .. } => {
            match current {
                S::Stopped | S::Running | S::Paused => Ok(Transition {
                    in_flight: current,
                    on_success: SuccessState::Prior,
                }),
                _ => Err(invalid(vm, current, kind)),
            }
        }
        OperationKind::Reconcile => match current {
            S::Error | S::Stopped | S::Running | S::Paused => Ok(Transition {
                in_flight: current,
                // The success state is whatever the hypervisor reports; the
                // orchestrator resolves it from the query result.
                on_success: SuccessState::Prior,
            }),
            _ => Err(invalid(vm, current, kind)),
        },
    }
}
