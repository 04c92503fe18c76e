//! Snapshot tree semantics driven through the operation pipeline.

mod common;

use common::{engine, engine_with, test_config, wait_op};
use lariat_core::{
    LariatError, MockHypervisor, OperationKind, OperationStatus, Orchestrator, SnapshotId, VmId,
    VmLifecycleState, VmSpec,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

async fn snapshot(orch: &Arc<Orchestrator>, vm: VmId, label: &str) -> SnapshotId {
    let op = orch
        .submit_operation(
            vm,
            OperationKind::CreateSnapshot {
                label: Some(label.to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(wait_op(orch, op).await.status, OperationStatus::Succeeded);
    orch.get_vm(vm).await.unwrap().current_snapshot
}

#[tokio::test]
async fn create_extends_the_chain_and_moves_current() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let root = orch.get_snapshot_tree(vm).await.unwrap().root;

    let a = snapshot(&orch, vm, "a").await;
    let b = snapshot(&orch, vm, "b").await;

    let view = orch.get_snapshot_tree(vm).await.unwrap();
    assert_eq!(view.nodes.len(), 3);
    assert_eq!(view.current, b);
    let node_a = view.nodes.iter().find(|n| n.id == a).unwrap();
    assert_eq!(node_a.parent, Some(root));
    assert_eq!(node_a.label.as_deref(), Some("a"));
    let node_b = view.nodes.iter().find(|n| n.id == b).unwrap();
    assert_eq!(node_b.parent, Some(a));
}

#[tokio::test]
async fn snapshot_while_running_returns_to_running() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let op = orch.submit_operation(vm, OperationKind::Start).await.unwrap();
    wait_op(&orch, op).await;

    snapshot(&orch, vm, "hot").await;
    assert_eq!(orch.get_vm(vm).await.unwrap().state, VmLifecycleState::Running);
}

#[tokio::test]
async fn revert_moves_current_without_changing_shape() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let a = snapshot(&orch, vm, "a").await;
    let _b = snapshot(&orch, vm, "b").await;

    let op = orch
        .submit_operation(vm, OperationKind::RevertSnapshot { snapshot: a })
        .await
        .unwrap();
    assert_eq!(wait_op(&orch, op).await.status, OperationStatus::Succeeded);

    let view = orch.get_snapshot_tree(vm).await.unwrap();
    assert_eq!(view.current, a);
    assert_eq!(view.nodes.len(), 3);

    // A snapshot taken after the revert branches off the reverted node.
    let c = snapshot(&orch, vm, "c").await;
    let view = orch.get_snapshot_tree(vm).await.unwrap();
    let node_c = view.nodes.iter().find(|n| n.id == c).unwrap();
    assert_eq!(node_c.parent, Some(a));
}

#[tokio::test]
async fn live_revert_is_a_configuration_decision() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let a = snapshot(&orch, vm, "a").await;
    let op = orch.submit_operation(vm, OperationKind::Start).await.unwrap();
    wait_op(&orch, op).await;

    // Conservative default: no revert while Running.
    assert!(matches!(
        orch.submit_operation(vm, OperationKind::RevertSnapshot { snapshot: a })
            .await,
        Err(LariatError::UnsupportedOperation { .. })
    ));

    let mut cfg = test_config();
    cfg.snapshot.live_revert = true;
    let (orch, _hv) = engine_with(cfg, MockHypervisor::new());
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let a = snapshot(&orch, vm, "a").await;
    let op = orch.submit_operation(vm, OperationKind::Start).await.unwrap();
    wait_op(&orch, op).await;

    let op = orch
        .submit_operation(vm, OperationKind::RevertSnapshot { snapshot: a })
        .await
        .unwrap();
    assert_eq!(wait_op(&orch, op).await.status, OperationStatus::Succeeded);
    assert_eq!(orch.get_vm(vm).await.unwrap().state, VmLifecycleState::Running);
}

#[tokio::test]
async fn root_deletion_is_rejected() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let root = orch.get_snapshot_tree(vm).await.unwrap().root;

    for cascade in [false, true] {
        assert!(matches!(
            orch.submit_operation(
                vm,
                OperationKind::DeleteSnapshot {
                    snapshot: root,
                    cascade
                }
            )
            .await,
            Err(LariatError::InvalidArgument { .. })
        ));
    }
    assert_eq!(orch.get_snapshot_tree(vm).await.unwrap().nodes.len(), 1);
}

#[tokio::test]
async fn cascade_delete_reparents_children() {
    // root -> a -> b with current at b: deleting a requires cascade, which
    // splices b onto root and leaves current where it was.
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let root = orch.get_snapshot_tree(vm).await.unwrap().root;
    let a = snapshot(&orch, vm, "a").await;
    let b = snapshot(&orch, vm, "b").await;

    assert!(matches!(
        orch.submit_operation(
            vm,
            OperationKind::DeleteSnapshot {
                snapshot: a,
                cascade: false
            }
        )
        .await,
        Err(LariatError::StateConflict { .. })
    ));

    let op = orch
        .submit_operation(
            vm,
            OperationKind::DeleteSnapshot {
                snapshot: a,
                cascade: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(wait_op(&orch, op).await.status, OperationStatus::Succeeded);

    let view = orch.get_snapshot_tree(vm).await.unwrap();
    assert_eq!(view.nodes.len(), 2);
    assert_eq!(view.current, b);
    let node_b = view.nodes.iter().find(|n| n.id == b).unwrap();
    assert_eq!(node_b.parent, Some(root));
}

#[tokio::test]
async fn operations_on_missing_snapshots_fail_synchronously() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    let bogus = SnapshotId::new();

    assert!(matches!(
        orch.submit_operation(vm, OperationKind::RevertSnapshot { snapshot: bogus })
            .await,
        Err(LariatError::NotFound { .. })
    ));
    assert!(matches!(
        orch.submit_operation(
            vm,
            OperationKind::DeleteSnapshot {
                snapshot: bogus,
                cascade: true
            }
        )
        .await,
        Err(LariatError::NotFound { .. })
    ));
}

#[tokio::test]
async fn failed_snapshot_leaves_the_tree_untouched() {
    let (orch, hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();

    // Snapshot capture has no idempotency story: one transient fault fails
    // the operation outright and the tree gains no node.
    hv.inject_transient_failures(1);
    let op = orch
        .submit_operation(vm, OperationKind::CreateSnapshot { label: None })
        .await
        .unwrap();
    let record = wait_op(&orch, op).await;
    assert_eq!(record.status, OperationStatus::Failed);
    assert_eq!(orch.get_snapshot_tree(vm).await.unwrap().nodes.len(), 1);
    assert_eq!(orch.get_vm(vm).await.unwrap().state, VmLifecycleState::Error);
}

#[tokio::test]
async fn tree_view_serializes_to_json() {
    let (orch, _hv) = engine();
    let vm = orch.define_vm("web", VmSpec::default()).await.unwrap();
    snapshot(&orch, vm, "a").await;

    let view = orch.get_snapshot_tree(vm).await.unwrap();
    let json = serde_json::to_value(&view).unwrap();
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().any(|n| n["id"] == json["current"]));
    assert!(nodes.iter().any(|n| n["label"] == "a"));
}
