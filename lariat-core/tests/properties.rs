//! Property tests for the pure data structures: the snapshot tree keeps its
//! structural invariants under arbitrary operation sequences, and the
//! resource pool never oversubscribes.

use lariat_core::config::ResourceCapacity;
use lariat_core::resource_pool::ResourcePool;
use lariat_core::snapshot_tree::SnapshotTree;
use lariat_core::{VmId, VmSpec};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
enum TreeOp {
    Create,
    /// Revert to the nth live node, picked modulo the tree size.
    Revert(usize),
    /// Delete the nth live node (modulo size), with or without cascade.
    Delete(usize, bool),
}

fn tree_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => Just(TreeOp::Create),
        2 => (0usize..32).prop_map(TreeOp::Revert),
        2 => ((0usize..32), any::<bool>()).prop_map(|(n, cascade)| TreeOp::Delete(n, cascade)),
    ]
}

proptest! {
    #[test]
    fn snapshot_tree_invariants_hold_under_any_sequence(
        ops in prop::collection::vec(tree_op(), 1..60)
    ) {
        let mut tree = SnapshotTree::new("disk-0".to_string());
        let mut next_ref = 1u64;

        for op in ops {
            // Pick targets from the live node set so most operations hit.
            let view = tree.view();
            match op {
                TreeOp::Create => {
                    tree.create(format!("disk-{next_ref}"), None);
                    next_ref += 1;
                }
                TreeOp::Revert(n) => {
                    let target = view.nodes[n % view.nodes.len()].id;
                    tree.revert(target).unwrap();
                    prop_assert_eq!(tree.current(), target);
                }
                TreeOp::Delete(n, cascade) => {
                    let target = view.nodes[n % view.nodes.len()].id;
                    let had_children = !tree.node(target).unwrap().children.is_empty();
                    match tree.delete(target, cascade) {
                        Ok(()) => {
                            prop_assert_ne!(target, tree.root());
                            prop_assert!(!tree.contains(target));
                        }
                        Err(_) => {
                            // Root, or a populated node without cascade.
                            prop_assert!(target == tree.root() || (had_children && !cascade));
                            prop_assert!(tree.contains(target));
                        }
                    }
                }
            }

            tree.verify().unwrap();
            prop_assert!(tree.contains(tree.root()));
            prop_assert!(tree.contains(tree.current()));
            prop_assert!(!tree.is_empty());
        }
    }
}

#[test]
fn pool_bound_holds_under_concurrent_interleavings() {
    // Threads race allocate/resize/release over a shared set of VM ids
    // against a pool far smaller than the aggregate demand, so admissions
    // and rejections interleave freely.
    let capacity = ResourceCapacity {
        cpu: 8,
        memory_mb: 8192,
        disk_gb: 200,
    };
    let pool = Arc::new(ResourcePool::new(capacity));
    let vms: Arc<Vec<VmId>> = Arc::new((0..8).map(|_| VmId::new()).collect());

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let vms = Arc::clone(&vms);
            thread::spawn(move || {
                for i in 0..500 {
                    let vm = vms[(t + i) % vms.len()];
                    let spec = VmSpec {
                        vcpus: 1 + ((t + i) % 3) as u32,
                        memory_mb: 512 * (1 + (i % 4) as u64),
                        disk_gb: 10,
                    };
                    match i % 3 {
                        0 => {
                            let _ = pool.allocate(vm, &spec);
                        }
                        1 => {
                            let _ = pool.resize(vm, &spec);
                        }
                        _ => pool.release(vm),
                    }

                    let usage = pool.usage();
                    assert!(usage.cpu <= capacity.cpu);
                    assert!(usage.memory_mb <= capacity.memory_mb);
                    assert!(usage.disk_gb <= capacity.disk_gb);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    pool.verify().unwrap();
}

#[derive(Debug, Clone)]
enum PoolOp {
    Allocate(usize, VmSpec),
    Release(usize),
    Resize(usize, VmSpec),
}

fn small_spec() -> impl Strategy<Value = VmSpec> {
    (1u32..4, 1u64..2048, 1u64..50).prop_map(|(vcpus, memory_mb, disk_gb)| VmSpec {
        vcpus,
        memory_mb,
        disk_gb,
    })
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => ((0usize..8), small_spec()).prop_map(|(n, s)| PoolOp::Allocate(n, s)),
        2 => (0usize..8).prop_map(PoolOp::Release),
        2 => ((0usize..8), small_spec()).prop_map(|(n, s)| PoolOp::Resize(n, s)),
    ]
}

proptest! {
    #[test]
    fn pool_never_oversubscribes(ops in prop::collection::vec(pool_op(), 1..80)) {
        let capacity = ResourceCapacity {
            cpu: 6,
            memory_mb: 4096,
            disk_gb: 120,
        };
        let pool = ResourcePool::new(capacity);
        let vms: Vec<VmId> = (0..8).map(|_| VmId::new()).collect();

        for op in ops {
            match op {
                PoolOp::Allocate(n, spec) => {
                    let vm = vms[n];
                    let had = pool.allocation_of(vm).is_some();
                    match pool.allocate(vm, &spec) {
                        Ok(()) => {
                            prop_assert!(!had);
                            prop_assert_eq!(pool.allocation_of(vm), Some(spec));
                        }
                        Err(_) => {
                            // Double allocation or exhaustion; either way the
                            // prior view is unchanged.
                            prop_assert_eq!(pool.allocation_of(vm).is_some(), had);
                        }
                    }
                }
                PoolOp::Release(n) => {
                    pool.release(vms[n]);
                    prop_assert!(pool.allocation_of(vms[n]).is_none());
                }
                PoolOp::Resize(n, spec) => {
                    let vm = vms[n];
                    let prior = pool.allocation_of(vm);
                    match pool.resize(vm, &spec) {
                        Ok(()) => prop_assert_eq!(pool.allocation_of(vm), Some(spec)),
                        Err(_) => prop_assert_eq!(pool.allocation_of(vm), prior),
                    }
                }
            }
            pool.verify().unwrap();

            let usage = pool.usage();
            prop_assert!(usage.cpu <= capacity.cpu);
            prop_assert!(usage.memory_mb <= capacity.memory_mb);
            prop_assert!(usage.disk_gb <= capacity.disk_gb);
        }
    }
}
