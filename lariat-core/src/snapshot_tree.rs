//! Per-VM snapshot ancestry tree.
//!
//! Nodes are stored in an id-keyed arena; parent/child relations are held by
//! identifier on both sides rather than by ownership, and the child sets are
//! maintained explicitly on every mutation. Exactly one root exists per tree
//! and the current-position pointer always names a live node.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{LariatError, LariatResult};
use crate::types::SnapshotId;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotNode {
    pub id: SnapshotId,
    /// `None` only for the root.
    pub parent: Option<SnapshotId>,
    pub children: BTreeSet<SnapshotId>,
    pub created_at: DateTime<Utc>,
    /// Opaque disk-state reference assigned by the hypervisor.
    pub disk_ref: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotTree {
    root: SnapshotId,
    current: SnapshotId,
    nodes: HashMap<SnapshotId, SnapshotNode>,
}

/// Serializable snapshot of the tree shape, for external consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotTreeView {
    pub root: SnapshotId,
    pub current: SnapshotId,
    pub nodes: Vec<SnapshotNode>,
}

impl SnapshotTree {
    /// Create a tree holding only the root node for a freshly defined VM.
    pub fn new(disk_ref: String) -> Self {
        let root = SnapshotId::new();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            SnapshotNode {
                id: root,
                parent: None,
                children: BTreeSet::new(),
                created_at: Utc::now(),
                disk_ref,
                label: None,
            },
        );
        Self {
            root,
            current: root,
            nodes,
        }
    }

    pub fn root(&self) -> SnapshotId {
        self.root
    }

    pub fn current(&self) -> SnapshotId {
        self.current
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: SnapshotId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: SnapshotId) -> Option<&SnapshotNode> {
        self.nodes.get(&id)
    }

    /// Append a new node as a child of the current position and move the
    /// current-position pointer onto it.
    pub fn create(&mut self, disk_ref: String, label: Option<String>) -> SnapshotId {
        let id = SnapshotId::new();
        let parent = self.current;
        self.nodes.insert(
            id,
            SnapshotNode {
                id,
                parent: Some(parent),
                children: BTreeSet::new(),
                created_at: Utc::now(),
                disk_ref,
                label,
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(id);
        }
        self.current = id;
        id
    }

    /// Move the current-position pointer without altering tree shape.
    pub fn revert(&mut self, id: SnapshotId) -> LariatResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(LariatError::NotFound {
                resource: format!("snapshot {}", id),
            });
        }
        self.current = id;
        Ok(())
    }

    /// Remove a node. The root can never be deleted. A node with children is
    /// only removable with `cascade`, which re-parents its children onto the
    /// node's own parent (merge semantics). Deleting the current position
    /// moves the pointer to the parent.
    pub fn delete(&mut self, id: SnapshotId, cascade: bool) -> LariatResult<()> {
        if id == self.root {
            return Err(LariatError::InvalidArgument {
                message: "the root snapshot cannot be deleted".to_string(),
            });
        }
        let (parent, children) = {
            let node = self.nodes.get(&id).ok_or_else(|| LariatError::NotFound {
                resource: format!("snapshot {}", id),
            })?;
            let parent = node.parent.ok_or_else(|| LariatError::Corruption {
                message: format!("non-root snapshot {} has no parent", id),
            })?;
            if !node.children.is_empty() && !cascade {
                return Err(LariatError::StateConflict {
                    message: format!("snapshot {} has descendants", id),
                });
            }
            (parent, node.children.iter().copied().collect::<Vec<_>>())
        };

        for child in &children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = Some(parent);
            }
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.remove(&id);
            p.children.extend(children.iter().copied());
        }
        self.nodes.remove(&id);
        if self.current == id {
            self.current = parent;
        }
        Ok(())
    }

    pub fn view(&self) -> SnapshotTreeView {
        let mut nodes: Vec<SnapshotNode> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| (n.created_at, n.id));
        SnapshotTreeView {
            root: self.root,
            current: self.current,
            nodes,
        }
    }

    /// Check the structural invariants: a single root reaching every node,
    /// no cycles, and parent/child links that agree on both sides. A failure
    /// here indicates a bug, not an expected condition.
    pub fn verify(&self) -> LariatResult<()> {
        if !self.nodes.contains_key(&self.current) {
            return Err(LariatError::Corruption {
                message: format!("current position {} is not in the tree", self.current),
            });
        }
        let root = self.nodes.get(&self.root).ok_or_else(|| LariatError::Corruption {
            message: "root node missing from arena".to_string(),
        })?;
        if root.parent.is_some() {
            return Err(LariatError::Corruption {
                message: "root node has a parent".to_string(),
            });
        }

        let mut visited: HashSet<SnapshotId> = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                return Err(LariatError::Corruption {
                    message: format!("cycle detected at snapshot {}", id),
                });
            }
            let node = self.nodes.get(&id).ok_or_else(|| LariatError::Corruption {
                message: format!("dangling child reference {}", id),
            })?;
            for child in &node.children {
                let c = self.nodes.get(child).ok_or_else(|| LariatError::Corruption {
                    message: format!("dangling child reference {}", child),
                })?;
                if c.parent != Some(id) {
                    return Err(LariatError::Corruption {
                        message: format!("snapshot {} disagrees with parent {}", child, id),
                    });
                }
                stack.push(*child);
            }
        }
        if visited.len() != self.nodes.len() {
            return Err(LariatError::Corruption {
                message: "unreachable snapshot nodes present".to_string(),
            });
        }
        Ok(())
    }
}
