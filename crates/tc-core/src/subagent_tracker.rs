//! Parent/child session hierarchy with a hard depth limit.
//!
//! The tree is represented index-based (id -> node, parent holds child ids)
//! rather than with direct pointers in both directions, so subtree removal
//! stays a simple traversal with no cycle risk.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubagentError {
    #[error("parent session {0} not found")]
    ParentNotFound(Uuid),
    #[error("max subagent depth exceeded for parent {0}")]
    DepthExceeded(Uuid),
    #[error("session {0} is already registered")]
    AlreadyRegistered(Uuid),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<Uuid>,
    depth: u32,
    children: Vec<Uuid>,
}

/// Tracks a forest of session trees, each rooted at a top-level session.
pub struct SubagentTracker {
    max_depth: u32,
    nodes: Arc<RwLock<HashMap<Uuid, Node>>>,
}

impl SubagentTracker {
    /// `max_depth` must be at least 1.
    pub fn new(max_depth: u32) -> Self {
        assert!(max_depth >= 1, "max_depth must be at least 1");
        Self {
            max_depth,
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a depth-0 root session.
    pub async fn register_root(&self, id: Uuid) -> Result<(), SubagentError> {
        let mut guard = self.nodes.write().await;
        if guard.contains_key(&id) {
            return Err(SubagentError::AlreadyRegistered(id));
        }
        guard.insert(
            id,
            Node {
                parent: None,
                depth: 0,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Register `child_id` as a subagent of `parent_id`.
    pub async fn register_sub(&self, parent_id: Uuid, child_id: Uuid) -> Result<(), SubagentError> {
        let mut guard = self.nodes.write().await;
        if guard.contains_key(&child_id) {
            return Err(SubagentError::AlreadyRegistered(child_id));
        }
        let parent_depth = {
            let parent = guard.get(&parent_id).ok_or(SubagentError::ParentNotFound(parent_id))?;
            if parent.depth >= self.max_depth {
                return Err(SubagentError::DepthExceeded(parent_id));
            }
            parent.depth
        };
        guard.insert(
            child_id,
            Node {
                parent: Some(parent_id),
                depth: parent_depth + 1,
                children: Vec::new(),
            },
        );
        guard.get_mut(&parent_id).unwrap().children.push(child_id);
        Ok(())
    }

    /// Whether `id` exists and has not yet reached the depth limit.
    pub async fn can_spawn(&self, id: Uuid) -> bool {
        let guard = self.nodes.read().await;
        guard.get(&id).map(|n| n.depth < self.max_depth).unwrap_or(false)
    }

    pub async fn depth(&self, id: Uuid) -> Option<u32> {
        self.nodes.read().await.get(&id).map(|n| n.depth)
    }

    /// All descendants of `id`, via depth-first traversal. Does not include
    /// `id` itself.
    pub async fn get_descendants(&self, id: Uuid) -> Vec<Uuid> {
        let guard = self.nodes.read().await;
        let mut out = Vec::new();
        let mut stack: Vec<Uuid> = guard.get(&id).map(|n| n.children.clone()).unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = guard.get(&next) {
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Walk parents from `id` to the root, terminating on the first orphan
    /// or unknown node. Returns `id` itself if it is already a root or
    /// unknown.
    pub async fn get_root(&self, id: Uuid) -> Uuid {
        let guard = self.nodes.read().await;
        let mut current = id;
        loop {
            match guard.get(&current).and_then(|n| n.parent) {
                Some(parent) if guard.contains_key(&parent) => current = parent,
                _ => return current,
            }
        }
    }

    /// Remove `id` and its entire subtree. If `id` has a parent, the parent's
    /// child list is also pruned.
    pub async fn remove(&self, id: Uuid) {
        let mut guard = self.nodes.write().await;
        let Some(node) = guard.get(&id).cloned() else {
            return;
        };

        if let Some(parent) = node.parent {
            if let Some(parent_node) = guard.get_mut(&parent) {
                parent_node.children.retain(|c| *c != id);
            }
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(removed) = guard.remove(&next) {
                stack.extend(removed.children);
            }
        }
    }
}
