//! Deferred placement settling.
//!
//! Placement notices are queued as they arrive and processed once, at the
//! start of the next `step`/`advance`, so that every node of a same-frame
//! group is in the graph before path identity is computed. Settling runs even
//! while the network is paused.

use crate::id::{NodeId, PathId};

// ---------------------------------------------------------------------------
// Notice enum
// ---------------------------------------------------------------------------

/// A notification whose path-identity work has not run yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A single node entered the graph.
    NodePlaced { node: NodeId },
    /// A run of nodes placed together, e.g. by dragging.
    GroupPlaced {
        nodes: Vec<NodeId>,
        start: NodeId,
        end: NodeId,
        explicit: Option<PathId>,
    },
    /// Links of these nodes changed (retarget, rotation, neighbour edits).
    Rewired { nodes: Vec<NodeId> },
}

// ---------------------------------------------------------------------------
// SettleQueue
// ---------------------------------------------------------------------------

/// A queue of notices waiting for the next settle step.
#[derive(Debug, Default)]
pub struct SettleQueue {
    pending: Vec<Notice>,
}

impl SettleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notice: Notice) {
        self.pending.push(notice);
    }

    /// Take every pending notice in submission order.
    pub fn drain(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.pending)
    }

    /// Drop all pending work. Returns `true` if anything was cancelled;
    /// cancelling an empty queue is a no-op.
    pub fn cancel(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        tracing::debug!(count = self.pending.len(), "cancelled pending settle work");
        self.pending.clear();
        true
    }

    /// Remove a node from every pending notice. Notices left with no nodes
    /// are dropped. A removed group anchor moves to the nearest surviving
    /// member at that end.
    pub fn forget(&mut self, node: NodeId) {
        self.pending.retain_mut(|notice| match notice {
            Notice::NodePlaced { node: n } => *n != node,
            Notice::GroupPlaced {
                nodes, start, end, ..
            } => {
                nodes.retain(|&n| n != node);
                if let (Some(&first), Some(&last)) = (nodes.first(), nodes.last()) {
                    if *start == node {
                        *start = first;
                    }
                    if *end == node {
                        *end = last;
                    }
                    true
                } else {
                    false
                }
            }
            Notice::Rewired { nodes } => {
                nodes.retain(|&n| n != node);
                !nodes.is_empty()
            }
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
