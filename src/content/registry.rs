//! Interactive element registry
//!
//! Tracks which nodes carry pointer listeners. Attach and detach are
//! idempotent so replayed mutation batches never stack listeners.

use std::collections::BTreeSet;

use super::dom::{Document, MutationRecord, NodeId};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryChanges {
    pub attached: Vec<NodeId>,
    pub detached: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct InteractiveRegistry {
    attached: BTreeSet<NodeId>,
}

impl InteractiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.attached.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.attached.iter().copied()
    }

    /// Returns false if the node already had listeners
    pub fn attach(&mut self, node: NodeId) -> bool {
        self.attached.insert(node)
    }

    /// Returns false if the node had no listeners
    pub fn detach(&mut self, node: NodeId) -> bool {
        self.attached.remove(&node)
    }

    /// Initial setup pass over the whole document
    pub fn scan(&mut self, doc: &Document) -> RegistryChanges {
        let mut changes = RegistryChanges::default();
        self.attach_subtree(doc, doc.root(), &mut changes);
        changes
    }

    /// Apply one batch of structural changes
    pub fn observe(&mut self, doc: &Document, records: &[MutationRecord]) -> RegistryChanges {
        let mut changes = RegistryChanges::default();
        for record in records {
            match record {
                MutationRecord::Added(node) => self.attach_subtree(doc, *node, &mut changes),
                MutationRecord::Removed(nodes) => {
                    for node in nodes {
                        if self.detach(*node) {
                            changes.detached.push(*node);
                        }
                    }
                }
            }
        }
        if !changes.attached.is_empty() || !changes.detached.is_empty() {
            log::debug!(
                "Interactive registry: +{} -{} ({} total)",
                changes.attached.len(),
                changes.detached.len(),
                self.len()
            );
        }
        changes
    }

    fn attach_subtree(&mut self, doc: &Document, node: NodeId, changes: &mut RegistryChanges) {
        for id in doc.subtree(node) {
            if doc.is_interactive(id) && self.attach(id) {
                changes.attached.push(id);
            }
        }
    }
}
