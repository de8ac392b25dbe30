//! Minimal document tree for the overlay content layer
//!
//! Structural changes are recorded like a DOM mutation observer would see
//! them and handed out in batches through [`Document::take_records`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// What a node is, as far as the overlay cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Root,
    Loading,
    ProgressBar,
    Dock,
    Widget { deadline_id: i64 },
    Timeline,
    WidgetPopup,
    CheckBox,
    ConfirmPopup,
    YesButton,
    NoButton,
    DonePopup,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub role: Role,
    /// The "interactive" marker: pointer over this node should capture input
    pub interactive: bool,
    pub hidden: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Element {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A batch entry for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    /// A subtree was attached under the document
    Added(NodeId),
    /// A subtree was removed; every node of it, root first
    Removed(Vec<NodeId>),
}

pub struct Document {
    nodes: HashMap<NodeId, Element>,
    root: NodeId,
    next_id: u32,
    records: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Element {
                role: Role::Root,
                interactive: false,
                hidden: false,
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            nodes,
            root,
            next_id: 1,
            records: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(&id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_interactive(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|e| e.interactive)
    }

    /// Create a node and append it under `parent`
    pub fn append(&mut self, parent: NodeId, role: Role, interactive: bool) -> Option<NodeId> {
        if !self.nodes.contains_key(&parent) {
            return None;
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Element {
                role,
                interactive,
                hidden: false,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        self.records.push(MutationRecord::Added(id));
        Some(id)
    }

    /// Remove `id` and its subtree. The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.root || !self.nodes.contains_key(&id) {
            return false;
        }

        let removed = self.subtree(id);
        if let Some(parent) = self.nodes.get(&id).and_then(|e| e.parent) {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != id);
            }
        }
        for node in &removed {
            self.nodes.remove(node);
        }
        self.records.push(MutationRecord::Removed(removed));
        true
    }

    pub fn set_hidden(&mut self, id: NodeId, hidden: bool) {
        if let Some(element) = self.nodes.get_mut(&id) {
            element.hidden = hidden;
        }
    }

    /// Reorder the children of `parent` to follow `order`; unknown ids are ignored
    pub fn reorder(&mut self, parent: NodeId, order: &[NodeId]) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            let mut sorted: Vec<NodeId> = order
                .iter()
                .copied()
                .filter(|id| p.children.contains(id))
                .collect();
            let rest: Vec<NodeId> = p
                .children
                .iter()
                .copied()
                .filter(|id| !sorted.contains(id))
                .collect();
            sorted.extend(rest);
            p.children = sorted;
        }
    }

    /// `id` and all of its descendants, pre-order
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(element) = self.nodes.get(&node) {
                out.push(node);
                stack.extend(element.children.iter().rev().copied());
            }
        }
        out
    }

    /// Whether `node` is `ancestor` or lies beneath it
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|e| e.parent);
        }
        false
    }

    /// Nearest node (self included) whose role matches
    pub fn closest(&self, node: NodeId, matches: impl Fn(&Role) -> bool) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            let element = self.nodes.get(&id)?;
            if matches(&element.role) {
                return Some(id);
            }
            current = element.parent;
        }
        None
    }

    /// Hand pending mutation records to the observer
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}
