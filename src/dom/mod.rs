//! Host-owned document tree.
//!
//! Nodes live in a generational arena: a [`NodeId`] is a plain copyable handle that
//! never keeps a node alive, and once a node is freed its id stops resolving even if
//! the slot is reused. Structural and character-data changes are queued as
//! [`MutationRecord`]s while the document is observed.

mod markup;

use std::collections::VecDeque;

use anyhow::{anyhow, Context};

pub use markup::{parse_xhtml, write_xhtml};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Declaration {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Doctype(String),
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    CharacterData {
        target: NodeId,
    },
}

#[derive(Clone, Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Clone, Debug)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    observed: bool,
    records: VecDeque<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            observed: false,
            records: VecDeque::new(),
        };
        doc.root = doc.alloc(NodeData::Document);
        doc
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// First `body` element, falling back to the document root.
    #[must_use]
    pub fn body(&self) -> NodeId {
        self.find_element(self.root, "body").unwrap_or(self.root)
    }

    #[must_use]
    pub fn find_element(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if self.element_name(id).is_some_and(|n| n.eq_ignore_ascii_case(name)) {
                return Some(id);
            }
            stack.extend(self.children(id).iter().rev().copied());
        }
        None
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    #[must_use]
    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|n| &n.data)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Whether `id` is `ancestor` or lies somewhere beneath it.
    #[must_use]
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        if !self.contains(ancestor) {
            return false;
        }
        let mut cur = Some(id);
        while let Some(node) = cur {
            if node == ancestor {
                return true;
            }
            cur = self.parent(node);
        }
        false
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    #[must_use]
    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        match self.data(id)? {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Character data of a text node.
    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id)? {
            NodeData::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.data(id), Some(NodeData::Text(_)))
    }

    /// Concatenated text of every text node under `id`.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(text) = self.text(cur) {
                out.push_str(text);
            }
            stack.extend(self.children(cur).iter().rev().copied());
        }
        out
    }

    pub fn create_element(&mut self, name: impl Into<String>, attrs: Vec<(String, String)>) -> NodeId {
        self.alloc(NodeData::Element {
            name: name.into(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeData::Text(text.into()))
    }

    pub fn create_node(&mut self, data: NodeData) -> NodeId {
        self.alloc(data)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        let at = self.children(parent).len();
        self.insert_at(parent, child, at)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
    ) -> anyhow::Result<()> {
        let at = self
            .children(parent)
            .iter()
            .position(|c| *c == reference)
            .context("reference node is not a child of parent")?;
        self.insert_at(parent, child, at)
    }

    /// Detaches `child` from `parent` and frees its whole subtree.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(anyhow!("node is not a child of parent"));
        }
        self.detach(child)?;
        self.free_subtree(child);
        Ok(())
    }

    /// Replaces the character data of a text, comment or CDATA node.
    pub fn set_text(&mut self, id: NodeId, value: impl Into<String>) -> anyhow::Result<()> {
        let node = self.node_mut(id).context("set_text on a freed node")?;
        match &mut node.data {
            NodeData::Text(t) | NodeData::CData(t) | NodeData::Comment(t) => *t = value.into(),
            _ => return Err(anyhow!("set_text on a node without character data")),
        }
        self.record(MutationRecord::CharacterData { target: id });
        Ok(())
    }

    /// Starts queueing mutation records.
    pub fn observe(&mut self) {
        self.observed = true;
    }

    /// Stops queueing and drops anything pending.
    pub fn disconnect(&mut self) {
        self.observed = false;
        self.records.clear();
    }

    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub fn take_record(&mut self) -> Option<MutationRecord> {
        self.records.pop_front()
    }

    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    fn insert_at(&mut self, parent: NodeId, child: NodeId, at: usize) -> anyhow::Result<()> {
        if !self.contains(parent) || !self.contains(child) {
            return Err(anyhow!("insert with a freed node"));
        }
        if child == self.root {
            return Err(anyhow!("the document node cannot be inserted"));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(anyhow!("insert would create a cycle"));
        }
        let mut at = at;
        if let Some(old_parent) = self.parent(child) {
            if old_parent == parent {
                let old_pos = self.children(parent).iter().position(|c| *c == child);
                if old_pos.is_some_and(|p| p < at) {
                    at -= 1;
                }
            }
            self.detach(child)?;
        }
        let node = self.node_mut(parent).context("parent freed")?;
        let at = at.min(node.children.len());
        node.children.insert(at, child);
        if let Some(c) = self.node_mut(child) {
            c.parent = Some(parent);
        }
        self.record(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    fn detach(&mut self, child: NodeId) -> anyhow::Result<()> {
        let Some(parent) = self.parent(child) else {
            return Ok(());
        };
        let node = self.node_mut(parent).context("parent freed")?;
        node.children.retain(|c| *c != child);
        if let Some(c) = self.node_mut(child) {
            c.parent = None;
        }
        self.record(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![child],
        });
        Ok(())
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.parent(node) {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(slot) = self.slots.get_mut(cur.index as usize) else {
                continue;
            };
            if slot.generation != cur.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                stack.extend(node.children);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(cur.index);
        }
    }

    fn record(&mut self, rec: MutationRecord) {
        if self.observed {
            self.records.push_back(rec);
        }
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }
}
