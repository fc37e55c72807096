use std::collections::HashMap;

use crate::dom::{Document, NodeId};

/// Remembers the pre-translation text of each text node the engine has seen.
///
/// Keys are generational node ids, so an entry never keeps a node alive and can never
/// be picked up by a different node that later reuses the slot. Once a node's original
/// is recorded it is not replaced while that node exists. Empty text is never recorded, so
/// a node that starts out empty takes its original from the first text it is given.
#[derive(Debug, Default)]
pub struct OriginalTextLedger {
    originals: HashMap<NodeId, String>,
}

impl OriginalTextLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `text` unless it is empty or `node` already has an original.
    /// Returns whether it recorded.
    pub fn remember(&mut self, node: NodeId, text: &str) -> bool {
        if text.is_empty() || self.originals.contains_key(&node) {
            return false;
        }
        self.originals.insert(node, text.to_string());
        true
    }

    #[must_use]
    pub fn get(&self, node: NodeId) -> Option<&str> {
        self.originals.get(&node).map(|s| s.as_str())
    }

    /// The remembered original, or `live` when nothing (or only empty text) was recorded.
    #[must_use]
    pub fn original_of<'a>(&'a self, node: NodeId, live: &'a str) -> &'a str {
        match self.get(node) {
            Some(original) if !original.is_empty() => original,
            _ => live,
        }
    }

    pub fn forget(&mut self, node: NodeId) -> Option<String> {
        self.originals.remove(&node)
    }

    pub fn clear(&mut self) {
        self.originals.clear();
    }

    /// Drops entries whose node has been freed. Returns how many were dropped.
    pub fn retain_live(&mut self, doc: &Document) -> usize {
        let before = self.originals.len();
        self.originals.retain(|id, _| doc.contains(*id));
        before - self.originals.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.originals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }
}
