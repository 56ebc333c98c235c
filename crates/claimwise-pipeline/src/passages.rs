use std::collections::HashMap;

use claimwise_core::TextNode;

/// Retrieved passages keyed by node id.
///
/// A node retrieved more than once is kept once, at the position of its
/// first retrieval; the later copy replaces its contents.
#[derive(Debug, Default)]
pub struct PassageSet {
    order: Vec<String>,
    nodes: HashMap<String, TextNode>,
}

impl PassageSet {
    /// Returns `true` if the node was not already present.
    pub fn insert(&mut self, node: TextNode) -> bool {
        let is_new = !self.nodes.contains_key(&node.id);
        if is_new {
            self.order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
        is_new
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Passage texts in collection order, separated by a blank line.
    pub fn joined(&self) -> String {
        self.iter()
            .map(|n| n.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Extend<TextNode> for PassageSet {
    fn extend<I: IntoIterator<Item = TextNode>>(&mut self, iter: I) {
        for node in iter {
            self.insert(node);
        }
    }
}
