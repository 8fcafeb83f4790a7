//! Composite Child Keys
//!
//! A child's identity among its siblings is its nesting depth (0 for a
//! single child, 1 for an entry of a list, 2 for an entry of a list inside
//! a list), the index of the enclosing list entry at depth 2, and either its
//! explicit key or its position. Keyed entries therefore survive reorders,
//! while unkeyed entries in different nested lists never collide.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{ReconcileError, Result};
use crate::fiber::FiberId;
use crate::vnode::{Element, Key, Node};

/// Identity of a child within its parent's keyed map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildKey {
    depth: u8,
    outer: Option<usize>,
    slot: KeySlot,
}

/// Explicit key, or position for unkeyed children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySlot {
    Index(usize),
    Key(Key),
}

impl ChildKey {
    fn new(depth: u8, outer: Option<usize>, index: usize, key: Option<&str>) -> Self {
        let slot = match key {
            Some(key) => KeySlot::Key(key.to_owned()),
            None => KeySlot::Index(index),
        };
        Self { depth, outer, slot }
    }

    #[cfg(test)]
    pub(crate) fn from_test(index: usize) -> Self {
        Self::new(1, None, index, None)
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn slot(&self) -> &KeySlot {
        &self.slot
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.depth)?;
        if let Some(outer) = self.outer {
            write!(f, ".{outer}")?;
        }
        match &self.slot {
            KeySlot::Index(index) => write!(f, ".{index}"),
            KeySlot::Key(key) => write!(f, ":{key}"),
        }
    }
}

/// A child description that produces a fiber.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChildDesc<'a> {
    Element(&'a Element),
    Text(&'a str),
}

/// The shape of a child description handed to the diff.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChildSet<'a> {
    Single(&'a Node),
    List(&'a [Node]),
}

/// Flatten a child description into an ordered composite-key map.
pub(crate) fn build_key_map<'a>(
    parent: FiberId,
    children: ChildSet<'a>,
) -> Result<IndexMap<ChildKey, ChildDesc<'a>>> {
    let mut map = IndexMap::new();
    let nodes: &'a [Node] = match children {
        ChildSet::Single(Node::Fragment(nodes)) => nodes,
        ChildSet::List(nodes) => nodes,
        ChildSet::Single(node) => {
            insert_child(&mut map, parent, 0, None, 0, node)?;
            return Ok(map);
        }
    };
    for (index, node) in nodes.iter().enumerate() {
        match node {
            Node::Fragment(inner) => {
                for (inner_index, inner_node) in inner.iter().enumerate() {
                    if matches!(inner_node, Node::Fragment(_)) {
                        return Err(ReconcileError::ChildNestingTooDeep { parent });
                    }
                    insert_child(&mut map, parent, 2, Some(index), inner_index, inner_node)?;
                }
            }
            node => insert_child(&mut map, parent, 1, None, index, node)?,
        }
    }
    Ok(map)
}

fn insert_child<'a>(
    map: &mut IndexMap<ChildKey, ChildDesc<'a>>,
    parent: FiberId,
    depth: u8,
    outer: Option<usize>,
    index: usize,
    node: &'a Node,
) -> Result<()> {
    let (key, desc) = match node {
        Node::Element(element) => (
            ChildKey::new(depth, outer, index, element.key.as_deref()),
            ChildDesc::Element(element),
        ),
        Node::Text(value) => (
            ChildKey::new(depth, outer, index, None),
            ChildDesc::Text(value),
        ),
        Node::Empty | Node::Fragment(_) => return Ok(()),
    };
    if map.contains_key(&key) {
        return Err(ReconcileError::DuplicateKey { parent, key });
    }
    map.insert(key, desc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnode::{h, text};

    fn keys(children: ChildSet<'_>) -> Vec<String> {
        build_key_map(FiberId::default(), children)
            .unwrap()
            .keys()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn single_child_has_depth_zero() {
        let node: Node = h("div").into();
        assert_eq!(keys(ChildSet::Single(&node)), vec!["0.0"]);

        let keyed: Node = h("div").key("a").into();
        assert_eq!(keys(ChildSet::Single(&keyed)), vec!["0:a"]);
    }

    #[test]
    fn list_entries_use_key_or_position() {
        let nodes = vec![h("li").key("a").into(), text("x"), Node::Empty, h("li").into()];
        assert_eq!(keys(ChildSet::List(&nodes)), vec!["1:a", "1.1", "1.3"]);
    }

    #[test]
    fn nested_lists_do_not_collide() {
        let nodes = vec![
            Node::Fragment(vec![h("a").into(), h("b").into()]),
            Node::Fragment(vec![h("c").into(), h("d").key("k").into()]),
        ];
        assert_eq!(
            keys(ChildSet::List(&nodes)),
            vec!["2.0.0", "2.0.1", "2.1.0", "2.1:k"]
        );
    }

    #[test]
    fn fragment_as_single_child_is_a_list() {
        let node = Node::Fragment(vec![h("a").into(), h("b").into()]);
        assert_eq!(keys(ChildSet::Single(&node)), vec!["1.0", "1.1"]);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let nodes = vec![h("li").key("a").into(), h("li").key("a").into()];
        let err = build_key_map(FiberId::default(), ChildSet::List(&nodes)).unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateKey { .. }));
    }

    #[test]
    fn third_level_nesting_is_rejected() {
        let nodes = vec![Node::Fragment(vec![Node::Fragment(vec![h("a").into()])])];
        let err = build_key_map(FiberId::default(), ChildSet::List(&nodes)).unwrap_err();
        assert!(matches!(err, ReconcileError::ChildNestingTooDeep { .. }));
    }
}
