//! In-memory host used by tests, benches and demos.
//!
//! Keeps a node table, records every primitive call in an operation log and
//! implements delegated events: a listener prop is bound once, when the
//! node mounts, and dispatch always calls the handler found in the node's
//! current props.

use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use super::{Host, HostError, HostNode};
use crate::vnode::{Listener, PropValue, Props};

/// One recorded host primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateElement { node: HostNode, tag: String },
    CreateText { node: HostNode, value: String },
    SetProp { node: HostNode, name: String },
    RemoveProp { node: HostNode, name: String },
    SetText { node: HostNode, value: String },
    Insert { parent: HostNode, node: HostNode, anchor: Option<HostNode> },
    Remove { parent: HostNode, node: HostNode },
}

#[derive(Debug)]
enum NodeKind {
    Container,
    Element {
        tag: String,
        attributes: IndexMap<String, Value>,
        style: IndexMap<String, Value>,
        /// Latest props, consulted by event dispatch.
        props: Props,
        bound: IndexSet<String>,
    },
    Text(String),
}

#[derive(Debug)]
struct MemoryNode {
    kind: NodeKind,
    parent: Option<HostNode>,
    children: Vec<HostNode>,
}

impl MemoryNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: HashMap<HostNode, MemoryNode>,
    next_id: u64,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, kind: NodeKind) -> HostNode {
        self.next_id += 1;
        let node = HostNode(self.next_id);
        self.nodes.insert(node, MemoryNode::new(kind));
        node
    }

    fn node(&self, node: HostNode) -> Result<&MemoryNode, HostError> {
        self.nodes.get(&node).ok_or(HostError::UnknownNode(node.0))
    }

    fn node_mut(&mut self, node: HostNode) -> Result<&mut MemoryNode, HostError> {
        self.nodes.get_mut(&node).ok_or(HostError::UnknownNode(node.0))
    }

    /// A container to render into. Containers are never created by the
    /// reconciler itself.
    pub fn create_container(&mut self) -> HostNode {
        self.alloc(NodeKind::Container)
    }

    pub fn contains(&self, node: HostNode) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, node: HostNode) -> Vec<HostNode> {
        self.nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: HostNode) -> Option<HostNode> {
        self.nodes.get(&node)?.parent
    }

    pub fn tag(&self, node: HostNode) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn text(&self, node: HostNode) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn attribute(&self, node: HostNode, name: &str) -> Option<&Value> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Element { attributes, .. } => attributes.get(name),
            _ => None,
        }
    }

    pub fn style(&self, node: HostNode, name: &str) -> Option<&Value> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Element { style, .. } => style.get(name),
            _ => None,
        }
    }

    /// Every primitive call since the last [`take_ops`](Self::take_ops).
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Deliver `event` to `target` and its ancestors. Returns how many
    /// handlers ran.
    pub fn dispatch_event(&self, target: HostNode, event: &str, payload: &Value) -> usize {
        let prop = format!("on{event}");
        let mut handlers: Vec<Listener> = Vec::new();
        let mut current = Some(target);
        while let Some(node) = current.and_then(|id| self.nodes.get(&id)) {
            if let NodeKind::Element { props, bound, .. } = &node.kind {
                if bound.contains(event) {
                    handlers.extend(props.listener(&prop).cloned());
                }
            }
            current = node.parent;
        }
        for handler in &handlers {
            handler.call(payload);
        }
        handlers.len()
    }

    /// Serialize the subtree under `node` as markup. Containers render only
    /// their children.
    pub fn to_markup(&self, node: HostNode) -> String {
        let mut out = String::new();
        self.write_markup(node, &mut out);
        out
    }

    fn write_markup(&self, node: HostNode, out: &mut String) {
        let Some(entry) = self.nodes.get(&node) else {
            return;
        };
        match &entry.kind {
            NodeKind::Text(value) => out.push_str(value),
            NodeKind::Container => {
                for &child in &entry.children {
                    self.write_markup(child, out);
                }
            }
            NodeKind::Element { tag, attributes, style, .. } => {
                let _ = write!(out, "<{tag}");
                for (name, value) in attributes {
                    match value {
                        Value::Bool(true) => {
                            let _ = write!(out, " {name}");
                        }
                        Value::String(s) => {
                            let _ = write!(out, " {name}=\"{s}\"");
                        }
                        other => {
                            let _ = write!(out, " {name}=\"{other}\"");
                        }
                    }
                }
                if !style.is_empty() {
                    let rules: Vec<String> = style
                        .iter()
                        .map(|(key, value)| match value {
                            Value::String(s) => format!("{key}:{s}"),
                            other => format!("{key}:{other}"),
                        })
                        .collect();
                    let _ = write!(out, " style=\"{}\"", rules.join(";"));
                }
                out.push('>');
                for &child in &entry.children {
                    self.write_markup(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn detach(&mut self, node: HostNode) -> Result<(), HostError> {
        let Some(parent) = self.node(node)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|&child| child != node);
        self.node_mut(node)?.parent = None;
        Ok(())
    }

    fn release(&mut self, node: HostNode) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&current) {
                stack.extend(entry.children);
            }
        }
    }
}

/// Merge a style object key by key. Keys missing from `new` are removed.
fn merge_style(style: &mut IndexMap<String, Value>, new: Option<&Value>) {
    let Some(Value::Object(new)) = new else {
        style.clear();
        return;
    };
    style.retain(|key, _| new.contains_key(key));
    for (key, value) in new {
        if value.is_null() {
            style.shift_remove(key);
        } else {
            style.insert(key.clone(), value.clone());
        }
    }
}

impl Host for MemoryHost {
    fn create_element(&mut self, tag: &str) -> Result<HostNode, HostError> {
        let node = self.alloc(NodeKind::Element {
            tag: tag.to_owned(),
            attributes: IndexMap::new(),
            style: IndexMap::new(),
            props: Props::new(),
            bound: IndexSet::new(),
        });
        self.ops.push(HostOp::CreateElement {
            node,
            tag: tag.to_owned(),
        });
        Ok(node)
    }

    fn create_text(&mut self, value: &str) -> Result<HostNode, HostError> {
        let node = self.alloc(NodeKind::Text(value.to_owned()));
        self.ops.push(HostOp::CreateText {
            node,
            value: value.to_owned(),
        });
        Ok(node)
    }

    fn apply_props(
        &mut self,
        node: HostNode,
        old: Option<&Props>,
        new: &Props,
        bind_listeners: bool,
    ) -> Result<(), HostError> {
        let entry = self.nodes.get_mut(&node).ok_or(HostError::UnknownNode(node.0))?;
        let NodeKind::Element { attributes, style, props, bound, .. } = &mut entry.kind else {
            return Err(HostError::NotAnElement(node.0));
        };
        let mut log = Vec::new();
        for (name, value) in Props::changes(old, new) {
            match value {
                Some(PropValue::Listener(_)) => {
                    if bind_listeners {
                        if let Some(event) = name.strip_prefix("on") {
                            bound.insert(event.to_owned());
                        }
                    }
                }
                _ if name == "style" => {
                    merge_style(style, value.and_then(|v| match v {
                        PropValue::Value(value) => Some(value),
                        PropValue::Listener(_) => None,
                    }));
                    log.push(HostOp::SetProp { node, name: name.to_owned() });
                }
                Some(PropValue::Value(Value::Null | Value::Bool(false))) | None => {
                    if attributes.shift_remove(name).is_some() {
                        log.push(HostOp::RemoveProp { node, name: name.to_owned() });
                    }
                }
                Some(PropValue::Value(value)) => {
                    attributes.insert(name.to_owned(), value.clone());
                    log.push(HostOp::SetProp { node, name: name.to_owned() });
                }
            }
        }
        // Listeners present at mount are bound even when `old` already had them.
        if bind_listeners {
            for (name, value) in new.iter() {
                if let (PropValue::Listener(_), Some(event)) = (value, name.strip_prefix("on")) {
                    bound.insert(event.to_owned());
                }
            }
        }
        *props = new.clone();
        self.ops.extend(log);
        Ok(())
    }

    fn set_text(&mut self, node: HostNode, value: &str) -> Result<(), HostError> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Text(current) => {
                *current = value.to_owned();
            }
            _ => return Err(HostError::NotAText(node.0)),
        }
        self.ops.push(HostOp::SetText {
            node,
            value: value.to_owned(),
        });
        Ok(())
    }

    fn insert(
        &mut self,
        parent: HostNode,
        node: HostNode,
        anchor: Option<HostNode>,
    ) -> Result<(), HostError> {
        if matches!(self.node(parent)?.kind, NodeKind::Text(_)) {
            return Err(HostError::NotAnElement(parent.0));
        }
        self.node(node)?;
        self.detach(node)?;
        let siblings = &self.node(parent)?.children;
        let index = match anchor {
            None => 0,
            Some(anchor) => {
                let position = siblings.iter().position(|&child| child == anchor).ok_or(
                    HostError::AnchorNotFound {
                        parent: parent.0,
                        anchor: anchor.0,
                    },
                )?;
                position + 1
            }
        };
        self.node_mut(parent)?.children.insert(index, node);
        self.node_mut(node)?.parent = Some(parent);
        self.ops.push(HostOp::Insert { parent, node, anchor });
        Ok(())
    }

    fn remove(&mut self, parent: HostNode, node: HostNode) -> Result<(), HostError> {
        if self.node(node)?.parent != Some(parent) {
            return Err(HostError::NotAChild {
                parent: parent.0,
                node: node.0,
            });
        }
        self.detach(node)?;
        self.release(node);
        self.ops.push(HostOp::Remove { parent, node });
        Ok(())
    }
}
