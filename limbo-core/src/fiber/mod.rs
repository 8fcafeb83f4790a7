//! Fiber Model
//!
//! A fiber is the persistent unit of work behind one keyed position of the
//! rendered tree. Descriptions are thrown away after every render; fibers
//! stay, carrying the host node, the hook store and the keyed map of their
//! children from one pass to the next.
//!
//! # Storage
//!
//! Fibers live in a generational arena ([`FiberArena`]). Every relation
//! (`child`, `sibling`, `parent`, `parent_host`, `insert_position`) is a
//! [`FiberId`], never an owning reference, so the back-links of the tree
//! cannot form ownership cycles and a stale id simply fails to resolve.
//!
//! # Links
//!
//! `child`/`sibling` form a singly linked list that is rebuilt by the child
//! diff on every pass that touches the parent. `kids` is the keyed view of
//! the same children and is what the next diff compares against.

mod key;

use std::borrow::Cow;

use indexmap::IndexMap;
use slotmap::{new_key_type, SlotMap};

use crate::error::{ReconcileError, Result};
use crate::hooks::HookStore;
use crate::host::HostNode;
use crate::vnode::{Children, Component, ElementKind, Key, NodeRef, Props};

pub use key::{ChildKey, KeySlot};
pub(crate) use key::{build_key_map, ChildDesc, ChildSet};

new_key_type! {
    /// Identifier of a fiber in a [`FiberArena`].
    pub struct FiberId;
}

/// Which half of the reconciler handles a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberTag {
    /// Owns a host node: the root container, elements and text.
    Host,
    /// Runs a render function and owns a hook store.
    Component,
}

/// The type of a fiber. Reuse across passes requires equal types.
#[derive(Debug, Clone)]
pub enum FiberType {
    /// The container a tree is rendered into.
    Root,
    Element(Cow<'static, str>),
    Text,
    Component(Component),
}

impl FiberType {
    pub fn tag(&self) -> FiberTag {
        match self {
            Self::Component(_) => FiberTag::Component,
            Self::Root | Self::Element(_) | Self::Text => FiberTag::Host,
        }
    }

    /// Human readable label: the tag name, `#text`, `#root`, or the
    /// component name.
    pub fn label(&self) -> &str {
        match self {
            Self::Root => "#root",
            Self::Element(tag) => tag,
            Self::Text => "#text",
            Self::Component(component) => component.name(),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Element(_) => "element",
            Self::Text => "text",
            Self::Component(_) => "component",
        }
    }

    pub(crate) fn matches(&self, desc: &ChildDesc<'_>) -> bool {
        match (self, desc) {
            (Self::Text, ChildDesc::Text(_)) => true,
            (Self::Element(tag), ChildDesc::Element(element)) => {
                matches!(&element.kind, ElementKind::Host(other) if other == tag)
            }
            (Self::Component(component), ChildDesc::Element(element)) => {
                matches!(&element.kind, ElementKind::Component(other) if other.same_type(component))
            }
            _ => false,
        }
    }
}

/// The host mutation a commit must apply to a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectTag {
    #[default]
    None,
    Delete,
    Update,
    Add,
}

/// A persistent unit of work.
#[derive(Debug)]
pub struct Fiber {
    pub(crate) ty: FiberType,
    pub(crate) key: Option<Key>,
    /// Composite key under the parent; `None` for roots.
    pub(crate) slot: Option<ChildKey>,

    pub(crate) props: Props,
    pub(crate) children: Children,
    pub(crate) old_props: Option<Props>,
    pub(crate) old_children: Option<Children>,
    /// Props last applied to the host node.
    pub(crate) applied_props: Option<Props>,
    pub(crate) value: Option<String>,
    pub(crate) applied_text: Option<String>,

    pub(crate) node: Option<HostNode>,
    pub(crate) attached: bool,
    pub(crate) hooks: Option<HookStore>,
    pub(crate) node_ref: Option<NodeRef>,
    /// Ref that last received this fiber's node.
    pub(crate) applied_ref: Option<NodeRef>,

    pub(crate) dirty: bool,
    pub(crate) effect: EffectTag,

    pub(crate) kids: IndexMap<ChildKey, FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) parent: Option<FiberId>,
    pub(crate) parent_host: Option<FiberId>,

    /// Running "last host child" while this host fiber's children are
    /// being visited.
    pub(crate) last_host_child: Option<FiberId>,
    /// Set once a host child visited in this pass moved; every later host
    /// child is then re-placed too.
    pub(crate) replacing: bool,
    /// Placement anchor set during the walk.
    pub(crate) insert_position: Option<FiberId>,
    /// `insert_position` at the time of the last commit.
    pub(crate) placed_after: Option<FiberId>,
}

impl Fiber {
    fn blank(ty: FiberType) -> Self {
        Self {
            ty,
            key: None,
            slot: None,
            props: Props::new(),
            children: Children::default(),
            old_props: None,
            old_children: None,
            applied_props: None,
            value: None,
            applied_text: None,
            node: None,
            attached: false,
            hooks: None,
            node_ref: None,
            applied_ref: None,
            dirty: false,
            effect: EffectTag::None,
            kids: IndexMap::new(),
            child: None,
            sibling: None,
            parent: None,
            parent_host: None,
            last_host_child: None,
            replacing: false,
            insert_position: None,
            placed_after: None,
        }
    }

    /// A root fiber bound to an already existing container node.
    pub(crate) fn root(container: HostNode) -> Self {
        Self {
            node: Some(container),
            attached: true,
            ..Self::blank(FiberType::Root)
        }
    }

    /// A fresh fiber for a child description, marked ADD.
    pub(crate) fn from_desc(slot: ChildKey, desc: &ChildDesc<'_>) -> Self {
        let mut fiber = match desc {
            ChildDesc::Text(value) => Self {
                value: Some((*value).to_owned()),
                ..Self::blank(FiberType::Text)
            },
            ChildDesc::Element(element) => {
                let ty = match &element.kind {
                    ElementKind::Host(tag) => FiberType::Element(tag.clone()),
                    ElementKind::Component(component) => FiberType::Component(component.clone()),
                };
                let hooks = matches!(ty, FiberType::Component(_)).then(HookStore::default);
                Self {
                    key: element.key.clone(),
                    props: element.props.clone(),
                    children: element.children.clone(),
                    node_ref: element.node_ref.clone(),
                    hooks,
                    ..Self::blank(ty)
                }
            }
        };
        fiber.slot = Some(slot);
        fiber.effect = EffectTag::Add;
        fiber
    }

    /// Host or component.
    pub fn tag(&self) -> FiberTag {
        self.ty.tag()
    }

    /// The root, element, text or component type of this fiber.
    pub fn fiber_type(&self) -> &FiberType {
        &self.ty
    }

    /// Explicit key from the description, if one was given.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Composite key under the parent.
    pub fn slot(&self) -> Option<&ChildKey> {
        self.slot.as_ref()
    }

    /// Props of the latest description.
    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Value of a text fiber.
    pub fn text(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Host node, once created. It may not be attached yet.
    pub fn node(&self) -> Option<HostNode> {
        self.node
    }

    /// Whether a commit has inserted the node into its parent.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Whether a render of this fiber is forced on its next visit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mutation pending for the next commit.
    pub fn effect(&self) -> EffectTag {
        self.effect
    }

    /// First child in the current pass.
    pub fn child(&self) -> Option<FiberId> {
        self.child
    }

    /// Next sibling in the current pass.
    pub fn sibling(&self) -> Option<FiberId> {
        self.sibling
    }

    pub fn parent(&self) -> Option<FiberId> {
        self.parent
    }

    /// Nearest ancestor that owns a host node.
    pub fn parent_host(&self) -> Option<FiberId> {
        self.parent_host
    }

    /// Host sibling the node is placed after; `None` means first.
    pub fn insert_position(&self) -> Option<FiberId> {
        self.insert_position
    }

    /// Number of hook cells; zero for host fibers.
    pub fn hook_count(&self) -> usize {
        self.hooks.as_ref().map_or(0, HookStore::len)
    }

    pub(crate) fn is_host(&self) -> bool {
        self.tag() == FiberTag::Host
    }
}

/// Arena owning every fiber of a runtime.
#[derive(Debug, Default)]
pub struct FiberArena {
    fibers: SlotMap<FiberId, Fiber>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, fiber: Fiber) -> FiberId {
        self.fibers.insert(fiber)
    }

    pub(crate) fn remove(&mut self, id: FiberId) -> Option<Fiber> {
        self.fibers.remove(id)
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id)
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Like [`get`](Self::get), but a missing fiber is an error.
    pub(crate) fn fiber(&self, id: FiberId) -> Result<&Fiber> {
        self.fibers.get(id).ok_or(ReconcileError::UnknownFiber(id))
    }

    pub(crate) fn fiber_mut(&mut self, id: FiberId) -> Result<&mut Fiber> {
        self.fibers.get_mut(id).ok_or(ReconcileError::UnknownFiber(id))
    }

    /// Children of `id` in sibling order.
    pub fn children(&self, id: FiberId) -> Vec<FiberId> {
        let mut children = Vec::new();
        let mut next = self.get(id).and_then(|fiber| fiber.child);
        while let Some(child) = next {
            children.push(child);
            next = self.get(child).and_then(|fiber| fiber.sibling);
        }
        children
    }

    /// `id` and all of its descendants, in pre-order.
    pub fn subtree(&self, id: FiberId) -> Vec<FiberId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            order.push(current);
            let children = self.children(current);
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Last top-level host fiber inside the subtree of `id` (`id` itself if
    /// it is a host fiber).
    pub(crate) fn last_host_in(&self, id: FiberId) -> Option<FiberId> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let fiber = self.get(current)?;
            if fiber.is_host() {
                return Some(current);
            }
            stack.extend(self.children(current));
        }
        None
    }

    /// Outermost host fibers inside the subtree of `id`, in order. These are
    /// the nodes attached to the nearest host ancestor of `id`.
    pub(crate) fn top_hosts(&self, id: FiberId) -> Vec<FiberId> {
        let mut hosts = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(fiber) = self.get(current) else {
                continue;
            };
            if fiber.is_host() {
                hosts.push(current);
            } else {
                stack.extend(self.children(current).into_iter().rev());
            }
        }
        hosts
    }

    /// The host fiber that precedes `id` under its nearest host ancestor.
    pub(crate) fn preceding_host(&self, id: FiberId) -> Option<FiberId> {
        let mut current = id;
        loop {
            let parent = self.get(current)?.parent?;
            let siblings = self.children(parent);
            let position = siblings.iter().position(|&sibling| sibling == current)?;
            if let Some(found) = siblings[..position]
                .iter()
                .rev()
                .find_map(|&sibling| self.last_host_in(sibling))
            {
                return Some(found);
            }
            if self.get(parent)?.is_host() {
                return None;
            }
            current = parent;
        }
    }
}
