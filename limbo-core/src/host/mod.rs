//! Host Interface
//!
//! The reconciler never touches a real tree. Every mutation goes through
//! the [`Host`] trait, which hands out opaque [`HostNode`] handles. A host
//! only has to support six primitives; ordering is expressed with anchors
//! ("insert after this sibling"), which is what the commit computes.

mod memory;

use std::fmt;

use thiserror::Error;

use crate::vnode::Props;

pub use memory::{HostOp, MemoryHost};

/// Opaque handle to a node owned by a [`Host`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostNode(u64);

impl HostNode {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for HostNode {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostNode({})", self.0)
    }
}

/// Failures reported by host mutation primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("unknown host node {0}")]
    UnknownNode(u64),

    #[error("anchor {anchor} is not a child of {parent}")]
    AnchorNotFound { parent: u64, anchor: u64 },

    #[error("node {node} is not a child of {parent}")]
    NotAChild { parent: u64, node: u64 },

    #[error("host node {0} is not a text node")]
    NotAText(u64),

    #[error("host node {0} cannot hold children or props")]
    NotAnElement(u64),
}

/// Mutation primitives the commit drives.
pub trait Host {
    /// Create a detached element node.
    fn create_element(&mut self, tag: &str) -> Result<HostNode, HostError>;

    /// Create a detached text node.
    fn create_text(&mut self, value: &str) -> Result<HostNode, HostError>;

    /// Apply the difference between `old` and `new` props. `old` is `None`
    /// the first time a node receives props. Listener props are only bound
    /// when `bind_listeners` is set, which the commit does on mount.
    fn apply_props(
        &mut self,
        node: HostNode,
        old: Option<&Props>,
        new: &Props,
        bind_listeners: bool,
    ) -> Result<(), HostError>;

    fn set_text(&mut self, node: HostNode, value: &str) -> Result<(), HostError>;

    /// Place `node` under `parent` right after `anchor`, or first if there
    /// is no anchor. A node that is already attached is moved.
    fn insert(
        &mut self,
        parent: HostNode,
        node: HostNode,
        anchor: Option<HostNode>,
    ) -> Result<(), HostError>;

    /// Detach `node` from `parent` and release it with its descendants.
    fn remove(&mut self, parent: HostNode, node: HostNode) -> Result<(), HostError>;
}
