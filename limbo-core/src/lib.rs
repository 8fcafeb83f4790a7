//! Limbo Core
//!
//! This crate provides the reconciliation runtime for the Limbo UI
//! framework. It implements:
//!
//! - A fiber tree that persists across renders and owns component state
//! - A resumable two-pass reconciler driven by a cooperative scheduler
//! - Keyed child diffing with composite keys
//! - A commit pipeline for host mutations, refs and effects
//! - Hooks (state, reducer, ref, memo, layout and passive effects)
//!
//! The host tree itself is abstracted behind the [`host::Host`] trait;
//! [`host::MemoryHost`] is an in-memory implementation used by the tests.
//!
//! # Architecture
//!
//! - `vnode`: descriptions (elements, text, lists) and their builders
//! - `fiber`: the fiber arena and composite child keys
//! - `hooks`: per-fiber hook stores and the render scope
//! - `reconciler`: the runtime, work loop, child diff and commit
//! - `scheduler`: the scheduler facade, local scheduler and async driver
//! - `host`: host mutation primitives
//!
//! # Example
//!
//! ```rust,ignore
//! use limbo_core::prelude::*;
//!
//! let counter = Component::new("Counter", |cx| {
//!     let (count, set_count) = cx.use_state(|| 0);
//!     Ok(h("button")
//!         .on("click", move |_| set_count.update(|n| n + 1))
//!         .child(text(count))
//!         .into())
//! });
//!
//! let mut host = MemoryHost::new();
//! let container = host.create_container();
//! let mut runtime = Runtime::new(host);
//!
//! runtime.render(component(&counter), container, None);
//! runtime.run_until_idle();
//! assert_eq!(runtime.host().to_markup(container), "<button>0</button>");
//! ```

pub mod config;
pub mod error;
pub mod fiber;
pub mod hooks;
pub mod host;
pub mod reconciler;
pub mod scheduler;
pub mod vnode;

pub use config::RuntimeConfig;
pub use error::{ConfigError, ReconcileError, RenderError, Result};
pub use reconciler::{Runtime, WorkOutcome};

/// Everything needed to describe and render a tree.
pub mod prelude {
    pub use crate::hooks::{Cleanup, RenderScope};
    pub use crate::host::{Host, HostNode, MemoryHost};
    pub use crate::reconciler::{Runtime, WorkOutcome};
    pub use crate::scheduler::{LocalScheduler, Scheduler, YieldPolicy};
    pub use crate::vnode::{
        clone_element, component, fragment, h, text, Component, Element, Node, NodeRef, Props,
    };
    pub use crate::RuntimeConfig;
}
