//! Error Types
//!
//! Every failure inside a reconciliation pass is fatal for that pass: the
//! work loop stops, the partially built commit is discarded (deletions
//! excepted, see `Runtime::abort_pass`) and the completion callback of the
//! pass never fires.

use std::error::Error as StdError;

use thiserror::Error;

use crate::fiber::{ChildKey, FiberId};
use crate::host::HostError;

/// Boxed error returned by a component render function.
pub type RenderError = Box<dyn StdError + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A fiber was handled as the wrong kind, e.g. a component fiber reached
    /// the host mount path.
    #[error("fiber {fiber:?} is a {found} fiber, expected {expected}")]
    TypeMismatch {
        fiber: FiberId,
        expected: &'static str,
        found: &'static str,
    },

    /// A component's render function returned an error.
    #[error("component `{component}` failed to render")]
    Render {
        component: String,
        #[source]
        source: RenderError,
    },

    /// Hooks were called in a different order than in the previous render.
    #[error("component `{component}` called hook #{index} as {found}, previously {expected}")]
    HookOrderViolation {
        component: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// Two siblings produced the same composite key.
    #[error("duplicate child key {key} under fiber {parent:?}")]
    DuplicateKey { parent: FiberId, key: ChildKey },

    /// A child list was nested more than two levels deep.
    #[error("child lists may nest at most two levels (under fiber {parent:?})")]
    ChildNestingTooDeep { parent: FiberId },

    /// The fiber id does not refer to a live fiber.
    #[error("unknown fiber {0:?}")]
    UnknownFiber(FiberId),

    /// The runtime was built from an invalid config.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A host mutation primitive failed.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Errors produced while loading a [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("slice budget must be greater than zero")]
    ZeroSliceBudget,
}
