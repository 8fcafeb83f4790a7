//! Effect Cells
//!
//! An effect cell remembers the dependencies of its last scheduled run and
//! the cleanup its body returned. Rendering never runs effects; it only
//! queues a [`PendingEffect`] on the hook store, which the commit drains.
//!
//! # Ordering
//!
//! For one flush, every cleanup runs before any body, and a cleanup only
//! runs if the previous body actually returned one.
//!
//! # Failure
//!
//! A body or cleanup that panics is caught and logged; the rest of the
//! flush still runs.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// A callable returned by an effect body, run before the next body of the
/// same cell or when its fiber is deleted.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self(Box::new(cleanup))
    }

    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// When an effect runs relative to the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectPhase {
    /// Synchronously, inside the commit, after host mutations.
    Layout,
    /// Deferred through the scheduler's planned-work queue.
    Passive,
}

pub(crate) type CleanupSlot = Rc<RefCell<Option<Cleanup>>>;
pub(crate) type EffectBody = Box<dyn FnOnce() -> Option<Cleanup>>;

/// Persistent state of one effect hook.
pub(crate) struct EffectCell {
    pub(crate) phase: EffectPhase,
    pub(crate) deps: Box<dyn Any>,
    pub(crate) cleanup: CleanupSlot,
}

impl fmt::Debug for EffectCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectCell")
            .field("phase", &self.phase)
            .field("has_cleanup", &self.cleanup.borrow().is_some())
            .finish()
    }
}

/// A body queued by a render, waiting for the commit.
pub(crate) struct PendingEffect {
    pub(crate) body: EffectBody,
    pub(crate) cleanup: CleanupSlot,
}

impl fmt::Debug for PendingEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingEffect")
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic".to_owned())
}

/// Run `f`, logging instead of unwinding if it panics.
fn guarded<T>(what: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "effect {what} panicked");
            None
        }
    }
}

/// Run the cleanup stored in `slot`, if any.
pub(crate) fn run_cleanup(slot: &CleanupSlot) {
    let cleanup = slot.borrow_mut().take();
    if let Some(cleanup) = cleanup {
        guarded("cleanup", || cleanup.run());
    }
}

/// Run the bodies, storing each returned cleanup in its slot.
pub(crate) fn run_bodies<I>(effects: I)
where
    I: IntoIterator<Item = PendingEffect>,
{
    for effect in effects {
        let PendingEffect { body, cleanup } = effect;
        let returned = guarded("body", body).flatten();
        *cleanup.borrow_mut() = returned;
    }
}

/// Cleanups first, then bodies.
pub(crate) fn flush_effects(effects: Vec<PendingEffect>) {
    for effect in &effects {
        run_cleanup(&effect.cleanup);
    }
    run_bodies(effects);
}
