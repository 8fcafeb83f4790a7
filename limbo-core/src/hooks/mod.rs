//! Hook Store
//!
//! Every component fiber owns a [`HookStore`]: an ordered list of cells
//! addressed by call order inside the render function. The cursor is reset
//! at the start of each render, so the n-th hook call of a render always
//! lands on the n-th cell of the previous render of the same fiber.
//!
//! # Available Hooks
//!
//! - [`RenderScope::use_state`] / [`RenderScope::use_reducer`]: state that
//!   survives re-renders; setting it queues a re-render of the fiber.
//! - [`RenderScope::use_ref`]: a mutable box that never triggers renders.
//! - [`RenderScope::use_memo`]: a value recomputed when its deps change.
//! - [`RenderScope::use_layout_effect`] / [`RenderScope::use_effect`]:
//!   effects run by the commit, synchronously or deferred.
//!
//! # Example
//!
//! ```rust,ignore
//! let counter = Component::new("Counter", |cx| {
//!     let (count, set_count) = cx.use_state(|| 0);
//!     cx.use_effect(count, move || {
//!         tracing::info!(count, "counter changed");
//!         None
//!     });
//!     Ok(h("button")
//!         .on("click", move |_| set_count.update(|n| n + 1))
//!         .child(text(count))
//!         .into())
//! });
//! ```
//!
//! # Order
//!
//! Calling hooks conditionally breaks the positional mapping. The scope
//! detects a cell of the wrong kind (or a render that calls fewer hooks
//! than the previous one) and the reconciler aborts the pass with
//! [`ReconcileError::HookOrderViolation`].

mod effect;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::ReconcileError;
use crate::fiber::FiberId;
use crate::vnode::{Children, Props};

pub use effect::{Cleanup, EffectPhase};
pub(crate) use effect::{flush_effects, panic_message, run_cleanup, PendingEffect};

use effect::{CleanupSlot, EffectCell};

/// Fibers whose state changed since the last pass. Shared between the
/// runtime and every setter it hands out; setters only record, the runtime
/// schedules.
#[derive(Clone, Default)]
pub struct UpdateSink(Rc<RefCell<IndexSet<FiberId>>>);

impl UpdateSink {
    pub(crate) fn push(&self, fiber: FiberId) {
        self.0.borrow_mut().insert(fiber);
    }

    pub(crate) fn drain(&self) -> Vec<FiberId> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

impl fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.borrow().iter()).finish()
    }
}

enum HookCell {
    State(Rc<dyn Any>),
    Ref(Rc<dyn Any>),
    Memo { deps: Box<dyn Any>, value: Box<dyn Any> },
    Effect(EffectCell),
}

impl HookCell {
    fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Ref(_) => "ref",
            Self::Memo { .. } => "memo",
            Self::Effect(cell) => match cell.phase {
                EffectPhase::Layout => "layout effect",
                EffectPhase::Passive => "effect",
            },
        }
    }
}

/// Per-fiber hook cells plus the effects queued by the latest render.
#[derive(Default)]
pub struct HookStore {
    cells: Vec<HookCell>,
    cursor: usize,
    layout: SmallVec<[PendingEffect; 2]>,
    passive: SmallVec<[PendingEffect; 2]>,
    /// Cleared when the fiber is deleted; deferred effect bodies check it.
    alive: Rc<Cell<bool>>,
    renders: usize,
}

impl HookStore {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of completed renders of the owning fiber.
    pub fn render_count(&self) -> usize {
        self.renders
    }

    pub(crate) fn has_pending_effects(&self) -> bool {
        !self.layout.is_empty() || !self.passive.is_empty()
    }

    pub(crate) fn alive_flag(&self) -> Rc<Cell<bool>> {
        self.alive.clone()
    }

    fn begin_render(&mut self) {
        if self.renders == 0 {
            self.alive.set(true);
        }
        self.cursor = 0;
    }

    /// Queue an effect, replacing one left over for the same cell by a
    /// render whose pass never committed.
    fn queue_effect(&mut self, phase: EffectPhase, effect: PendingEffect) {
        let pending = match phase {
            EffectPhase::Layout => &mut self.layout,
            EffectPhase::Passive => &mut self.passive,
        };
        pending.retain(|queued| !Rc::ptr_eq(&queued.cleanup, &effect.cleanup));
        pending.push(effect);
    }

    pub(crate) fn take_layout(&mut self) -> SmallVec<[PendingEffect; 2]> {
        std::mem::take(&mut self.layout)
    }

    pub(crate) fn take_passive(&mut self) -> SmallVec<[PendingEffect; 2]> {
        std::mem::take(&mut self.passive)
    }

    /// Run and forget every stored cleanup; used when the fiber is deleted.
    pub(crate) fn unmount(&mut self) {
        self.alive.set(false);
        self.layout.clear();
        self.passive.clear();
        for cell in &self.cells {
            if let HookCell::Effect(effect) = cell {
                run_cleanup(&effect.cleanup);
            }
        }
    }
}

impl fmt::Debug for HookStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookStore")
            .field("cells", &self.cells.iter().map(HookCell::kind).collect::<Vec<_>>())
            .field("pending_layout", &self.layout.len())
            .field("pending_passive", &self.passive.len())
            .finish()
    }
}

/// Setter returned by [`RenderScope::use_state`].
pub struct StateSetter<T> {
    cell: Rc<RefCell<T>>,
    fiber: FiberId,
    sink: UpdateSink,
}

impl<T: 'static> StateSetter<T> {
    /// Replace the state and queue a re-render of the owning fiber.
    pub fn set(&self, value: T) {
        *self.cell.borrow_mut() = value;
        self.sink.push(self.fiber);
    }

    /// Compute the next state from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.cell.borrow());
        self.set(next);
    }
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            fiber: self.fiber,
            sink: self.sink.clone(),
        }
    }
}

impl<T> fmt::Debug for StateSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSetter").field("fiber", &self.fiber).finish()
    }
}

/// Dispatcher returned by [`RenderScope::use_reducer`].
pub struct Dispatch<S, A> {
    setter: StateSetter<S>,
    reducer: Rc<dyn Fn(&S, A) -> S>,
}

impl<S: 'static, A> Dispatch<S, A> {
    pub fn dispatch(&self, action: A) {
        let reducer = &self.reducer;
        self.setter.update(|state| reducer(state, action));
    }
}

impl<S, A> Clone for Dispatch<S, A> {
    fn clone(&self) -> Self {
        Self {
            setter: self.setter.clone(),
            reducer: self.reducer.clone(),
        }
    }
}

/// Mutable box returned by [`RenderScope::use_ref`].
pub type HookRef<T> = Rc<RefCell<T>>;

/// Everything a render function can see: its props, its children and the
/// hook store of its fiber.
pub struct RenderScope<'a> {
    fiber: FiberId,
    component: &'a str,
    props: &'a Props,
    children: &'a Children,
    hooks: &'a mut HookStore,
    sink: &'a UpdateSink,
    violation: Option<ReconcileError>,
}

impl<'a> RenderScope<'a> {
    pub(crate) fn new(
        fiber: FiberId,
        component: &'a str,
        props: &'a Props,
        children: &'a Children,
        hooks: &'a mut HookStore,
        sink: &'a UpdateSink,
    ) -> Self {
        hooks.begin_render();
        Self {
            fiber,
            component,
            props,
            children,
            hooks,
            sink,
            violation: None,
        }
    }

    pub fn fiber(&self) -> FiberId {
        self.fiber
    }

    pub fn props(&self) -> &Props {
        self.props
    }

    pub fn children(&self) -> &Children {
        self.children
    }

    /// Close the render, reporting a hook order violation if one occurred.
    pub(crate) fn finish(self) -> Result<(), ReconcileError> {
        if let Some(violation) = self.violation {
            return Err(violation);
        }
        if self.hooks.cursor < self.hooks.cells.len() {
            let expected = self.hooks.cells[self.hooks.cursor].kind();
            return Err(ReconcileError::HookOrderViolation {
                component: self.component.to_owned(),
                index: self.hooks.cursor,
                expected,
                found: "nothing",
            });
        }
        self.hooks.renders += 1;
        Ok(())
    }

    /// Move the cursor forward. Returns the claimed index and whether a
    /// cell of `kind` from a previous render sits there.
    fn advance(&mut self, kind: &'static str) -> (usize, bool) {
        let index = self.hooks.cursor;
        self.hooks.cursor += 1;
        let expected = match self.hooks.cells.get(index) {
            None => return (index, false),
            Some(cell) if cell.kind() == kind => return (index, true),
            Some(cell) => cell.kind(),
        };
        self.violate(index, expected, kind);
        (index, false)
    }

    fn violate(&mut self, index: usize, expected: &'static str, found: &'static str) {
        if self.violation.is_none() {
            self.violation = Some(ReconcileError::HookOrderViolation {
                component: self.component.to_owned(),
                index,
                expected,
                found,
            });
        }
    }

    /// Store `cell` at `index`. A render that already broke the hook order
    /// leaves the store untouched so the next correct render still matches.
    fn place(&mut self, index: usize, cell: HookCell) {
        if self.violation.is_some() {
            return;
        }
        if index < self.hooks.cells.len() {
            self.hooks.cells[index] = cell;
        } else {
            self.hooks.cells.push(cell);
        }
    }

    fn shared_cell<T: 'static>(
        &mut self,
        kind: &'static str,
        init: impl FnOnce() -> T,
    ) -> Rc<RefCell<T>> {
        let (index, reusable) = self.advance(kind);
        if reusable {
            let existing = match &self.hooks.cells[index] {
                HookCell::State(value) | HookCell::Ref(value) => Some(value.clone()),
                _ => None,
            };
            match existing.map(|value| value.downcast::<RefCell<T>>()) {
                Some(Ok(typed)) => return typed,
                _ => self.violate(index, kind, "a value of another type"),
            }
        }
        let typed = Rc::new(RefCell::new(init()));
        let shared: Rc<dyn Any> = typed.clone();
        let cell = if kind == "ref" {
            HookCell::Ref(shared)
        } else {
            HookCell::State(shared)
        };
        self.place(index, cell);
        typed
    }

    /// State that survives re-renders of this fiber.
    pub fn use_state<T>(&mut self, init: impl FnOnce() -> T) -> (T, StateSetter<T>)
    where
        T: Clone + 'static,
    {
        let cell = self.shared_cell("state", init);
        let value = cell.borrow().clone();
        let setter = StateSetter {
            cell,
            fiber: self.fiber,
            sink: self.sink.clone(),
        };
        (value, setter)
    }

    /// State updated through a reducer.
    pub fn use_reducer<S, A, R>(&mut self, reducer: R, init: impl FnOnce() -> S) -> (S, Dispatch<S, A>)
    where
        S: Clone + 'static,
        R: Fn(&S, A) -> S + 'static,
    {
        let (state, setter) = self.use_state(init);
        let dispatch = Dispatch {
            setter,
            reducer: Rc::new(reducer),
        };
        (state, dispatch)
    }

    /// A mutable box preserved across renders. Writing to it never queues
    /// a render.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> HookRef<T> {
        self.shared_cell("ref", init)
    }

    /// Recompute `compute` only when `deps` differs from the previous render.
    pub fn use_memo<T, D>(&mut self, deps: D, compute: impl FnOnce() -> T) -> T
    where
        T: Clone + 'static,
        D: PartialEq + 'static,
    {
        let (index, reusable) = self.advance("memo");
        if reusable {
            if let HookCell::Memo { deps: old, value } = &self.hooks.cells[index] {
                if let (Some(old), Some(value)) = (old.downcast_ref::<D>(), value.downcast_ref::<T>()) {
                    if *old == deps {
                        return value.clone();
                    }
                }
            }
        }
        let value = compute();
        self.place(
            index,
            HookCell::Memo {
                deps: Box::new(deps),
                value: Box::new(value.clone()),
            },
        );
        value
    }

    /// Queue `body` to run synchronously in the commit, after host
    /// mutations, whenever `deps` changed.
    pub fn use_layout_effect<D, F>(&mut self, deps: D, body: F)
    where
        D: PartialEq + 'static,
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.effect_hook(EffectPhase::Layout, deps, body);
    }

    /// Queue `body` to run after the commit, whenever `deps` changed.
    pub fn use_effect<D, F>(&mut self, deps: D, body: F)
    where
        D: PartialEq + 'static,
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.effect_hook(EffectPhase::Passive, deps, body);
    }

    fn effect_hook<D, F>(&mut self, phase: EffectPhase, deps: D, body: F)
    where
        D: PartialEq + 'static,
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        let kind = match phase {
            EffectPhase::Layout => "layout effect",
            EffectPhase::Passive => "effect",
        };
        let (index, reusable) = self.advance(kind);
        if self.violation.is_some() {
            return;
        }
        let existing = match self.hooks.cells.get_mut(index) {
            Some(HookCell::Effect(cell)) if reusable => Some(cell),
            _ => None,
        };
        let cleanup = match existing {
            Some(cell) => {
                if cell.deps.downcast_ref::<D>().is_some_and(|old| *old == deps) {
                    return;
                }
                cell.deps = Box::new(deps);
                cell.cleanup.clone()
            }
            None => {
                let cleanup = CleanupSlot::default();
                self.place(
                    index,
                    HookCell::Effect(EffectCell {
                        phase,
                        deps: Box::new(deps),
                        cleanup: cleanup.clone(),
                    }),
                );
                cleanup
            }
        };
        let pending = PendingEffect {
            body: Box::new(body),
            cleanup,
        };
        self.hooks.queue_effect(phase, pending);
    }
}
