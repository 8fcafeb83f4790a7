//! Reconciler
//!
//! The [`Runtime`] owns everything a reconciliation needs: the fiber arena,
//! the host, the scheduler and the work state of the pass in progress.
//! Nothing lives in globals, so several runtimes can coexist on one thread.
//!
//! # Passes
//!
//! A pass starts at a root fiber (after [`Runtime::render`]) or at a
//! component whose state changed. It walks the subtree below that fiber
//! in two visits per fiber:
//!
//! 1. **begin**: re-render or diff the fiber, descend into its first child
//! 2. **complete**: once a fiber has no child left to visit, move to its
//!    sibling, or climb to the parent and complete that one too
//!
//! The walk keeps its position in an explicit cursor rather than on the
//! call stack, so it can stop before any fiber and pick up there in the
//! next slice. Begin visits happen in pre-order and complete visits in
//! post-order however often the walk is interrupted.
//!
//! When the walk climbs back to the pass root, the commit queue gathered
//! along the way is flushed in one batch.

mod commit;
mod diff;

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, debug_span, trace, warn, Span};

use crate::config::RuntimeConfig;
use crate::error::{ReconcileError, Result};
use crate::fiber::{ChildSet, EffectTag, Fiber, FiberArena, FiberId, FiberTag, FiberType};
use crate::hooks::{panic_message, RenderScope, UpdateSink};
use crate::host::{Host, HostNode};
use crate::scheduler::{LocalScheduler, Scheduler, Task};
use crate::vnode::{Children, Node};

pub use commit::{CommitEntry, CommitRecord};

/// Callback fired once the pass it belongs to has committed.
pub type DoneCallback = Box<dyn FnOnce()>;

/// Result of one call to [`Runtime::reconcile_work`].
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    /// Nothing was queued.
    Idle,
    /// The slice ran out; the walk resumes at the cursor next time.
    Yielded,
    /// Every queued pass was committed.
    Committed,
    /// A pass failed and was abandoned. Later passes stay queued.
    Aborted(Rc<ReconcileError>),
}

impl WorkOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// A pass waiting in the update queue.
struct PendingPass {
    root: FiberId,
    /// New children for the root, written when the pass starts.
    children: Option<Children>,
    on_done: Option<DoneCallback>,
    /// Drop the root fiber once its (emptied) tree is committed.
    unmount: bool,
}

/// Interruption state of the work loop.
#[derive(Default)]
struct WorkState {
    update_queue: VecDeque<PendingPass>,
    commit_queue: Vec<FiberId>,
    /// Next fiber to begin; `None` between passes.
    cursor: Option<FiberId>,
    current: Option<PendingPass>,
    /// Last fiber the walk completed.
    commit_floor: Option<FiberId>,
    span: Option<Span>,
}

/// The reconciliation runtime for one host.
pub struct Runtime<H: Host, S: Scheduler = LocalScheduler> {
    config: RuntimeConfig,
    fibers: FiberArena,
    host: H,
    scheduler: S,
    work: WorkState,
    roots: HashMap<HostNode, FiberId>,
    updates: UpdateSink,
    last_commit: CommitRecord,
    last_error: Option<Rc<ReconcileError>>,
    passes: usize,
}

impl<H: Host> Runtime<H, LocalScheduler> {
    /// A runtime with the default config and a [`LocalScheduler`].
    pub fn new(host: H) -> Self {
        let config = RuntimeConfig::default();
        let scheduler = LocalScheduler::new(config.yield_policy());
        Self::with_scheduler(host, scheduler, config)
    }

    /// A runtime whose [`LocalScheduler`] follows `config`.
    pub fn with_config(host: H, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = LocalScheduler::new(config.yield_policy());
        Ok(Self::with_scheduler(host, scheduler, config))
    }
}

impl<H: Host, S: Scheduler> Runtime<H, S> {
    /// A runtime driven by a caller-supplied scheduler. `config` is used as
    /// is; only the pass limit applies to a custom scheduler.
    pub fn with_scheduler(host: H, scheduler: S, config: RuntimeConfig) -> Self {
        Self {
            config,
            fibers: FiberArena::new(),
            host,
            scheduler,
            work: WorkState::default(),
            roots: HashMap::new(),
            updates: UpdateSink::default(),
            last_commit: CommitRecord::default(),
            last_error: None,
            passes: 0,
        }
    }

    /// The config this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The host the tree is committed to.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the host, e.g. to drain its operation log.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The scheduler deciding when passes run and yield.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Every live fiber of every root.
    pub fn fibers(&self) -> &FiberArena {
        &self.fibers
    }

    /// Look up a fiber; `None` once it has been deleted.
    pub fn fiber(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    /// The root fiber rendered into `container`, if any.
    pub fn root(&self, container: HostNode) -> Option<FiberId> {
        self.roots.get(&container).copied()
    }

    /// What the most recent commit did.
    pub fn last_commit(&self) -> &CommitRecord {
        &self.last_commit
    }

    /// Error of the most recently aborted pass. Cleared by the next commit.
    pub fn last_error(&self) -> Option<&ReconcileError> {
        self.last_error.as_deref()
    }

    /// Passes finished so far, committed or aborted.
    pub fn pass_count(&self) -> usize {
        self.passes
    }

    /// Whether a pass is suspended mid-walk.
    pub fn is_suspended(&self) -> bool {
        self.work.cursor.is_some()
    }

    fn has_reconcile_work(&self) -> bool {
        self.work.cursor.is_some() || !self.work.update_queue.is_empty() || !self.updates.is_empty()
    }

    /// Whether anything is left to reconcile or run.
    pub fn has_pending_work(&self) -> bool {
        self.has_reconcile_work() || self.scheduler.has_pending()
    }

    /// Render `description` into `container`. The first render into a
    /// container creates its root fiber; later renders diff against it.
    /// `on_done` fires once this pass has committed.
    pub fn render(
        &mut self,
        description: impl Into<Node>,
        container: HostNode,
        on_done: Option<DoneCallback>,
    ) -> FiberId {
        let root = match self.roots.get(&container) {
            Some(&root) => root,
            None => {
                let root = self.fibers.insert(Fiber::root(container));
                self.roots.insert(container, root);
                debug!(container = container.raw(), ?root, "created root");
                root
            }
        };
        self.enqueue(PendingPass {
            root,
            children: Some(Children::from(vec![description.into()])),
            on_done,
            unmount: false,
        });
        self.scheduler.schedule_task(Task::default());
        root
    }

    /// Tear down everything rendered into `container`. Returns `false` if
    /// nothing was rendered there.
    pub fn unmount(&mut self, container: HostNode) -> bool {
        let Some(&root) = self.roots.get(&container) else {
            return false;
        };
        self.enqueue(PendingPass {
            root,
            children: Some(Children::default()),
            on_done: None,
            unmount: true,
        });
        self.scheduler.schedule_task(Task::default());
        true
    }

    /// Mark `fiber` dirty and queue a pass rooted at it.
    pub fn schedule_work(&mut self, fiber: FiberId) -> Result<()> {
        self.mark_dirty(fiber)?;
        self.scheduler.schedule_task(Task::default());
        Ok(())
    }

    fn mark_dirty(&mut self, fiber: FiberId) -> Result<()> {
        self.fibers.fiber_mut(fiber)?.dirty = true;
        self.enqueue(PendingPass {
            root: fiber,
            children: None,
            on_done: None,
            unmount: false,
        });
        Ok(())
    }

    /// Queue `pass`. A plain pass folds into the latest queued pass for the
    /// same root unless that one is an unmount.
    fn enqueue(&mut self, pass: PendingPass) {
        if pass.on_done.is_none() && !pass.unmount {
            let latest = self
                .work
                .update_queue
                .iter_mut()
                .rev()
                .find(|queued| queued.root == pass.root);
            if let Some(queued) = latest.filter(|queued| !queued.unmount) {
                if pass.children.is_some() {
                    queued.children = pass.children;
                }
                return;
            }
        }
        self.work.update_queue.push_back(pass);
    }

    /// Turn state updates recorded by setters into queued passes.
    fn drain_state_updates(&mut self) {
        for fiber in self.updates.drain() {
            if self.mark_dirty(fiber).is_err() {
                trace!(?fiber, "dropping update for unmounted fiber");
            }
        }
    }

    /// Run queued passes. Without `must_complete` the walk stops as soon as
    /// the scheduler asks it to yield.
    pub fn reconcile_work(&mut self, must_complete: bool) -> WorkOutcome {
        let mut committed = false;
        loop {
            let fiber = match self.work.cursor {
                Some(fiber) => fiber,
                None => {
                    self.drain_state_updates();
                    let Some(pass) = self.work.update_queue.pop_front() else {
                        break;
                    };
                    match self.start_pass(pass) {
                        Some(root) => root,
                        None => continue,
                    }
                }
            };
            self.work.cursor = Some(fiber);

            if !must_complete && self.scheduler.should_yield() {
                trace!(?fiber, floor = ?self.work.commit_floor, "yielding");
                return WorkOutcome::Yielded;
            }

            let step = {
                let _entered = self.work.span.clone().map(Span::entered);
                self.perform_unit_of_work(fiber)
            };
            match step {
                Ok(Some(next)) => self.work.cursor = Some(next),
                Ok(None) => {
                    self.work.cursor = None;
                    if let Err(err) = self.flush_commit() {
                        return self.abort_pass(err);
                    }
                    committed = true;
                }
                Err(err) => return self.abort_pass(err),
            }
        }
        if committed {
            WorkOutcome::Committed
        } else {
            WorkOutcome::Idle
        }
    }

    /// Make `pass` current and return the fiber to begin with, or `None`
    /// if its root no longer exists.
    fn start_pass(&mut self, mut pass: PendingPass) -> Option<FiberId> {
        let root = pass.root;
        let Some(fiber) = self.fibers.get_mut(root) else {
            trace!(?root, "skipping pass for removed fiber");
            return None;
        };
        if let Some(children) = pass.children.take() {
            fiber.children = children;
        }
        let span = debug_span!("pass", ?root);
        span.in_scope(|| debug!(unmount = pass.unmount, "starting pass"));
        self.seed_host_cursor(root);
        self.work.current = Some(pass);
        self.work.commit_queue.clear();
        self.work.commit_floor = None;
        self.work.span = Some(span);
        Some(root)
    }

    /// A pass that starts below its host parent must place new nodes after
    /// whatever host node precedes the pass root.
    fn seed_host_cursor(&mut self, root: FiberId) {
        let Some(parent_host) = self.fibers.get(root).and_then(|fiber| fiber.parent_host) else {
            return;
        };
        let preceding = self.fibers.preceding_host(root);
        if let Some(host) = self.fibers.get_mut(parent_host) {
            host.last_host_child = preceding;
            host.replacing = false;
        }
    }

    /// Abandon the current pass. Deletions already decided are applied,
    /// because their fibers are no longer linked anywhere; every other
    /// queued fiber keeps its effect and is committed by a later pass.
    fn abort_pass(&mut self, err: ReconcileError) -> WorkOutcome {
        let root = self.work.current.as_ref().map(|pass| pass.root);
        warn!(?root, error = %err, "aborting reconciliation pass");

        let queue = std::mem::take(&mut self.work.commit_queue);
        for id in queue {
            let is_delete = self.fibers.get(id).is_some_and(|fiber| fiber.effect == EffectTag::Delete);
            if is_delete {
                if let Err(err) = self.commit_deletion(id) {
                    warn!(fiber = ?id, error = %err, "failed to delete fiber of aborted pass");
                }
            }
        }

        self.work.cursor = None;
        self.work.current = None;
        self.work.commit_floor = None;
        self.work.span = None;
        self.passes += 1;

        let err = Rc::new(err);
        self.last_error = Some(err.clone());
        WorkOutcome::Aborted(err)
    }

    /// Begin `fiber`, then find the next fiber to begin. `None` means the
    /// pass root has been completed.
    fn perform_unit_of_work(&mut self, fiber: FiberId) -> Result<Option<FiberId>> {
        self.begin_work(fiber)?;
        if let Some(child) = self.fibers.fiber(fiber)?.child {
            return Ok(Some(child));
        }

        let root = self.work.current.as_ref().map(|pass| pass.root);
        let mut current = fiber;
        loop {
            self.complete_work(current)?;
            self.work.commit_floor = Some(current);
            if Some(current) == root {
                return Ok(None);
            }
            let completed = self.fibers.fiber(current)?;
            if let Some(sibling) = completed.sibling {
                return Ok(Some(sibling));
            }
            current = completed.parent.ok_or(ReconcileError::UnknownFiber(current))?;
        }
    }

    fn begin_work(&mut self, id: FiberId) -> Result<()> {
        let fiber = self.fibers.fiber(id)?;
        trace!(fiber = ?id, label = fiber.ty.label(), "begin");
        match fiber.tag() {
            FiberTag::Host => self.update_host(id)?,
            FiberTag::Component => self.update_component(id)?,
        }

        let fiber = self.fibers.fiber_mut(id)?;
        fiber.old_props = Some(fiber.props.clone());
        fiber.old_children = Some(fiber.children.clone());
        let pending_hooks = fiber.hooks.as_ref().is_some_and(|hooks| hooks.has_pending_effects());
        if fiber.effect != EffectTag::None || pending_hooks {
            self.work.commit_queue.push(id);
        }
        Ok(())
    }

    fn update_host(&mut self, id: FiberId) -> Result<()> {
        let fiber = self.fibers.fiber(id)?;
        if fiber.node.is_none() {
            let node = match &fiber.ty {
                FiberType::Element(tag) => self.host.create_element(tag)?,
                FiberType::Text => self.host.create_text(fiber.value.as_deref().unwrap_or_default())?,
                other => {
                    return Err(ReconcileError::TypeMismatch {
                        fiber: id,
                        expected: "host",
                        found: other.kind_name(),
                    })
                }
            };
            let fiber = self.fibers.fiber_mut(id)?;
            fiber.node = Some(node);
            fiber.applied_text = fiber.value.clone();
        }

        if let Some(parent_host) = self.fibers.fiber(id)?.parent_host {
            let host = self.fibers.fiber_mut(parent_host)?;
            let anchor = host.last_host_child.replace(id);
            let replacing = host.replacing;

            let fiber = self.fibers.fiber_mut(id)?;
            fiber.insert_position = anchor;
            let moved = fiber.attached && fiber.placed_after != anchor;
            if fiber.attached && fiber.effect == EffectTag::None && (moved || replacing) {
                fiber.effect = EffectTag::Update;
            }
            if moved {
                self.fibers.fiber_mut(parent_host)?.replacing = true;
            }
        }

        let fiber = self.fibers.fiber_mut(id)?;
        fiber.last_host_child = None;
        fiber.replacing = false;
        if matches!(fiber.ty, FiberType::Text) {
            return Ok(());
        }
        let children = fiber.children.clone();
        self.reconcile_children(id, ChildSet::List(children.as_slice()))
    }

    fn update_component(&mut self, id: FiberId) -> Result<()> {
        let fiber = self.fibers.fiber(id)?;
        let FiberType::Component(component) = &fiber.ty else {
            return Err(ReconcileError::TypeMismatch {
                fiber: id,
                expected: "component",
                found: fiber.ty.kind_name(),
            });
        };
        let props_changed = fiber.old_props.as_ref().map_or(true, |old| !old.shallow_eq(&fiber.props));
        let children_changed = fiber
            .old_children
            .as_ref()
            .map_or(true, |old| !old.shallow_eq(&fiber.children));
        if !(fiber.dirty || props_changed || children_changed) {
            trace!(fiber = ?id, "props unchanged, skipping render");
            return Ok(());
        }

        let component = component.clone();
        let props = fiber.props.clone();
        let children = fiber.children.clone();
        let mut hooks = self.fibers.fiber_mut(id)?.hooks.take().unwrap_or_default();

        // A panicking render aborts the pass like a failed one; the hook
        // store goes back on the fiber either way.
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut scope = RenderScope::new(id, component.name(), &props, &children, &mut hooks, &self.updates);
            let output = component.render(&mut scope);
            (output, scope.finish())
        }));
        self.fibers.fiber_mut(id)?.hooks = Some(hooks);

        let (output, finished) = match rendered {
            Ok(rendered) => rendered,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                (Err(format!("render panicked: {message}").into()), Ok(()))
            }
        };
        let output = output.map_err(|source| ReconcileError::Render {
            component: component.name().to_owned(),
            source,
        })?;
        finished?;

        self.reconcile_children(id, ChildSet::Single(&output))?;
        self.fibers.fiber_mut(id)?.dirty = false;
        Ok(())
    }

    fn complete_work(&mut self, id: FiberId) -> Result<()> {
        let fiber = self.fibers.fiber_mut(id)?;
        trace!(fiber = ?id, label = fiber.ty.label(), "complete");
        if fiber.is_host() {
            fiber.last_host_child = None;
            fiber.replacing = false;
        }
        Ok(())
    }

    /// Run one scheduler task: a slice of reconciliation followed by any
    /// planned work. Re-schedules the task if the slice yielded.
    pub fn run_task(&mut self) -> WorkOutcome {
        let task = match self.scheduler.next_task() {
            Some(task) => Some(task),
            None if self.has_reconcile_work() => Some(Task::default()),
            None => None,
        };
        let outcome = match task {
            Some(task) => {
                self.scheduler.begin_slice();
                let outcome = self.reconcile_work(task.must_complete);
                if matches!(outcome, WorkOutcome::Yielded) || !self.work.update_queue.is_empty() {
                    self.scheduler.schedule_task(task);
                }
                outcome
            }
            None => WorkOutcome::Idle,
        };
        self.run_planned_work();
        outcome
    }

    /// Reconcile and commit everything queued right now, ignoring the
    /// yield policy, then run planned work.
    pub fn flush_sync(&mut self) -> WorkOutcome {
        self.scheduler.begin_slice();
        let outcome = self.reconcile_work(true);
        self.run_planned_work();
        outcome
    }

    /// Run tasks until nothing is pending. Returns the number of passes
    /// finished. Stops early once `max_passes_per_idle` passes ran, which
    /// only happens when effects keep setting state.
    pub fn run_until_idle(&mut self) -> usize {
        let start = self.passes;
        while self.has_pending_work() {
            if self.passes - start >= self.config.max_passes_per_idle {
                warn!(
                    limit = self.config.max_passes_per_idle,
                    "pass limit reached; leaving remaining work queued"
                );
                break;
            }
            self.run_task();
        }
        self.passes - start
    }

    /// Run deferred closures handed to the scheduler, such as passive
    /// effects.
    pub fn run_planned_work(&mut self) {
        for work in self.scheduler.take_planned_work() {
            work();
        }
    }

    /// Indented dump of the fiber tree rendered into `container`: one line
    /// per fiber with its label, composite key, text and pending effect.
    pub fn tree_snapshot(&self, container: HostNode) -> Option<String> {
        let root = self.root(container)?;
        let mut out = String::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(fiber) = self.fibers.get(id) else {
                continue;
            };
            let _ = write!(out, "{:indent$}{}", "", fiber.ty.label(), indent = depth * 2);
            if let Some(slot) = &fiber.slot {
                let _ = write!(out, " [{slot}]");
            }
            if let Some(value) = &fiber.value {
                let _ = write!(out, " {value:?}");
            }
            if fiber.effect != EffectTag::None {
                let _ = write!(out, " ({:?})", fiber.effect);
            }
            out.push('\n');
            for child in self.fibers.children(id).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Some(out)
    }
}
