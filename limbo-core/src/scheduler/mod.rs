//! Scheduler Facade
//!
//! The reconciler never decides on its own when to run. It asks a
//! [`Scheduler`] whether the current slice is used up, hands it deferred
//! closures (passive effects) and relies on it to call back with a
//! [`Task`].
//!
//! # Slices
//!
//! A slice starts with [`Scheduler::begin_slice`]. The reconciler asks
//! [`Scheduler::should_yield`] before every fiber it processes; a `true`
//! answer suspends the walk at that fiber, and the same task is scheduled
//! again to resume it.
//!
//! [`LocalScheduler`] keeps everything in local queues and leaves the
//! actual event loop to the caller: either `Runtime::run_until_idle`, or
//! [`drive`] on a tokio runtime.

mod driver;

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

pub use driver::drive;

/// A request to run reconciliation work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Task {
    /// Run until the queued work is committed, ignoring `should_yield`.
    pub must_complete: bool,
}

/// A closure deferred until after the current commit.
pub type PlannedWork = Box<dyn FnOnce()>;

/// Timing facade consumed by the runtime.
pub trait Scheduler {
    /// Ask to be called back with `task`.
    fn schedule_task(&mut self, task: Task);

    /// The next task to run, if any.
    fn next_task(&mut self) -> Option<Task>;

    /// Start a new time slice.
    fn begin_slice(&mut self);

    /// Whether the walk should suspend before the next fiber.
    fn should_yield(&mut self) -> bool;

    /// Defer `work` until after the current commit.
    fn plan_work(&mut self, work: PlannedWork);

    fn take_planned_work(&mut self) -> Vec<PlannedWork>;

    /// Whether tasks or planned work are waiting.
    fn has_pending(&self) -> bool;
}

/// When [`LocalScheduler`] ends a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldPolicy {
    /// After the slice has run for this long.
    Deadline(Duration),
    /// After this many fibers.
    AfterUnits(usize),
    /// Never; every task runs to completion.
    Never,
}

impl Default for YieldPolicy {
    fn default() -> Self {
        Self::Deadline(Duration::from_millis(5))
    }
}

/// Single-threaded scheduler backed by local queues.
pub struct LocalScheduler {
    policy: YieldPolicy,
    tasks: VecDeque<Task>,
    planned: VecDeque<PlannedWork>,
    slice_start: Instant,
    units: usize,
    slices: usize,
}

impl LocalScheduler {
    pub fn new(policy: YieldPolicy) -> Self {
        Self {
            policy,
            tasks: VecDeque::new(),
            planned: VecDeque::new(),
            slice_start: Instant::now(),
            units: 0,
            slices: 0,
        }
    }

    pub fn policy(&self) -> YieldPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: YieldPolicy) {
        self.policy = policy;
    }

    /// Number of slices started so far.
    pub fn slices(&self) -> usize {
        self.slices
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new(YieldPolicy::default())
    }
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("policy", &self.policy)
            .field("tasks", &self.tasks)
            .field("planned", &self.planned.len())
            .field("slices", &self.slices)
            .finish()
    }
}

impl Scheduler for LocalScheduler {
    fn schedule_task(&mut self, task: Task) {
        // One queued task covers all queued work; only the strongest
        // completion requirement matters.
        match self.tasks.back_mut() {
            Some(queued) => queued.must_complete |= task.must_complete,
            None => self.tasks.push_back(task),
        }
    }

    fn next_task(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    fn begin_slice(&mut self) {
        self.slice_start = Instant::now();
        self.units = 0;
        self.slices += 1;
    }

    fn should_yield(&mut self) -> bool {
        // Every slice processes at least one fiber.
        let exhausted = self.units > 0
            && match self.policy {
                YieldPolicy::Deadline(budget) => self.slice_start.elapsed() >= budget,
                YieldPolicy::AfterUnits(limit) => self.units >= limit,
                YieldPolicy::Never => false,
            };
        if !exhausted {
            self.units += 1;
        }
        exhausted
    }

    fn plan_work(&mut self, work: PlannedWork) {
        self.planned.push_back(work);
    }

    fn take_planned_work(&mut self) -> Vec<PlannedWork> {
        self.planned.drain(..).collect()
    }

    fn has_pending(&self) -> bool {
        !self.tasks.is_empty() || !self.planned.is_empty()
    }
}
