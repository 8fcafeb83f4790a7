//! Async driver.
//!
//! Runs a runtime's tasks on the current tokio task, yielding back to the
//! executor between slices so other tasks on the same thread make progress
//! while a long reconciliation is in flight.

use tracing::warn;

use super::Scheduler;
use crate::host::Host;
use crate::reconciler::{Runtime, WorkOutcome};

/// Drive `runtime` until it has no pending work. Returns the number of
/// passes finished.
///
/// Runtimes are not `Send`; run this on a current-thread runtime or inside a
/// `LocalSet`.
pub async fn drive<H, S>(runtime: &mut Runtime<H, S>) -> usize
where
    H: Host,
    S: Scheduler,
{
    let start = runtime.pass_count();
    let limit = runtime.config().max_passes_per_idle;
    while runtime.has_pending_work() {
        if runtime.pass_count() - start >= limit {
            warn!(limit, "pass limit reached; leaving remaining work queued");
            break;
        }
        if let WorkOutcome::Aborted(err) = runtime.run_task() {
            warn!(error = %err, "pass aborted while driving");
        }
        tokio::task::yield_now().await;
    }
    runtime.pass_count() - start
}
