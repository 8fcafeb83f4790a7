//! Commit pipeline.
//!
//! Runs once per completed pass, in this order:
//!
//! 1. mutations, in commit-queue order: DELETE, UPDATE, ADD, then refs
//! 2. layout effects: every pending cleanup, then every body
//! 3. passive effects, handed to the scheduler as planned work
//! 4. the pass's completion callback

use std::fmt;

use tracing::{debug, warn};

use super::Runtime;
use crate::error::Result;
use crate::fiber::{EffectTag, FiberId, FiberType};
use crate::hooks::{flush_effects, PendingEffect};
use crate::host::{Host, HostNode};
use crate::scheduler::Scheduler;

/// One mutation applied by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub label: String,
    pub slot: Option<String>,
    pub effect: EffectTag,
}

impl fmt::Display for CommitEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.effect, self.label)?;
        if let Some(slot) = &self.slot {
            write!(f, " [{slot}]")?;
        }
        Ok(())
    }
}

/// Mutations of the most recent commit, in the order they were applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitRecord {
    entries: Vec<CommitEntry>,
}

impl CommitRecord {
    pub fn entries(&self) -> &[CommitEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many entries carry `effect`.
    pub fn count(&self, effect: EffectTag) -> usize {
        self.entries.iter().filter(|entry| entry.effect == effect).count()
    }
}

impl<H: Host, S: Scheduler> Runtime<H, S> {
    pub(super) fn flush_commit(&mut self) -> Result<()> {
        let queue = std::mem::take(&mut self.work.commit_queue);
        let mut record = CommitRecord::default();

        for &id in &queue {
            let Some(fiber) = self.fibers.get(id) else {
                continue;
            };
            let effect = fiber.effect;
            let recorded = match effect {
                EffectTag::None => false,
                EffectTag::Delete => true,
                EffectTag::Update | EffectTag::Add => fiber.is_host(),
            };
            if recorded {
                record.entries.push(CommitEntry {
                    label: fiber.ty.label().to_owned(),
                    slot: fiber.slot.as_ref().map(ToString::to_string),
                    effect,
                });
            }
            match effect {
                EffectTag::None => {}
                EffectTag::Delete => self.commit_deletion(id)?,
                EffectTag::Update | EffectTag::Add => self.commit_placement(id)?,
            }
            if let Some(fiber) = self.fibers.get_mut(id) {
                fiber.effect = EffectTag::None;
            }
        }

        // Layout effects of every fiber: all cleanups, then all bodies.
        let mut layout: Vec<PendingEffect> = Vec::new();
        for &id in &queue {
            if let Some(hooks) = self.fibers.get_mut(id).and_then(|fiber| fiber.hooks.as_mut()) {
                layout.extend(hooks.take_layout());
            }
        }
        let layout_count = layout.len();
        flush_effects(layout);

        let mut passive_count = 0;
        for &id in &queue {
            let Some(hooks) = self.fibers.get_mut(id).and_then(|fiber| fiber.hooks.as_mut()) else {
                continue;
            };
            let passive = hooks.take_passive();
            if passive.is_empty() {
                continue;
            }
            passive_count += passive.len();
            let alive = hooks.alive_flag();
            self.scheduler.plan_work(Box::new(move || {
                if alive.get() {
                    flush_effects(passive.into_vec());
                }
            }));
        }

        debug!(
            mutations = record.len(),
            layout_effects = layout_count,
            passive_effects = passive_count,
            "committed"
        );
        self.last_commit = record;
        self.last_error = None;
        self.passes += 1;
        self.work.commit_floor = None;
        self.work.span = None;

        if let Some(pass) = self.work.current.take() {
            // A render queued after the unmount still needs the root.
            let requeued = self.work.update_queue.iter().any(|queued| queued.root == pass.root);
            if pass.unmount && !requeued {
                self.drop_root(pass.root);
            }
            if let Some(on_done) = pass.on_done {
                on_done();
            }
        }
        Ok(())
    }

    /// Forget an emptied root. A root that still has children is kept.
    fn drop_root(&mut self, root: FiberId) {
        match self.fibers.get(root) {
            Some(fiber) if !fiber.kids.is_empty() => {
                warn!(?root, "root still has children; keeping it registered");
                return;
            }
            Some(_) => {}
            None => return,
        }
        if let Some(fiber) = self.fibers.remove(root) {
            if let Some(container) = fiber.node {
                self.roots.remove(&container);
                debug!(container = container.raw(), "unmounted root");
            }
        }
    }

    fn parent_node(&self, id: FiberId) -> Option<HostNode> {
        let parent_host = self.fibers.get(id)?.parent_host?;
        self.fibers.get(parent_host)?.node
    }

    /// The node to insert after: the anchor recorded for `id`, skipping
    /// anchors that were never attached.
    fn resolve_anchor(&self, id: FiberId) -> Option<HostNode> {
        let mut anchor = self.fibers.get(id)?.insert_position;
        while let Some(candidate) = anchor {
            let fiber = self.fibers.get(candidate)?;
            if fiber.attached {
                return fiber.node;
            }
            anchor = fiber.insert_position;
        }
        None
    }

    /// Apply an ADD or UPDATE: write props or text, then place the node
    /// after its anchor.
    fn commit_placement(&mut self, id: FiberId) -> Result<()> {
        let fiber = self.fibers.fiber(id)?;
        if !fiber.is_host() || matches!(fiber.ty, FiberType::Root) {
            return Ok(());
        }
        let Some(node) = fiber.node else {
            return Ok(());
        };
        let mounting = !fiber.attached;

        if matches!(fiber.ty, FiberType::Text) {
            let value = fiber.value.clone().unwrap_or_default();
            if fiber.applied_text.as_deref() != Some(value.as_str()) {
                self.host.set_text(node, &value)?;
            }
            self.fibers.fiber_mut(id)?.applied_text = Some(value);
        } else {
            let props = fiber.props.clone();
            let applied = fiber.applied_props.clone();
            if mounting || !applied.as_ref().is_some_and(|old| old.shallow_eq(&props)) {
                self.host.apply_props(node, applied.as_ref(), &props, mounting)?;
            }
            self.fibers.fiber_mut(id)?.applied_props = Some(props);
        }

        let parent = self.parent_node(id);
        let anchor = self.resolve_anchor(id);
        if let Some(parent) = parent {
            self.host.insert(parent, node, anchor)?;
        }

        let fiber = self.fibers.fiber_mut(id)?;
        fiber.attached = parent.is_some();
        fiber.placed_after = fiber.insert_position;
        let swapped = match (&fiber.applied_ref, &fiber.node_ref) {
            (Some(old), Some(new)) => !old.ptr_eq(new),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if swapped {
            if let Some(old) = fiber.applied_ref.take() {
                old.set(None);
            }
        }
        if let Some(node_ref) = &fiber.node_ref {
            node_ref.set(Some(node));
        }
        fiber.applied_ref = fiber.node_ref.clone();
        Ok(())
    }

    /// Remove a deleted fiber's subtree: detach its outermost host nodes,
    /// run every stored cleanup, clear refs and free the fibers.
    pub(super) fn commit_deletion(&mut self, id: FiberId) -> Result<()> {
        let subtree = self.fibers.subtree(id);

        for &member in &subtree {
            if let Some(fiber) = self.fibers.get_mut(member) {
                if let Some(hooks) = fiber.hooks.as_mut() {
                    hooks.unmount();
                }
                if let Some(node_ref) = fiber.applied_ref.take() {
                    node_ref.set(None);
                }
            }
        }

        if let Some(parent) = self.parent_node(id) {
            for host in self.fibers.top_hosts(id) {
                let fiber = self.fibers.fiber(host)?;
                match fiber.node {
                    Some(node) if fiber.attached => self.host.remove(parent, node)?,
                    _ => {}
                }
            }
        }

        for member in subtree {
            self.fibers.remove(member);
        }
        Ok(())
    }
}
