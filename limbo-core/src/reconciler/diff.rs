//! Child diff.
//!
//! Matches the keyed map of a fiber's current children against a new child
//! description. An old child survives only if the new description at the
//! same composite key has the same type; everything else is deleted and
//! rebuilt. The new `child`/`sibling` chain follows the description order.

use indexmap::IndexMap;

use super::Runtime;
use crate::error::Result;
use crate::fiber::{build_key_map, ChildDesc, ChildSet, EffectTag, Fiber, FiberId};
use crate::host::Host;
use crate::scheduler::Scheduler;

impl<H: Host, S: Scheduler> Runtime<H, S> {
    pub(super) fn reconcile_children(&mut self, parent: FiberId, children: ChildSet<'_>) -> Result<()> {
        let descs = build_key_map(parent, children)?;

        let parent_fiber = self.fibers.fiber_mut(parent)?;
        let parent_host = if parent_fiber.is_host() {
            Some(parent)
        } else {
            parent_fiber.parent_host
        };
        let mut old = std::mem::take(&mut parent_fiber.kids);

        let mut doomed = Vec::new();
        old.retain(|key, &mut id| {
            let reusable = match (descs.get(key), self.fibers.get(id)) {
                (Some(desc), Some(fiber)) => fiber.ty.matches(desc),
                _ => false,
            };
            if !reusable {
                doomed.push(id);
            }
            reusable
        });
        for id in doomed {
            self.mark_deletion(id)?;
        }

        let mut kids = IndexMap::with_capacity(descs.len());
        let mut previous: Option<FiberId> = None;
        for (key, desc) in descs {
            let id = match old.swap_remove(&key) {
                Some(id) => {
                    self.reuse_fiber(id, &desc)?;
                    id
                }
                None => self.fibers.insert(Fiber::from_desc(key.clone(), &desc)),
            };

            let fiber = self.fibers.fiber_mut(id)?;
            fiber.parent = Some(parent);
            fiber.parent_host = parent_host;
            fiber.sibling = None;
            match previous {
                Some(previous) => self.fibers.fiber_mut(previous)?.sibling = Some(id),
                None => self.fibers.fiber_mut(parent)?.child = Some(id),
            }
            previous = Some(id);
            kids.insert(key, id);
        }

        let parent_fiber = self.fibers.fiber_mut(parent)?;
        if previous.is_none() {
            parent_fiber.child = None;
        }
        parent_fiber.kids = kids;
        Ok(())
    }

    /// Carry a new description into a fiber that keeps its identity.
    fn reuse_fiber(&mut self, id: FiberId, desc: &ChildDesc<'_>) -> Result<()> {
        let fiber = self.fibers.fiber_mut(id)?;
        let changed = match desc {
            ChildDesc::Text(value) => {
                let changed = fiber.value.as_deref() != Some(*value);
                if changed {
                    fiber.value = Some((*value).to_owned());
                }
                changed
            }
            ChildDesc::Element(element) => {
                let ref_changed = match (&fiber.node_ref, &element.node_ref) {
                    (None, None) => false,
                    (Some(old), Some(new)) => !old.ptr_eq(new),
                    _ => true,
                };
                fiber.key = element.key.clone();
                fiber.props = element.props.clone();
                fiber.children = element.children.clone();
                fiber.node_ref = element.node_ref.clone();
                let props_changed = !fiber
                    .old_props
                    .as_ref()
                    .is_some_and(|old| old.shallow_eq(&fiber.props));
                fiber.is_host() && (props_changed || ref_changed)
            }
        };
        // A fiber that never attached stays ADD; one left pending by an
        // aborted pass keeps its effect.
        if changed && fiber.effect == EffectTag::None {
            fiber.effect = EffectTag::Update;
        }
        Ok(())
    }

    /// Unlink a fiber and queue its subtree for removal.
    fn mark_deletion(&mut self, id: FiberId) -> Result<()> {
        let fiber = self.fibers.fiber_mut(id)?;
        fiber.effect = EffectTag::Delete;
        fiber.sibling = None;
        self.work.commit_queue.push(id);
        Ok(())
    }
}
