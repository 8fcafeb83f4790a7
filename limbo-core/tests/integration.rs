//! Integration Tests for the Reconciler
//!
//! These tests drive full passes through `Runtime` against `MemoryHost` and
//! check the host tree, the commit record and effect ordering.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use limbo_core::hooks::StateSetter;
use limbo_core::prelude::*;
use limbo_core::fiber::EffectTag;
use limbo_core::ReconcileError;

type Log = Rc<RefCell<Vec<String>>>;

fn setup(policy: YieldPolicy) -> (Runtime<MemoryHost>, HostNode) {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let runtime = Runtime::with_scheduler(host, LocalScheduler::new(policy), RuntimeConfig::default());
    (runtime, container)
}

fn prop_n(cx: &RenderScope<'_>) -> i64 {
    cx.props().value("n").and_then(Value::as_i64).unwrap_or(0)
}

/// An effect body that logs `label` and returns a cleanup logging it too.
fn logged(log: &Log, label: String) -> impl FnOnce() -> Option<Cleanup> + 'static {
    let log = log.clone();
    move || {
        log.borrow_mut().push(label.clone());
        let log = log.clone();
        Some(Cleanup::new(move || log.borrow_mut().push(format!("cleanup {label}"))))
    }
}

/// A component with one layout and one passive effect keyed on prop `n`,
/// rendering `child` (or a span) below it.
fn effectful(name: &'static str, log: &Log, child: Option<Component>) -> Component {
    let log = log.clone();
    Component::new(name, move |cx| {
        let n = prop_n(cx);
        cx.use_layout_effect(n, logged(&log, format!("layout {name}")));
        cx.use_effect(n, logged(&log, format!("passive {name}")));
        Ok(match &child {
            Some(child) => component(child).prop("n", n).into(),
            None => h("span").child(text(n)).into(),
        })
    })
}

fn keyed_list(keys: &[&str]) -> Node {
    h("ul")
        .children(keys.iter().map(|key| h("li").key(*key).child(text(key))))
        .into()
}

/// Test that rendering an equal description twice commits nothing.
#[test]
fn rendering_twice_is_idempotent() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let counter = Rc::new(Cell::new(0));
    let renders = counter.clone();
    let label = Component::new("Label", move |cx| {
        renders.set(renders.get() + 1);
        let value = cx.props().value("text").and_then(Value::as_str).unwrap_or_default().to_owned();
        Ok(h("label").child(text(value)).into())
    });
    let describe = || h("form").child(component(&label).prop("text", "name")).child(keyed_list(&["a", "b"]));

    rt.render(describe(), container, None);
    rt.run_until_idle();
    let markup = rt.host().to_markup(container);
    let snapshot = rt.tree_snapshot(container);
    rt.host_mut().take_ops();

    rt.render(describe(), container, None);
    rt.run_until_idle();

    assert!(rt.last_commit().is_empty());
    assert!(rt.host().ops().is_empty());
    assert_eq!(rt.host().to_markup(container), markup);
    assert_eq!(rt.tree_snapshot(container), snapshot);
    assert_eq!(counter.get(), 1);
}

/// Test that keyed children keep their host nodes when reordered.
#[test]
fn keyed_reorder_keeps_host_nodes() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    rt.render(keyed_list(&["a", "b", "c", "d"]), container, None);
    rt.run_until_idle();
    let ul = rt.host().children(container)[0];
    let before = rt.host().children(ul);

    rt.render(keyed_list(&["c", "d", "a", "b"]), container, None);
    rt.run_until_idle();

    assert_eq!(
        rt.host().children(ul),
        vec![before[2], before[3], before[0], before[1]]
    );
    assert_eq!(
        rt.host().to_markup(container),
        "<ul><li>c</li><li>d</li><li>a</li><li>b</li></ul>"
    );
    assert_eq!(rt.last_commit().count(EffectTag::Add), 0);
    assert_eq!(rt.last_commit().count(EffectTag::Delete), 0);
    assert_eq!(rt.last_commit().count(EffectTag::Update), 4);
}

/// Test that swapping two keyed children re-places both.
#[test]
fn keyed_swap_updates_both_children() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    rt.render(keyed_list(&["a", "b"]), container, None);
    rt.run_until_idle();

    rt.render(keyed_list(&["b", "a"]), container, None);
    rt.run_until_idle();

    let updated: Vec<String> = rt.last_commit().entries().iter().map(ToString::to_string).collect();
    assert_eq!(updated, vec!["Update li [1:b]", "Update li [1:a]"]);
    assert_eq!(rt.host().to_markup(container), "<ul><li>b</li><li>a</li></ul>");
}

/// Test that removing and inserting keyed entries keeps the rest in place.
#[test]
fn keyed_insert_and_remove() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    rt.render(keyed_list(&["a", "b", "c"]), container, None);
    rt.run_until_idle();

    rt.render(keyed_list(&["x", "a", "c", "y"]), container, None);
    rt.run_until_idle();

    assert_eq!(
        rt.host().to_markup(container),
        "<ul><li>x</li><li>a</li><li>c</li><li>y</li></ul>"
    );
    assert_eq!(rt.last_commit().count(EffectTag::Delete), 1);
    assert_eq!(rt.last_commit().count(EffectTag::Add), 4);
}

/// Test that replacing a component type tears the old subtree down.
#[test]
fn type_change_replaces_subtree() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let log: Log = Rc::default();
    let first = effectful("First", &log, None);
    let second = Component::new("Second", |_| Ok(h("em").into()));

    rt.render(component(&first).prop("n", 1), container, None);
    rt.run_until_idle();
    let root = rt.root(container).unwrap();
    let old_child = rt.fibers().children(root)[0];
    log.borrow_mut().clear();

    rt.render(component(&second).prop("n", 1), container, None);
    rt.run_until_idle();

    assert!(rt.fiber(old_child).is_none());
    assert_eq!(rt.host().to_markup(container), "<em></em>");
    assert_eq!(*log.borrow(), vec!["cleanup layout First", "cleanup passive First"]);
}

/// Test that a component whose props are unchanged is not re-rendered.
#[test]
fn unchanged_props_skip_render() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let leaf_renders = Rc::new(Cell::new(0));
    let counter = leaf_renders.clone();
    let leaf = Component::new("Leaf", move |_| {
        counter.set(counter.get() + 1);
        Ok(h("i").into())
    });
    let setter: Rc<RefCell<Option<StateSetter<i64>>>> = Rc::default();
    let slot = setter.clone();
    let parent = Component::new("Parent", move |cx| {
        let (count, set_count) = cx.use_state(|| 0_i64);
        *slot.borrow_mut() = Some(set_count);
        Ok(h("div")
            .child(text(count))
            .child(component(&leaf).prop("fixed", true))
            .into())
    });

    rt.render(component(&parent), container, None);
    rt.run_until_idle();
    setter.borrow().as_ref().unwrap().set(5);
    rt.run_until_idle();

    assert_eq!(rt.host().to_markup(container), "<div>5<i></i></div>");
    assert_eq!(leaf_renders.get(), 1);

    // an explicit schedule forces the render even with equal props
    let root = rt.root(container).unwrap();
    let parent_fiber = rt.fibers().children(root)[0];
    let div = rt.fibers().children(parent_fiber)[0];
    let leaf_fiber = rt.fibers().children(div)[1];
    rt.schedule_work(leaf_fiber).unwrap();
    rt.run_until_idle();
    assert_eq!(leaf_renders.get(), 2);
}

/// Test the order of layout and passive effects across fibers.
#[test]
fn effects_run_in_commit_order() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let log: Log = Rc::default();
    let child = effectful("Child", &log, None);
    let parent = effectful("Parent", &log, Some(child));

    rt.render(component(&parent).prop("n", 1), container, None);
    rt.run_until_idle();
    assert_eq!(
        *log.borrow(),
        vec!["layout Parent", "layout Child", "passive Parent", "passive Child"]
    );
    log.borrow_mut().clear();

    rt.render(component(&parent).prop("n", 2), container, None);
    rt.run_until_idle();
    assert_eq!(
        *log.borrow(),
        vec![
            "cleanup layout Parent",
            "cleanup layout Child",
            "layout Parent",
            "layout Child",
            "cleanup passive Parent",
            "passive Parent",
            "cleanup passive Child",
            "passive Child",
        ]
    );
    assert_eq!(rt.host().to_markup(container), "<span>2</span>");
    log.borrow_mut().clear();

    // same deps: nothing runs
    rt.render(component(&parent).prop("n", 2), container, None);
    rt.run_until_idle();
    assert!(log.borrow().is_empty());
}

/// Test that passive effects are deferred until planned work runs.
#[test]
fn passive_effects_are_deferred() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let log: Log = Rc::default();
    let widget = effectful("Widget", &log, None);

    rt.render(component(&widget), container, None);
    rt.reconcile_work(true);
    assert_eq!(*log.borrow(), vec!["layout Widget"]);

    rt.run_planned_work();
    assert_eq!(*log.borrow(), vec!["layout Widget", "passive Widget"]);
}

/// Test that layout effects observe the committed host node through a ref.
#[test]
fn refs_are_set_before_layout_effects() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let seen = Rc::new(Cell::new(None));
    let observed = seen.clone();
    let field = Component::new("Field", move |cx| {
        let node_ref = cx.use_ref(NodeRef::new).borrow().clone();
        let observed = observed.clone();
        let current = node_ref.clone();
        cx.use_layout_effect((), move || {
            observed.set(current.current());
            None
        });
        Ok(h("input").node_ref(node_ref).into())
    });

    rt.render(component(&field), container, None);
    rt.run_until_idle();

    let input = rt.host().children(container)[0];
    assert_eq!(seen.get(), Some(input));
}

/// Test that a ref is cleared when its element is removed.
#[test]
fn refs_clear_on_delete() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let node_ref = NodeRef::new();

    rt.render(h("input").node_ref(node_ref.clone()), container, None);
    rt.run_until_idle();
    assert!(node_ref.current().is_some());

    rt.render(Node::Empty, container, None);
    rt.run_until_idle();
    assert_eq!(node_ref.current(), None);
    assert_eq!(rt.host().to_markup(container), "");
}

/// Test that swapping the ref of a kept element hands the node to the new ref.
#[test]
fn swapped_ref_receives_node() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let first = NodeRef::new();
    let second = NodeRef::new();

    rt.render(h("input").node_ref(first.clone()), container, None);
    rt.run_until_idle();
    let input = rt.host().children(container)[0];
    assert_eq!(first.current(), Some(input));

    rt.render(h("input").node_ref(second.clone()), container, None);
    rt.run_until_idle();

    assert_eq!(first.current(), None);
    assert_eq!(second.current(), Some(input));
    assert_eq!(rt.host().children(container), vec![input]);
}

fn app_tree(items: usize, order: &[&str]) -> Node {
    h("main")
        .child(h("h1").child(text("title")))
        .child(
            h("ul")
                .child(fragment(order.iter().map(|key| h("li").key(*key).child(text(key)))))
                .child(fragment((0..items).map(|i| h("li").prop("index", i as i64).child(text(i))))),
        )
        .child(text("footer"))
        .into()
}

fn run_to_completion(policy: YieldPolicy, steps: &[Node]) -> (String, String, CommitRecordView) {
    let (mut rt, container) = setup(policy);
    for step in steps {
        rt.render(step.clone(), container, None);
        rt.run_until_idle();
    }
    (
        rt.host().to_markup(container),
        rt.tree_snapshot(container).unwrap(),
        CommitRecordView {
            record: rt.last_commit().clone(),
            ops: rt.host().ops().to_vec(),
        },
    )
}

#[derive(Debug, PartialEq)]
struct CommitRecordView {
    record: limbo_core::reconciler::CommitRecord,
    ops: Vec<limbo_core::host::HostOp>,
}

/// Test that yielding after every N units produces the same result as an
/// uninterrupted run.
#[test]
fn interrupted_passes_match_uninterrupted() {
    let steps = [
        app_tree(3, &["a", "b", "c"]),
        app_tree(5, &["c", "a"]),
        app_tree(1, &["d", "c", "b", "a"]),
    ];
    let baseline = run_to_completion(YieldPolicy::Never, &steps);
    assert!(baseline.0.starts_with("<main><h1>title</h1><ul><li>d</li>"));

    for units in 1..=6 {
        let interrupted = run_to_completion(YieldPolicy::AfterUnits(units), &steps);
        assert_eq!(interrupted, baseline, "yielding after {units} units");
    }
}

/// Test that lists nested inside a list keep per-group identity.
#[test]
fn nested_lists_keep_identity_per_group() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    rt.render(app_tree(2, &["a"]), container, None);
    rt.run_until_idle();
    let main = rt.host().children(container)[0];
    let ul = rt.host().children(main)[1];
    let unkeyed_first = rt.host().children(ul)[1];

    rt.render(app_tree(2, &["z", "a"]), container, None);
    rt.run_until_idle();

    assert_eq!(rt.host().children(ul)[2], unkeyed_first);
    assert_eq!(
        rt.host().to_markup(ul),
        "<ul><li>z</li><li>a</li><li index=\"0\">0</li><li index=\"1\">1</li></ul>"
    );
}

/// Test that a state update re-renders only the owning component and places
/// its new nodes between the right siblings.
#[test]
fn state_update_places_nodes_between_siblings() {
    let (mut rt, container) = setup(YieldPolicy::AfterUnits(2));
    let setter: Rc<RefCell<Option<StateSetter<usize>>>> = Rc::default();
    let slot = setter.clone();
    let items = Component::new("Items", move |cx| {
        let (count, set_count) = cx.use_state(|| 1_usize);
        *slot.borrow_mut() = Some(set_count);
        Ok(fragment((0..count).map(|i| h("li").child(text(i)))))
    });
    let app_renders = Rc::new(Cell::new(0));
    let counter = app_renders.clone();
    let app = Component::new("App", move |_| {
        counter.set(counter.get() + 1);
        Ok(h("ol")
            .child(h("li").child(text("first")))
            .child(component(&items))
            .child(h("li").child(text("last")))
            .into())
    });

    rt.render(component(&app), container, None);
    rt.run_until_idle();
    assert_eq!(
        rt.host().to_markup(container),
        "<ol><li>first</li><li>0</li><li>last</li></ol>"
    );

    setter.borrow().as_ref().unwrap().set(3);
    rt.run_until_idle();
    assert_eq!(
        rt.host().to_markup(container),
        "<ol><li>first</li><li>0</li><li>1</li><li>2</li><li>last</li></ol>"
    );

    setter.borrow().as_ref().unwrap().set(0);
    rt.run_until_idle();
    assert_eq!(
        rt.host().to_markup(container),
        "<ol><li>first</li><li>last</li></ol>"
    );
    assert_eq!(app_renders.get(), 1);
}

/// Test that events dispatched through the host reach the latest handler
/// and the resulting state update is rendered.
#[test]
fn delegated_events_update_state() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let counter = Component::new("Counter", |cx| {
        let (count, set_count) = cx.use_state(|| 0_i64);
        Ok(h("button")
            .on("click", move |event| {
                let step = event.get("step").and_then(Value::as_i64).unwrap_or(1);
                set_count.update(|n| n + step);
            })
            .child(text(count))
            .into())
    });

    rt.render(component(&counter), container, None);
    rt.run_until_idle();
    let button = rt.host().children(container)[0];

    assert_eq!(rt.host().dispatch_event(button, "click", &Value::Null), 1);
    rt.run_until_idle();
    assert_eq!(rt.host().to_markup(container), "<button>1</button>");

    rt.host().dispatch_event(button, "click", &serde_json::json!({ "step": 10 }));
    rt.run_until_idle();
    assert_eq!(rt.host().to_markup(container), "<button>11</button>");
}

/// Test that a reducer dispatched twice before a pass renders once with
/// both actions applied.
#[test]
fn batched_reducer_updates() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let renders = Rc::new(Cell::new(0));
    let counter = renders.clone();
    let dispatch = Rc::new(RefCell::new(None));
    let slot = dispatch.clone();
    let todo = Component::new("Todo", move |cx| {
        counter.set(counter.get() + 1);
        let (items, push) = cx.use_reducer(
            |items: &Vec<String>, item: String| {
                let mut next = items.clone();
                next.push(item);
                next
            },
            Vec::new,
        );
        *slot.borrow_mut() = Some(push);
        Ok(h("ul").children(items.iter().map(|item| h("li").key(item.as_str()).child(text(item)))).into())
    });

    rt.render(component(&todo), container, None);
    rt.run_until_idle();
    {
        let dispatch = dispatch.borrow();
        let push = dispatch.as_ref().unwrap();
        push.dispatch("milk".to_owned());
        push.dispatch("eggs".to_owned());
    }
    rt.run_until_idle();

    assert_eq!(rt.host().to_markup(container), "<ul><li>milk</li><li>eggs</li></ul>");
    assert_eq!(renders.get(), 2);
}

/// Test that a hook order violation aborts the pass without firing the
/// completion callback, and that a later good render recovers.
#[test]
fn hook_order_violation_aborts_pass() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let swap = Rc::new(Cell::new(false));
    let flag = swap.clone();
    let flaky = Component::new("Flaky", move |cx| {
        if flag.get() {
            cx.use_ref(|| 0);
        } else {
            cx.use_state(|| 0);
        }
        Ok(h("p").child(text(prop_n(cx))).into())
    });
    rt.render(component(&flaky).prop("n", 1), container, None);
    rt.run_until_idle();

    swap.set(true);
    let done = Rc::new(Cell::new(false));
    let fired = done.clone();
    rt.render(
        component(&flaky).prop("n", 2),
        container,
        Some(Box::new(move || fired.set(true))),
    );
    let outcome = rt.flush_sync();

    assert!(matches!(outcome, WorkOutcome::Aborted(_)));
    assert!(!done.get());
    assert!(matches!(
        rt.last_error(),
        Some(ReconcileError::HookOrderViolation { index: 0, .. })
    ));
    assert_eq!(rt.host().to_markup(container), "<p>1</p>");

    swap.set(false);
    rt.render(component(&flaky).prop("n", 3), container, None);
    assert!(rt.flush_sync().is_committed());
    assert!(rt.last_error().is_none());
    assert_eq!(rt.host().to_markup(container), "<p>3</p>");
}

/// Test that deletions decided before a failure are still applied.
#[test]
fn aborted_pass_still_applies_deletions() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let broken = Component::new("Broken", |_| Err("unavailable".into()));
    rt.render(h("div").child(h("a").key("a")).child(h("b").key("b")), container, None);
    rt.run_until_idle();

    rt.render(h("div").child(component(&broken)), container, None);
    rt.run_until_idle();

    assert!(matches!(rt.last_error(), Some(ReconcileError::Render { .. })));
    assert_eq!(rt.host().to_markup(container), "<div></div>");
}

/// Test that a render queued behind an unmount mounts a fresh tree.
#[test]
fn render_queued_after_unmount_mounts_again() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    rt.render(h("div").child(text("old")), container, None);
    rt.run_until_idle();

    rt.unmount(container);
    rt.render(h("div").child(text("new")), container, None);
    rt.run_until_idle();

    assert_eq!(rt.host().to_markup(container), "<div>new</div>");
    let root = rt.root(container).unwrap();
    assert_eq!(rt.fibers().subtree(root).len(), 3);
    assert_eq!(rt.fibers().len(), 3);

    rt.render(h("div").child(text("new")), container, None);
    rt.run_until_idle();
    assert_eq!(rt.host().to_markup(container), "<div>new</div>");
    assert_eq!(rt.fibers().len(), 3);
}

/// Test that an unmount queued behind a render leaves nothing behind.
#[test]
fn unmount_queued_after_render_clears_everything() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    rt.render(h("p").child(text("x")), container, None);
    rt.unmount(container);
    rt.run_until_idle();

    assert_eq!(rt.host().to_markup(container), "");
    assert_eq!(rt.root(container), None);
    assert!(rt.fibers().is_empty());
}

/// Test that unmounting runs every cleanup and empties the container.
#[test]
fn unmount_runs_cleanups_and_clears_container() {
    let (mut rt, container) = setup(YieldPolicy::AfterUnits(3));
    let log: Log = Rc::default();
    let child = effectful("Child", &log, None);
    let parent = effectful("Parent", &log, Some(child));

    rt.render(component(&parent).prop("n", 1), container, None);
    rt.run_until_idle();
    log.borrow_mut().clear();

    assert!(rt.unmount(container));
    rt.run_until_idle();

    assert_eq!(
        *log.borrow(),
        vec![
            "cleanup layout Parent",
            "cleanup passive Parent",
            "cleanup layout Child",
            "cleanup passive Child",
        ]
    );
    assert!(rt.host().children(container).is_empty());
    assert_eq!(rt.root(container), None);
    assert!(rt.fibers().is_empty());
    assert!(!rt.unmount(container));
}

/// Test that passive effects of an unmounted fiber never run.
#[test]
fn passive_effects_skip_unmounted_fibers() {
    let (mut rt, container) = setup(YieldPolicy::Never);
    let log: Log = Rc::default();
    let widget = effectful("Widget", &log, None);

    rt.render(component(&widget), container, None);
    rt.reconcile_work(true);
    rt.unmount(container);
    rt.reconcile_work(true);
    rt.run_planned_work();

    assert_eq!(*log.borrow(), vec!["layout Widget", "cleanup layout Widget"]);
}

/// Test that an effect which keeps setting state is cut off by the pass
/// limit.
#[test]
fn runaway_updates_hit_the_pass_limit() {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let config = RuntimeConfig::from_json(r#"{ "max_passes_per_idle": 10, "yield_after_units": 4 }"#).unwrap();
    let mut rt = Runtime::with_config(host, config).unwrap();
    let ticker = Component::new("Ticker", |cx| {
        let (tick, set_tick) = cx.use_state(|| 0_u64);
        cx.use_effect(tick, move || {
            set_tick.set(tick + 1);
            None
        });
        Ok(text(tick))
    });

    rt.render(component(&ticker), container, None);
    let passes = rt.run_until_idle();

    assert_eq!(passes, 10);
    assert!(rt.has_pending_work());
}

/// Test that the completion callback of each render fires exactly once.
#[test]
fn each_render_callback_fires_once() {
    let (mut rt, container) = setup(YieldPolicy::AfterUnits(1));
    let fired = Rc::new(Cell::new(0));
    for step in 0..3 {
        let fired = fired.clone();
        rt.render(
            h("div").child(text(step)),
            container,
            Some(Box::new(move || fired.set(fired.get() + 1))),
        );
    }
    rt.run_until_idle();

    assert_eq!(fired.get(), 3);
    assert_eq!(rt.host().to_markup(container), "<div>2</div>");
}
