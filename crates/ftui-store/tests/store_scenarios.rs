//! End-to-end scenarios for the reactive store.
//!
//! Covers notification counts, bubbling order, stale-child teardown,
//! destruction cascades, re-entrant subscribers, and the diagnostics side
//! channel.

use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use ftui_store::{
    DiagnosticSink, Mapping, ReactiveNode, StoreConfig, StoreError, Subscription, Value,
};

// ── Helpers ───────────────────────────────────────────────────────────────

fn counter(node: &ReactiveNode) -> (Rc<Cell<u32>>, Subscription) {
    let count = Rc::new(Cell::new(0u32));
    let count_clone = Rc::clone(&count);
    let sub = node
        .subscribe(move || count_clone.set(count_clone.get() + 1))
        .unwrap();
    (count, sub)
}

fn recorder(
    node: &ReactiveNode,
    label: &'static str,
    log: &Rc<RefCell<Vec<&'static str>>>,
) -> Subscription {
    let log = Rc::clone(log);
    node.subscribe(move || log.borrow_mut().push(label)).unwrap()
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────

#[test]
fn scalar_write_counts() {
    let t = ReactiveNode::new(Mapping::from([("x", 1)])).unwrap();
    let (count, _sub) = counter(&t);

    t.set("x", 1).unwrap();
    assert_eq!(count.get(), 0);

    t.set("x", 2).unwrap();
    assert_eq!(count.get(), 1);
    assert_eq!(t.raw().get("x"), Some(Value::Int(2)));
}

#[test]
fn nested_write_bubbles_to_root() {
    let t = ReactiveNode::new(Mapping::from([("a", Mapping::from([("b", 1)]))])).unwrap();
    let a = t.child("a").unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let _sa = recorder(&a, "a", &log);
    let _st = recorder(&t, "t", &log);

    a.set("b", 2).unwrap();
    assert_eq!(*log.borrow(), vec!["a", "t"]);

    let a_raw = t.raw().get("a").and_then(|v| v.as_mapping()).unwrap();
    assert_eq!(a_raw.get("b"), Some(Value::Int(2)));
}

#[test]
fn replacing_mapping_destroys_old_child() {
    let t = ReactiveNode::new(Mapping::from([("a", Mapping::from([("b", 1)]))])).unwrap();
    let old = t.child("a").unwrap();
    let (root_count, _st) = counter(&t);
    let (old_count, old_sub) = counter(&old);

    // Equal content, different instance: still a change.
    assert!(t.set("a", Mapping::from([("b", 1)])).unwrap());
    assert_eq!(root_count.get(), 1);
    assert!(old.is_destroyed());
    assert!(!old_sub.is_active());
    assert_eq!(
        old.changed().subscribe(|| {}).unwrap_err(),
        StoreError::State {
            operation: "subscribe"
        }
    );

    let fresh = t.child("a").unwrap();
    assert!(!fresh.ptr_eq(&old));
    fresh.set("b", 5).unwrap();
    assert_eq!(old_count.get(), 0);
    assert_eq!(root_count.get(), 2);
}

#[test]
fn bubbling_order_through_chain() {
    let t = ReactiveNode::new(Mapping::from([(
        "a",
        Mapping::from([("b", Mapping::from([("c", Mapping::from([("v", 0)]))]))]),
    )]))
    .unwrap();
    let a = t.child("a").unwrap();
    let b = a.child("b").unwrap();
    let c = b.child("c").unwrap();
    assert_eq!(c.path(), "$.a.b.c");

    let log = Rc::new(RefCell::new(Vec::new()));
    let _subs = [
        recorder(&t, "root", &log),
        recorder(&a, "a", &log),
        recorder(&b, "b", &log),
        recorder(&c, "c", &log),
    ];

    c.set("v", 1).unwrap();
    assert_eq!(*log.borrow(), vec!["c", "b", "a", "root"]);
    assert_eq!(
        [t.version(), a.version(), b.version(), c.version()],
        [1, 1, 1, 1]
    );
}

#[test]
fn consecutive_distinct_writes_fire_once_each() {
    let t = ReactiveNode::new(Mapping::new()).unwrap();
    let (count, _sub) = counter(&t);
    t.set("k", "v1").unwrap();
    assert_eq!(count.get(), 1);
    t.set("k", "v2").unwrap();
    assert_eq!(count.get(), 2);
}

#[test]
fn assigned_mapping_reads_back_as_node() {
    let t = ReactiveNode::new(Mapping::new()).unwrap();
    let plain = Mapping::from([("z", true)]);
    t.set("cfg", plain.clone()).unwrap();

    let Some(Value::Node(cfg)) = t.get("cfg") else {
        panic!("expected a reactive child");
    };
    assert!(cfg.raw().ptr_eq(&plain));
    let (count, _sub) = counter(&cfg);
    cfg.set("z", false).unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn destroyed_tree_ignores_direct_raw_mutation() {
    let t = ReactiveNode::new(Mapping::from([("a", Mapping::from([("b", 1)]))])).unwrap();
    let a = t.child("a").unwrap();
    let a_raw = a.raw();
    let (count, _sub) = counter(&a);

    t.destroy();
    a_raw.insert("b", 99);
    a_raw.insert("new", Mapping::new());
    assert_eq!(count.get(), 0);
    assert_eq!(
        a.set("b", 3).unwrap_err(),
        StoreError::State { operation: "set" }
    );
}

#[test]
fn reentrant_subscriber_recomputes_total() {
    let cart = ReactiveNode::new(Mapping::from([
        ("price", Value::from(4)),
        ("qty", Value::from(1)),
        ("total", Value::from(4)),
    ]))
    .unwrap();
    let state = ReactiveNode::new(Mapping::from([("cart", cart.clone())])).unwrap();
    let (state_count, _ss) = counter(&state);

    let node = cart.clone();
    let _recompute = cart
        .subscribe(move || {
            let price = node.get("price").and_then(|v| v.as_i64()).unwrap_or(0);
            let qty = node.get("qty").and_then(|v| v.as_i64()).unwrap_or(0);
            node.set("total", price * qty).unwrap();
        })
        .unwrap();

    cart.set("qty", 3).unwrap();
    assert_eq!(cart.get("total"), Some(Value::Int(12)));
    // qty change and the nested total change each bubble once.
    assert_eq!(state_count.get(), 2);
}

#[test]
fn panicking_subscriber_does_not_break_bubbling() {
    let buf = SharedBuf::default();
    let sink = DiagnosticSink::with_writer(Box::new(buf.clone()), true);
    let t = ReactiveNode::with_config(
        Mapping::from([("a", Mapping::from([("b", 1)]))]),
        StoreConfig::default().with_diagnostics(sink),
    )
    .unwrap();
    let a = t.child("a").unwrap();

    let _bad = a.subscribe(|| panic!("render failed")).unwrap();
    let (a_count, _sa) = counter(&a);
    let (root_count, _st) = counter(&t);

    assert!(a.set("b", 2).unwrap());
    assert_eq!(a_count.get(), 1);
    assert_eq!(root_count.get(), 1);

    let out = buf.contents();
    assert_eq!(out.lines().count(), 1);
    let line: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(line["event"], "subscriber_panicked");
    assert_eq!(line["path"], "$.a");
    assert_eq!(line["message"], "render failed");
}

#[test]
fn runaway_reentrancy_is_reported() {
    let buf = SharedBuf::default();
    let sink = DiagnosticSink::with_writer(Box::new(buf.clone()), true);
    let t = ReactiveNode::with_config(
        Mapping::from([("n", 0)]),
        StoreConfig::default()
            .with_max_reentrant_depth(2)
            .with_diagnostics(sink),
    )
    .unwrap();

    let node = t.clone();
    let _loop = t
        .subscribe(move || {
            let n = node.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            let _ = node.set("n", n + 1);
        })
        .unwrap();

    t.set("n", 1).unwrap();
    assert_eq!(t.get("n"), Some(Value::Int(2)));
    assert!(buf.contents().contains("\"event\":\"reentrancy_limit\""));

    // The bound resets once the chain unwinds.
    t.set("n", 10).unwrap();
    assert_eq!(t.get("n"), Some(Value::Int(11)));
}

#[test]
fn subscriber_panic_is_logged_through_tracing() {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let t = ReactiveNode::new(Mapping::from([("x", 0)])).unwrap();
        let _bad = t.subscribe(|| panic!("boom")).unwrap();
        t.set("x", 1).unwrap();
    });

    let out = buf.contents();
    assert!(out.contains("change subscriber panicked"));
    assert!(out.contains("boom"));
}
