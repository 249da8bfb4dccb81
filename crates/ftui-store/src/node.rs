#![forbid(unsafe_code)]

//! Reactive wrapper over a nested [`Mapping`].
//!
//! # Design
//!
//! A [`ReactiveNode`] owns one raw mapping, one [`ChangeEmitter`], and one
//! child node per mapping-valued key. Children are owned strongly by their
//! parent; the parent link is a `Weak`, so dropping the last handle to a root
//! frees the whole tree and destroying a root tears it down without any
//! manual cycle breaking.
//!
//! Rust has no transparent property interception, so the handle exposes an
//! explicit `get`/`set`/`delete` surface instead of looking exactly like the
//! mapping it wraps.
//!
//! ```text
//! set("b", 2) on $.a
//!   1. reject if destroyed / reserved key / re-entrancy bound
//!   2. compare with stored value (scalars by value, mappings by identity)
//!   3. destroy stale child, write raw slot, wrap new mapping
//!   4. fire $.a, then $       (child-to-root, once each)
//! ```
//!
//! # Invariants
//!
//! 1. For every key `k` whose raw value is a mapping, `children[k]` exists and
//!    wraps exactly that mapping instance; no other children exist.
//! 2. Raw slots hold plain `Value::Map` entries, so [`raw`](ReactiveNode::raw)
//!    is fully unwrapped.
//! 3. A write that does not change the stored value fires nothing.
//! 4. A recorded change fires the written node first, then each ancestor in
//!    order up to the root, each exactly once.
//! 5. A failed write leaves every node untouched.
//!
//! # Failure Modes
//!
//! - **Direct raw mutation**: inserting into a wrapped mapping without going
//!   through its node desynchronizes children from raw. Not detected.
//! - **Shared raw instance**: wrapping a mapping that another live node
//!   already wraps yields two independent nodes over one mapping. Pass the
//!   node handle instead to move it.
//! - **Destroyed child**: calling `destroy` on a non-root leaves a dead child
//!   under its key. The next write to that key replaces it, even when it
//!   writes the same mapping instance.
//! - **Re-entrant writes**: a subscriber may write to the tree it observes.
//!   The nested write, including its own bubble, completes before the outer
//!   notification loop resumes. Nesting deeper than
//!   [`StoreConfig::max_reentrant_depth`] is rejected.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, debug_span, trace, warn};

use crate::config::StoreConfig;
use crate::diagnostics::Diagnostic;
use crate::emitter::{ChangeEmitter, ChangeSignal, Subscription};
use crate::error::{StoreError, is_reserved_key};
use crate::value::{Mapping, Value};

/// Shared interior for [`ReactiveNode`].
struct NodeInner {
    raw: Mapping,
    parent: Option<Weak<RefCell<NodeInner>>>,
    /// Key under which the parent holds this node.
    key: Option<String>,
    children: BTreeMap<String, ReactiveNode>,
    emitter: ChangeEmitter,
    config: Rc<StoreConfig>,
    /// Notifications emitted by this node.
    version: u64,
    destroyed: bool,
}

/// Handle to a reactive node.
///
/// Cloning a `ReactiveNode` creates a new handle to the **same** node.
#[derive(Clone)]
pub struct ReactiveNode {
    inner: Rc<RefCell<NodeInner>>,
}

impl fmt::Debug for ReactiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ReactiveNode")
            .field("key", &inner.key)
            .field("keys", &inner.raw.keys())
            .field("children", &inner.children.len())
            .field("version", &inner.version)
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

thread_local! {
    static NOTIFY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Tracks how many change notifications are in flight on this thread.
struct NotifyDepthGuard;

impl NotifyDepthGuard {
    fn enter() -> Self {
        NOTIFY_DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }

    fn current() -> usize {
        NOTIFY_DEPTH.with(Cell::get)
    }
}

impl Drop for NotifyDepthGuard {
    fn drop(&mut self) {
        NOTIFY_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

impl ReactiveNode {
    /// Wrap `mapping` with the default [`StoreConfig`].
    ///
    /// Every nested mapping is wrapped recursively; nested node handles are
    /// adopted rather than wrapped twice.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ReservedKey`] if any level uses `changed` or `raw`.
    /// - [`StoreError::Cycle`] if a mapping contains itself.
    /// - [`StoreError::State`] if a nested handle is destroyed.
    pub fn new(mapping: Mapping) -> Result<Self, StoreError> {
        Self::with_config(mapping, StoreConfig::default())
    }

    /// Wrap `mapping` with an explicit configuration. See [`new`](Self::new).
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_config(mapping: Mapping, config: StoreConfig) -> Result<Self, StoreError> {
        validate_mapping(&mapping, &mut Vec::new(), "$")?;
        let mut detached = Vec::new();
        let root = Self::build(mapping, None, Rc::new(config), &mut detached);
        debug!(keys = root.len(), "reactive root constructed");
        if !detached.is_empty() {
            let _depth = NotifyDepthGuard::enter();
            let mut fired = Vec::new();
            for prior in detached {
                prior.bubble(&mut fired);
            }
        }
        Ok(root)
    }

    /// Build a node over an already validated mapping.
    fn build(
        raw: Mapping,
        parent: Option<(&ReactiveNode, &str)>,
        config: Rc<StoreConfig>,
        detached: &mut Vec<ReactiveNode>,
    ) -> Self {
        let node = Self {
            inner: Rc::new(RefCell::new(NodeInner {
                raw: raw.clone(),
                parent: parent.map(|(p, _)| Rc::downgrade(&p.inner)),
                key: parent.map(|(_, k)| k.to_owned()),
                children: BTreeMap::new(),
                emitter: ChangeEmitter::new(),
                config: Rc::clone(&config),
                version: 0,
                destroyed: false,
            })),
        };

        for (key, value) in raw.entries() {
            let child = match value {
                Value::Map(m) => Self::build(
                    m,
                    Some((&node, key.as_str())),
                    Rc::clone(&config),
                    detached,
                ),
                Value::Node(existing) => {
                    node.adopt(&existing, &key, detached);
                    raw.insert(key.clone(), existing.raw());
                    existing
                }
                _ => continue,
            };
            node.inner.borrow_mut().children.insert(key, child);
        }
        node
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// Value at `key`: the child handle for nested mappings, otherwise a
    /// clone of the raw scalar.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        if let Some(child) = inner.children.get(key) {
            return Some(Value::Node(child.clone()));
        }
        inner.raw.get(key)
    }

    /// Child node at `key`, if the value there is a mapping.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<ReactiveNode> {
        self.inner.borrow().children.get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().raw.contains_key(key)
    }

    /// Data keys, in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().raw.keys()
    }

    /// Snapshot of the entries as [`get`](Self::get) would return them.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        let inner = self.inner.borrow();
        inner
            .raw
            .entries()
            .into_iter()
            .map(|(k, v)| match inner.children.get(&k) {
                Some(child) => (k, Value::Node(child.clone())),
                None => (k, v),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().raw.is_empty()
    }

    /// The live underlying mapping, unwrapped.
    ///
    /// Still available after [`destroy`](Self::destroy) for final inspection.
    /// Treat it as read-only while the node is alive.
    #[must_use]
    pub fn raw(&self) -> Mapping {
        self.inner.borrow().raw.clone()
    }

    // ── Writes ────────────────────────────────────────────────────────────

    /// Store `value` at `key`.
    ///
    /// Returns `Ok(true)` if a change was recorded (and notifications fired),
    /// `Ok(false)` if the key already held that value.
    ///
    /// # Errors
    ///
    /// - [`StoreError::State`] if this node is destroyed.
    /// - [`StoreError::ReservedKey`] for `changed` / `raw`.
    /// - [`StoreError::Cycle`] if `value` is or contains an ancestor.
    /// - [`StoreError::ReentrancyLimit`] if nested too deeply in callbacks.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<bool, StoreError> {
        self.write(key.into(), Some(value.into()), "set")
    }

    /// Remove `key`. Removing a present key is a change; removing an absent
    /// one is a no-op.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.write(key.to_owned(), None, "delete")
    }

    /// Store `Some(value)` or remove the key on `None`.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn assign(&self, key: impl Into<String>, value: Option<Value>) -> Result<bool, StoreError> {
        let operation = if value.is_some() { "set" } else { "delete" };
        self.write(key.into(), value, operation)
    }

    fn write(
        &self,
        key: String,
        value: Option<Value>,
        operation: &'static str,
    ) -> Result<bool, StoreError> {
        let _span = debug_span!("store_write", path = %self.path(), key = %key).entered();

        if self.is_destroyed() {
            return Err(StoreError::state(operation));
        }
        if is_reserved_key(&key) {
            return Err(StoreError::ReservedKey(key));
        }
        let config = self.config();
        let depth = NotifyDepthGuard::current();
        if config.rejects_depth(depth) {
            warn!(
                depth,
                limit = config.max_reentrant_depth,
                "re-entrant write rejected"
            );
            if let Some(sink) = &config.diagnostics {
                let _ = sink.record(&Diagnostic::ReentrancyLimit {
                    path: self.path(),
                    key,
                    depth,
                });
            }
            return Err(StoreError::ReentrancyLimit {
                depth,
                limit: config.max_reentrant_depth,
            });
        }
        if self.holds(&key, value.as_ref()) {
            trace!("no-op write");
            return Ok(false);
        }

        match &value {
            Some(Value::Map(m)) => validate_mapping(m, &mut self.lineage_raws(), &key)?,
            Some(Value::Node(n)) => validate_adoptee(n, &self.lineage_raws(), &key)?,
            _ => {}
        }

        let mut detached = Vec::new();
        let (stored, child) = match value {
            Some(Value::Map(m)) => {
                let child =
                    Self::build(m.clone(), Some((self, key.as_str())), config, &mut detached);
                (Some(Value::Map(m)), Some(child))
            }
            Some(Value::Node(n)) => {
                self.adopt(&n, &key, &mut detached);
                (Some(Value::Map(n.raw())), Some(n))
            }
            other => (other, None),
        };
        let deleted = stored.is_none();

        let stale = {
            let mut inner = self.inner.borrow_mut();
            let stale = inner.children.remove(&key);
            match stored {
                Some(v) => {
                    inner.raw.insert(key.clone(), v);
                }
                None => {
                    inner.raw.remove(&key);
                }
            }
            if let Some(child) = child {
                inner.children.insert(key, child);
            }
            stale
        };
        if let Some(stale) = stale {
            stale.destroy();
        }

        debug!(deleted, "change recorded");
        self.notify_change(detached);
        Ok(true)
    }

    /// Whether `key` already holds `value` (`None` = absent).
    ///
    /// A key bound to a destroyed child never holds anything, so writing the
    /// same mapping back rebuilds a live child.
    fn holds(&self, key: &str, value: Option<&Value>) -> bool {
        let inner = self.inner.borrow();
        if inner.children.get(key).is_some_and(ReactiveNode::is_destroyed) {
            return false;
        }
        match value {
            None => !inner.raw.contains_key(key),
            Some(Value::Node(n)) => inner.children.get(key).is_some_and(|c| c.ptr_eq(n)),
            Some(v) => inner.raw.get(key).is_some_and(|old| old == *v),
        }
    }

    /// Move `node` under this node at `key`, detaching it from its previous
    /// parent. Previous parents other than `self` are queued in `detached`.
    fn adopt(&self, node: &ReactiveNode, key: &str, detached: &mut Vec<ReactiveNode>) {
        if let Some(prior) = node.detach_from_parent()
            && !prior.ptr_eq(self)
        {
            detached.push(prior);
        }
        {
            let mut inner = node.inner.borrow_mut();
            inner.parent = Some(Rc::downgrade(&self.inner));
            inner.key = Some(key.to_owned());
        }
        node.share_config(&self.config());
        trace!(key, "adopted existing node");
    }

    /// Clear the parent link and remove this node from the parent's children
    /// and raw slot. Returns the former parent.
    fn detach_from_parent(&self) -> Option<ReactiveNode> {
        let (weak, key) = {
            let mut inner = self.inner.borrow_mut();
            (inner.parent.take(), inner.key.take())
        };
        let parent = Self {
            inner: weak?.upgrade()?,
        };
        let key = key?;
        {
            let mut inner = parent.inner.borrow_mut();
            if inner.children.get(&key).is_some_and(|c| c.ptr_eq(self)) {
                inner.children.remove(&key);
                inner.raw.remove(&key);
            }
        }
        Some(parent)
    }

    fn share_config(&self, config: &Rc<StoreConfig>) {
        let children: Vec<ReactiveNode> = {
            let mut inner = self.inner.borrow_mut();
            inner.config = Rc::clone(config);
            inner.children.values().cloned().collect()
        };
        for child in children {
            child.share_config(config);
        }
    }

    // ── Notification ──────────────────────────────────────────────────────

    fn notify_change(&self, detached: Vec<ReactiveNode>) {
        let _depth = NotifyDepthGuard::enter();
        let mut fired = Vec::new();
        self.bubble(&mut fired);
        for prior in detached {
            prior.bubble(&mut fired);
        }
    }

    /// Fire this node and every ancestor, skipping nodes already in `fired`.
    /// The chain is captured before the first callback runs.
    fn bubble(&self, fired: &mut Vec<ReactiveNode>) {
        for node in self.lineage() {
            if fired.iter().any(|f| f.ptr_eq(&node)) {
                continue;
            }
            node.emit();
            fired.push(node);
        }
    }

    fn emit(&self) {
        let (emitter, config) = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.version += 1;
            (inner.emitter.clone(), Rc::clone(&inner.config))
        };
        let report = emitter.fire();
        if let Some(sink) = &config.diagnostics
            && !report.panicked.is_empty()
        {
            let path = self.path();
            for message in report.panicked {
                let _ = sink.record(&Diagnostic::SubscriberPanicked {
                    path: path.clone(),
                    message,
                });
            }
        }
    }

    /// Subscribe-only view of this node's emitter.
    #[must_use]
    pub fn changed(&self) -> ChangeSignal {
        self.inner.borrow().emitter.signal()
    }

    /// Shortcut for `changed().subscribe(callback)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::State`] if this node is destroyed.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Result<Subscription, StoreError> {
        self.changed().subscribe(callback)
    }

    /// Number of change notifications this node has emitted, counting its
    /// own writes and bubbled descendant writes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Destroy every descendant (depth-first), then this node's emitter, then
    /// mark this node destroyed. Idempotent.
    ///
    /// Afterwards writes and subscriptions fail with [`StoreError::State`];
    /// reads and [`raw`](Self::raw) keep working.
    pub fn destroy(&self) {
        let (children, emitter) = {
            let inner = self.inner.borrow();
            if inner.destroyed {
                return;
            }
            (
                inner.children.values().cloned().collect::<Vec<_>>(),
                inner.emitter.clone(),
            )
        };
        for child in children {
            child.destroy();
        }
        emitter.destroy();
        self.inner.borrow_mut().destroyed = true;
        trace!(key = ?self.key(), "reactive node destroyed");
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    // ── Structure ─────────────────────────────────────────────────────────

    /// The enclosing node, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<ReactiveNode> {
        self.inner
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    /// Key under which the parent holds this node.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        self.inner.borrow().key.clone()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Dotted location from the root: `$` for a root, `$.a.b` below it.
    #[must_use]
    pub fn path(&self) -> String {
        let mut keys = Vec::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            let inner = node.inner.borrow();
            if let Some(key) = &inner.key {
                keys.push(key.clone());
            }
            current = inner
                .parent
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|inner| Self { inner });
        }
        keys.reverse();
        let mut path = String::from("$");
        for key in keys {
            path.push('.');
            path.push_str(&key);
        }
        path
    }

    /// Whether both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &ReactiveNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn config(&self) -> Rc<StoreConfig> {
        Rc::clone(&self.inner.borrow().config)
    }

    /// This node followed by each ancestor up to the root.
    fn lineage(&self) -> Vec<ReactiveNode> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            chain.push(node);
        }
        chain
    }

    fn lineage_raws(&self) -> Vec<Mapping> {
        self.lineage().iter().map(ReactiveNode::raw).collect()
    }

    fn subtree_contains_any(&self, raws: &[Mapping]) -> bool {
        let inner = self.inner.borrow();
        raws.iter().any(|r| r.ptr_eq(&inner.raw))
            || inner
                .children
                .values()
                .any(|child| child.subtree_contains_any(raws))
    }
}

/// Check a mapping about to be wrapped under `ancestry`, without mutating
/// anything.
fn validate_mapping(
    mapping: &Mapping,
    ancestry: &mut Vec<Mapping>,
    key: &str,
) -> Result<(), StoreError> {
    if ancestry.iter().any(|a| a.ptr_eq(mapping)) {
        return Err(StoreError::Cycle {
            key: key.to_owned(),
        });
    }
    let entries = mapping.entries();
    if let Some((reserved, _)) = entries.iter().find(|(k, _)| is_reserved_key(k)) {
        return Err(StoreError::ReservedKey(reserved.clone()));
    }

    ancestry.push(mapping.clone());
    let mut result = Ok(());
    for (k, v) in &entries {
        result = match v {
            Value::Map(m) => validate_mapping(m, ancestry, k),
            Value::Node(n) => validate_adoptee(n, ancestry, k),
            _ => Ok(()),
        };
        if result.is_err() {
            break;
        }
    }
    ancestry.pop();
    result
}

fn validate_adoptee(node: &ReactiveNode, ancestry: &[Mapping], key: &str) -> Result<(), StoreError> {
    if node.is_destroyed() {
        return Err(StoreError::state("adopt"));
    }
    if node.subtree_contains_any(ancestry) {
        return Err(StoreError::Cycle {
            key: key.to_owned(),
        });
    }
    Ok(())
}
