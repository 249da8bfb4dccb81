#![forbid(unsafe_code)]

//! Payload-free change emitter with RAII subscriptions.
//!
//! # Design
//!
//! [`ChangeEmitter`] keeps an ordered list of subscriber callbacks in shared,
//! reference-counted storage (`Rc<RefCell<..>>`). The emitter only holds
//! `Weak` references; the strong `Rc` lives in the [`Subscription`] guard
//! handed back to the caller, so dropping the guard is enough to unsubscribe.
//!
//! # Invariants
//!
//! 1. `fire()` invokes live subscribers in registration order.
//! 2. A subscription disposed before its turn in a running `fire()` is skipped.
//! 3. Subscribers added during a `fire()` are first invoked by the next one.
//! 4. After `destroy()`, `fire()` is a no-op and `subscribe()` returns
//!    [`StoreError::State`].
//!
//! # Failure Modes
//!
//! - **Panicking subscriber**: the panic is caught, logged with
//!   `tracing::warn!`, recorded in the returned [`FireReport`], and the
//!   remaining subscribers still run. Requires `panic = "unwind"`.
//! - **Re-entrant fire**: callbacks may write to the structure being observed
//!   (and so fire this emitter again). No borrow is held while a callback
//!   runs, so nested fires complete before the outer loop continues.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::StoreError;

type CallbackRc = Rc<dyn Fn()>;
type CallbackWeak = Weak<dyn Fn()>;

/// Shared interior for [`ChangeEmitter`].
struct EmitterInner {
    /// Subscribers stored as weak references. Dead entries are pruned on
    /// dispose and on fire.
    subscribers: Vec<CallbackWeak>,
    destroyed: bool,
}

/// Publish/subscribe primitive delivering "something changed" notifications.
///
/// Cloning a `ChangeEmitter` creates a new handle to the **same** subscriber
/// list.
#[derive(Clone)]
pub struct ChangeEmitter {
    inner: Rc<RefCell<EmitterInner>>,
}

impl fmt::Debug for ChangeEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ChangeEmitter")
            .field("subscriber_count", &inner.subscribers.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

impl Default for ChangeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a single [`ChangeEmitter::fire`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Panic messages of callbacks that panicked, in invocation order.
    pub panicked: Vec<String>,
}

impl FireReport {
    /// Whether every invoked callback returned normally.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty()
    }
}

impl ChangeEmitter {
    /// Create an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EmitterInner {
                subscribers: Vec::new(),
                destroyed: false,
            })),
        }
    }

    /// Register `callback` to run on every subsequent [`fire`](Self::fire).
    ///
    /// Dropping (or [disposing](Subscription::dispose)) the returned guard
    /// removes the callback.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::State`] if the emitter has been destroyed.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Result<Subscription, StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.destroyed {
            return Err(StoreError::state("subscribe"));
        }
        let strong: CallbackRc = Rc::new(callback);
        inner.subscribers.push(Rc::downgrade(&strong));
        Ok(Subscription {
            callback: Some(strong),
            emitter: Rc::downgrade(&self.inner),
        })
    }

    /// Invoke every live subscriber synchronously, in registration order.
    ///
    /// A panicking callback does not stop the others; its message is
    /// collected in the returned report.
    pub fn fire(&self) -> FireReport {
        let pending: Vec<CallbackWeak> = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return FireReport::default();
            }
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.clone()
        };

        let mut report = FireReport::default();
        for weak in &pending {
            // A callback may have destroyed us mid-loop.
            if self.inner.borrow().destroyed {
                break;
            }
            let Some(cb) = weak.upgrade() else {
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| cb())) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(
                        panic = %message,
                        "change subscriber panicked; remaining subscribers still run"
                    );
                    report.panicked.push(message);
                }
            }
        }
        report
    }

    /// Drop every subscriber and make the emitter inert. Idempotent.
    pub fn destroy(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.destroyed = true;
        inner.subscribers.clear();
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    /// Number of registered subscribers that have not been disposed.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// The subscribe-only view of this emitter.
    #[must_use]
    pub fn signal(&self) -> ChangeSignal {
        ChangeSignal {
            emitter: self.clone(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Subscribe-only surface of a [`ChangeEmitter`].
///
/// This is what a reactive node exposes as `changed`: observers can listen
/// but cannot fire or destroy the emitter.
#[derive(Clone)]
pub struct ChangeSignal {
    emitter: ChangeEmitter,
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("subscriber_count", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ChangeSignal {
    /// See [`ChangeEmitter::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::State`] if the underlying emitter is destroyed.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Result<Subscription, StoreError> {
        self.emitter.subscribe(callback)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.emitter.subscriber_count()
    }

    /// Whether the underlying emitter has been destroyed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.emitter.is_destroyed()
    }
}

/// RAII guard for a subscriber callback.
///
/// Holds the only strong reference to the callback. Dropping the guard (or
/// calling [`dispose`](Self::dispose)) makes the emitter's weak entry dead
/// and prunes it.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    callback: Option<CallbackRc>,
    emitter: Weak<RefCell<EmitterInner>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Remove the callback from its emitter. Disposing twice is a no-op.
    pub fn dispose(&mut self) {
        if self.callback.take().is_none() {
            return;
        }
        if let Some(inner) = self.emitter.upgrade()
            && let Ok(mut inner) = inner.try_borrow_mut()
        {
            inner.subscribers.retain(|w| w.strong_count() > 0);
        }
    }

    /// Whether the callback can still be invoked: not disposed, and the
    /// emitter is alive and not destroyed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
            && self
                .emitter
                .upgrade()
                .is_some_and(|inner| !inner.borrow().destroyed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
