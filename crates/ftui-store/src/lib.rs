#![forbid(unsafe_code)]

//! Store: reactive nested key-value state with bubbling change notification.
//!
//! # Role in FrankenTUI
//! `ftui-store` holds application state that widgets and persistence layers
//! observe. A [`ReactiveNode`] wraps a nested [`Mapping`]; any write that
//! actually changes a value fires the written node's emitter and then every
//! ancestor's, so a view subscribed at the root re-renders on any change in
//! the tree while a view subscribed deeper only hears about its subtree.
//!
//! # Primary responsibilities
//! - **ReactiveNode**: read/write/delete interception, recursive wrapping of
//!   nested mappings, child-to-root bubbling, tree teardown.
//! - **ChangeEmitter**: payload-free publish/subscribe with RAII
//!   [`Subscription`] guards and per-callback panic isolation.
//! - **Diagnostics**: JSONL side channel for failures that must not reach the
//!   writer (subscriber panics, runaway re-entrant writes).
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use ftui_store::{Mapping, ReactiveNode, Value};
//!
//! let state = ReactiveNode::new(Mapping::from([(
//!     "cart",
//!     Mapping::from([("items", 0)]),
//! )]))?;
//!
//! let renders = Rc::new(Cell::new(0));
//! let renders_clone = Rc::clone(&renders);
//! let _sub = state.subscribe(move || renders_clone.set(renders_clone.get() + 1))?;
//!
//! let cart = state.child("cart").expect("cart is a mapping");
//! cart.set("items", 0)?; // unchanged: no notification
//! cart.set("items", 3)?; // bubbles from cart to the root
//! assert_eq!(renders.get(), 1);
//!
//! let items = state
//!     .raw()
//!     .get("cart")
//!     .and_then(|v| v.as_mapping())
//!     .and_then(|m| m.get("items"));
//! assert_eq!(items, Some(Value::Int(3)));
//! # Ok::<(), ftui_store::StoreError>(())
//! ```
//!
//! # Threading
//! Everything is single-threaded (`Rc`/`RefCell`). Notification is fully
//! synchronous: there is no queue and no async boundary.

pub mod config;
pub mod diagnostics;
pub mod emitter;
pub mod error;
#[cfg(feature = "serde")]
pub mod json;
pub mod node;
pub mod value;

pub use config::StoreConfig;
pub use diagnostics::{Diagnostic, DiagnosticSink, DiagnosticSinkConfig, DiagnosticSinkDestination};
pub use emitter::{ChangeEmitter, ChangeSignal, FireReport, Subscription};
pub use error::{RESERVED_KEYS, StoreError, is_reserved_key};
#[cfg(feature = "serde")]
pub use json::JsonError;
pub use node::ReactiveNode;
pub use value::{Mapping, Value};
