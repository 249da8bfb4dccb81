#![forbid(unsafe_code)]

//! Errors raised by store operations.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | `State` | Write or subscribe on a destroyed node/emitter | Operation rejected, nothing mutated |
//! | `ReservedKey` | Data key named `changed` or `raw` | Rejected at construction and write time |
//! | `Cycle` | Mapping or handle that is its own ancestor | Rejected before any mutation |
//! | `ReentrancyLimit` | Subscriber-triggered writes nested past the bound | Innermost write rejected |
//!
//! Errors are always returned to the immediate caller of the offending
//! operation. They never travel through the notification chain.

use std::fmt;

/// Key names reserved for the handle's capabilities.
pub const RESERVED_KEYS: [&str; 2] = ["changed", "raw"];

/// Whether `key` collides with a capability name.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The node or emitter was already destroyed.
    State {
        /// The rejected operation (`"set"`, `"delete"`, `"subscribe"`, ...).
        operation: &'static str,
    },
    /// A reserved capability name was used as a data key.
    ReservedKey(String),
    /// The value would make a node its own ancestor.
    Cycle {
        /// Key under which the cycle would have been introduced.
        key: String,
    },
    /// Re-entrant writes from subscriber callbacks nested too deeply.
    ReentrancyLimit {
        /// Notification depth at which the write was attempted.
        depth: usize,
        /// Configured bound.
        limit: usize,
    },
}

impl StoreError {
    pub(crate) fn state(operation: &'static str) -> Self {
        Self::State { operation }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State { operation } => {
                write!(f, "cannot {operation}: target has been destroyed")
            }
            Self::ReservedKey(key) => write!(f, "key '{key}' is reserved"),
            Self::Cycle { key } => {
                write!(f, "assigning '{key}' would make a node its own ancestor")
            }
            Self::ReentrancyLimit { depth, limit } => write!(
                f,
                "re-entrant write at notification depth {depth} exceeds limit {limit}"
            ),
        }
    }
}

impl std::error::Error for StoreError {}
