#![forbid(unsafe_code)]

//! Store-wide configuration shared by every node of a tree.

use crate::diagnostics::DiagnosticSink;

/// Default bound on nested subscriber-triggered writes.
pub const DEFAULT_MAX_REENTRANT_DEPTH: usize = 64;

/// Configuration for a reactive tree.
///
/// The root's config is shared by all of its descendants. A node adopted
/// into another tree switches to that tree's config.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum notification depth at which a write is still accepted
    /// (0 = unlimited).
    ///
    /// A write performed from inside a change callback runs at depth 1, a
    /// write from a callback of that write at depth 2, and so on. Writes at
    /// or beyond the limit fail with [`StoreError::ReentrancyLimit`].
    ///
    /// [`StoreError::ReentrancyLimit`]: crate::StoreError::ReentrancyLimit
    pub max_reentrant_depth: usize,
    /// Side channel for subscriber panics and rejected re-entrant writes.
    pub diagnostics: Option<DiagnosticSink>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_reentrant_depth: DEFAULT_MAX_REENTRANT_DEPTH,
            diagnostics: None,
        }
    }
}

impl StoreConfig {
    /// Set the re-entrant write bound.
    #[must_use]
    pub fn with_max_reentrant_depth(mut self, depth: usize) -> Self {
        self.max_reentrant_depth = depth;
        self
    }

    /// Remove the re-entrant write bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_reentrant_depth: 0,
            diagnostics: None,
        }
    }

    /// Attach a diagnostics sink.
    #[must_use]
    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Whether a write at notification `depth` exceeds the bound.
    #[must_use]
    pub(crate) fn rejects_depth(&self, depth: usize) -> bool {
        self.max_reentrant_depth != 0 && depth >= self.max_reentrant_depth
    }
}
