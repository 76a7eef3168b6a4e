//! Storage traits: the contract between the transactional layering
//! protocol and a backing statement source
//!
//! This module plays the role `overlay.rs` plays for index storage: core
//! defines the seam, sibling crates implement it. A backing engine
//! (in-memory, file-based, relational) supplies a [`StatementSource`];
//! the layering protocol in `quadstore-transact` both consumes that
//! contract and re-implements it, so branches stack on branches the same
//! way they stack on raw stores.
//!
//! # Lifecycle
//!
//! - A [`StatementSink`] is a write handle: mutate, `prepare()` (validate),
//!   `flush()` (commit), `close()`. Dropping a sink closes it best-effort.
//! - A [`StatementDataset`] is an immutable point-in-time read view.
//!   Dropping it releases whatever pinned it (snapshot handles, changeset
//!   refbacks).
//! - A [`StatementBranch`] is a stateful source that accumulates deltas
//!   privately until `flush()` pushes them down to its backing source.
//!
//! Callers must close sinks and drop datasets before closing the source
//! that produced them; violating that order is a caller bug, not a
//! recoverable condition.

use crate::error::Result;
use crate::isolation::IsolationLevel;
use crate::namespace::Namespace;
use crate::statement::{ContextSpec, Statement, StatementPattern};
use crate::term::Resource;
use std::sync::Arc;

/// Streaming statement results. Items are `Result` so backing engines can
/// surface storage failures mid-iteration.
pub type StatementIter<'a> = Box<dyn Iterator<Item = Result<Statement>> + 'a>;

/// A write handle bound to one pending transaction.
pub trait StatementSink: Send {
    /// Add a statement in this transaction
    fn approve(&mut self, statement: Statement) -> Result<()>;

    /// Remove a statement in this transaction
    fn deprecate(&mut self, statement: Statement) -> Result<()>;

    /// Remove all statements in the selected contexts.
    /// `ContextSpec::Any` clears everything, regardless of context.
    fn clear(&mut self, contexts: &ContextSpec) -> Result<()>;

    /// Bind a namespace prefix
    fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()>;

    /// Remove a namespace prefix binding
    fn remove_namespace(&mut self, prefix: &str) -> Result<()>;

    /// Remove all namespace bindings
    fn clear_namespaces(&mut self) -> Result<()>;

    /// Record a read pattern for serializable conflict detection.
    /// Meaningful only under [`IsolationLevel::Serializable`]; weaker
    /// levels may ignore it.
    fn observe(&mut self, pattern: &StatementPattern) -> Result<()>;

    /// Validate this transaction against concurrent changes.
    /// Fails with [`crate::StoreError::Conflict`] when an observed read
    /// has been invalidated. Idempotent per sink.
    fn prepare(&mut self) -> Result<()>;

    /// Commit the accumulated changes to the owning source
    fn flush(&mut self) -> Result<()>;

    /// Release the handle. Always safe to call, even after a failed
    /// `prepare`; idempotent.
    fn close(&mut self) -> Result<()>;
}

/// An immutable, point-in-time read view of a statement source.
pub trait StatementDataset: Send + Sync {
    /// Stream the statements matching the pattern.
    /// Bag semantics: layered and unioned views may yield duplicates.
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>>;

    /// Enumerate the named-graph contexts that contain statements
    fn context_ids(&self) -> Result<Vec<Resource>>;

    /// Enumerate namespace bindings
    fn namespaces(&self) -> Result<Vec<Namespace>>;

    /// Look up one namespace binding by prefix
    fn namespace(&self, prefix: &str) -> Result<Option<String>>;
}

/// The capability to read, write, and fork a statement store.
pub trait StatementSource: Send + Sync {
    /// Open a write handle at the given isolation level
    fn sink(&self, level: IsolationLevel) -> Result<Box<dyn StatementSink>>;

    /// Open a point-in-time read view at the given isolation level
    fn dataset(&self, level: IsolationLevel) -> Result<Box<dyn StatementDataset>>;

    /// Produce an independent branch point over this source.
    /// Changes accumulate in the returned branch until it flushes.
    fn fork(&self) -> Arc<dyn StatementBranch>;

    /// Release cached resources held by this source
    fn close(&self) -> Result<()>;
}

/// A stateful [`StatementSource`] that privately accumulates changesets
/// and pushes them to its backing source on `flush`.
pub trait StatementBranch: StatementSource {
    /// Validate all accumulated changes against the backing source.
    /// Surfaces [`crate::StoreError::Conflict`] for invalidated
    /// serializable observations.
    fn prepare(&self) -> Result<()>;

    /// Apply all accumulated changes to the backing source, in the order
    /// they were merged. Empties the branch on success.
    fn flush(&self) -> Result<()>;
}
