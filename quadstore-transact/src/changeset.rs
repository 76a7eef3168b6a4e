//! Changeset — the isolated, mutable delta of one pending transaction
//!
//! A changeset accumulates approved (added) and deprecated (removed)
//! statements, namespace edits, clear operations, and — under serializable
//! isolation — the read patterns observed by the transaction. It is
//! mutable while its sink is open and effectively frozen once merged into
//! a branch's delta chain.
//!
//! # Invariants
//!
//! - A statement is never in both `approved` and `deprecated`: each
//!   operation removes the statement from the opposite set first.
//! - `approved_contexts` is a superset of the contexts of `approved`
//!   statements, shrinking lazily when a context is deprecated down to
//!   emptiness.
//!
//! # Conflict detection
//!
//! Changesets merged into the chain after this one was opened are recorded
//! as `prepend` edges. [`Changeset::validate`] walks every observed
//! pattern against every prepended changeset's statement deltas; any match
//! means the observed state changed underneath the transaction and the
//! commit must abort with [`StoreError::Conflict`].

use parking_lot::Mutex;
use quadstore_core::{
    ContextSpec, Resource, Result, Statement, StatementPattern, StatementSink, StoreError,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The mutable fields of a changeset, guarded by one mutex.
#[derive(Clone, Default)]
pub(crate) struct ChangesetData {
    /// Statements added in this transaction
    pub(crate) approved: BTreeSet<Statement>,
    /// Statements removed in this transaction
    pub(crate) deprecated: BTreeSet<Statement>,
    /// Named contexts that currently have approved statements
    pub(crate) approved_contexts: FxHashSet<Resource>,
    /// Contexts cleared in this transaction (`None` = default graph);
    /// backing statements in these contexts are hidden downstream
    pub(crate) deprecated_contexts: FxHashSet<Option<Resource>>,
    /// Namespace bindings added in this transaction
    pub(crate) added_namespaces: FxHashMap<String, String>,
    /// Namespace prefixes removed in this transaction
    pub(crate) removed_prefixes: FxHashSet<String>,
    /// A full namespace clear was requested
    pub(crate) namespace_cleared: bool,
    /// A context-less full statement clear was requested
    pub(crate) statement_cleared: bool,
    /// Read patterns recorded for serializable validation
    pub(crate) observations: FxHashSet<StatementPattern>,
    /// Changesets merged after this one was opened; checked at prepare
    pub(crate) prepend: Vec<Arc<Changeset>>,
}

impl ChangesetData {
    /// Add a statement, maintaining mutual exclusion with `deprecated`
    pub(crate) fn approve(&mut self, statement: Statement) {
        self.deprecated.remove(&statement);
        if let Some(ctx) = &statement.context {
            self.approved_contexts.insert(ctx.clone());
        }
        self.approved.insert(statement);
    }

    /// Remove a statement, maintaining mutual exclusion with `approved`
    pub(crate) fn deprecate(&mut self, statement: Statement) {
        self.approved.remove(&statement);
        if let Some(ctx) = &statement.context {
            if self.approved_contexts.contains(ctx)
                && !self
                    .approved
                    .iter()
                    .any(|st| st.context.as_ref() == Some(ctx))
            {
                self.approved_contexts.remove(ctx);
            }
        }
        self.deprecated.insert(statement);
    }

    /// Drop approved statements in the selected contexts and arrange for
    /// backing statements there to be hidden
    pub(crate) fn clear(&mut self, contexts: &ContextSpec) {
        match contexts {
            ContextSpec::Any => {
                self.approved.clear();
                self.approved_contexts.clear();
                self.statement_cleared = true;
            }
            ContextSpec::Exact(ctxs) => {
                self.approved.retain(|st| !ctxs.contains(&st.context));
                for ctx in ctxs {
                    if let Some(named) = ctx {
                        self.approved_contexts.remove(named);
                    }
                    self.deprecated_contexts.insert(ctx.clone());
                }
            }
        }
    }

    fn set_namespace(&mut self, prefix: &str, name: &str) {
        // the layered view must hide any backing binding for this prefix
        // before the new binding takes effect
        self.removed_prefixes.insert(prefix.to_owned());
        self.added_namespaces
            .insert(prefix.to_owned(), name.to_owned());
    }

    fn remove_namespace(&mut self, prefix: &str) {
        self.added_namespaces.remove(prefix);
        self.removed_prefixes.insert(prefix.to_owned());
    }

    fn clear_namespaces(&mut self) {
        self.removed_prefixes.clear();
        self.added_namespaces.clear();
        self.namespace_cleared = true;
    }

    /// Did this changeset record anything at all?
    pub(crate) fn is_changed(&self) -> bool {
        !self.approved.is_empty()
            || !self.deprecated.is_empty()
            || !self.approved_contexts.is_empty()
            || !self.deprecated_contexts.is_empty()
            || !self.added_namespaces.is_empty()
            || !self.removed_prefixes.is_empty()
            || self.statement_cleared
            || self.namespace_cleared
            || !self.observations.is_empty()
    }

    /// Does any statement delta match the pattern?
    fn delta_matches(&self, pattern: &StatementPattern) -> bool {
        self.approved.iter().any(|st| pattern.matches(st))
            || self.deprecated.iter().any(|st| pattern.matches(st))
    }
}

/// An isolated, in-memory delta scoped to one pending transaction.
///
/// Shared between the sink that fills it, the branch chain that retains it
/// after merge, and the layered datasets that read through it.
#[derive(Default)]
pub struct Changeset {
    /// Live layered datasets currently pinning this changeset against
    /// compression. A plain counter: the chain, prepend edges, and
    /// datasets all hold `Arc`s, so `Arc::strong_count` cannot stand in
    /// for it.
    refbacks: AtomicUsize,
    data: Mutex<ChangesetData>,
}

impl Changeset {
    /// Create an empty changeset
    pub fn new() -> Self {
        Self::default()
    }

    // -- statement and namespace operations ---------------------------------

    /// Add a statement in this transaction
    pub fn approve(&self, statement: Statement) {
        self.data.lock().approve(statement);
    }

    /// Remove a statement in this transaction
    pub fn deprecate(&self, statement: Statement) {
        self.data.lock().deprecate(statement);
    }

    /// Clear the selected contexts
    pub fn clear(&self, contexts: &ContextSpec) {
        self.data.lock().clear(contexts);
    }

    /// Bind a namespace prefix
    pub fn set_namespace(&self, prefix: &str, name: &str) {
        self.data.lock().set_namespace(prefix, name);
    }

    /// Remove a namespace prefix binding
    pub fn remove_namespace(&self, prefix: &str) {
        self.data.lock().remove_namespace(prefix);
    }

    /// Remove all namespace bindings
    pub fn clear_namespaces(&self) {
        self.data.lock().clear_namespaces();
    }

    /// Record an observed read pattern
    pub fn observe(&self, pattern: StatementPattern) {
        self.data.lock().observations.insert(pattern);
    }

    // -- refbacks ------------------------------------------------------------

    pub(crate) fn add_refback(&self) {
        self.refbacks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_refback(&self) {
        let prev = self.refbacks.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "refback released more often than acquired");
    }

    /// Is any live dataset layered over this changeset?
    pub(crate) fn has_refbacks(&self) -> bool {
        self.refbacks.load(Ordering::SeqCst) > 0
    }

    // -- conflict edges and validation ---------------------------------------

    /// Record a changeset that merged after this one was opened
    pub(crate) fn prepend(&self, changeset: Arc<Changeset>) {
        self.data.lock().prepend.push(changeset);
    }

    /// Check every observation against every prepended changeset.
    ///
    /// Observations and edges are snapshotted out of the lock first, so no
    /// two changeset locks are ever held at once.
    pub fn validate(&self) -> Result<()> {
        let (observations, prepend) = {
            let data = self.data.lock();
            if data.observations.is_empty() || data.prepend.is_empty() {
                return Ok(());
            }
            (
                data.observations.iter().cloned().collect::<Vec<_>>(),
                data.prepend.clone(),
            )
        };
        for pattern in &observations {
            for changeset in &prepend {
                if changeset.data.lock().delta_matches(pattern) {
                    return Err(StoreError::conflict("observed state has changed"));
                }
            }
        }
        Ok(())
    }

    // -- merge and replay ----------------------------------------------------

    /// Did this changeset record anything at all?
    pub fn is_changed(&self) -> bool {
        self.data.lock().is_changed()
    }

    /// Snapshot the delta for replay
    pub(crate) fn snapshot(&self) -> ChangesetData {
        self.data.lock().clone()
    }

    /// Fold a newer changeset's operations into this one (compression).
    ///
    /// Replays in history order, so a later deprecate lands after the
    /// corresponding earlier approve within the merged result.
    pub(crate) fn absorb(&self, newer: &Changeset) {
        let newer = newer.snapshot();
        let mut d = self.data.lock();
        d.observations.extend(newer.observations.iter().cloned());
        if newer.namespace_cleared {
            d.clear_namespaces();
        }
        for prefix in &newer.removed_prefixes {
            d.remove_namespace(prefix);
        }
        for (prefix, name) in &newer.added_namespaces {
            d.set_namespace(prefix, name);
        }
        if newer.statement_cleared {
            d.clear(&ContextSpec::Any);
        }
        if !newer.deprecated_contexts.is_empty() {
            let ctxs: Vec<_> = newer.deprecated_contexts.iter().cloned().collect();
            d.clear(&ContextSpec::Exact(ctxs));
        }
        for statement in newer.deprecated {
            d.deprecate(statement);
        }
        for statement in newer.approved {
            d.approve(statement);
        }
    }

    /// Replay only the recorded observations into a sink
    pub(crate) fn replay_observations(&self, sink: &mut dyn StatementSink) -> Result<()> {
        let observations: Vec<StatementPattern> =
            self.data.lock().observations.iter().cloned().collect();
        for pattern in observations {
            sink.observe(&pattern)?;
        }
        Ok(())
    }

    /// Replay the full delta into a sink, observations first, in the same
    /// order compression folds changesets together.
    pub(crate) fn replay_into(&self, sink: &mut dyn StatementSink) -> Result<()> {
        let data = self.snapshot();
        for pattern in &data.observations {
            sink.observe(pattern)?;
        }
        if data.namespace_cleared {
            sink.clear_namespaces()?;
        }
        for prefix in &data.removed_prefixes {
            sink.remove_namespace(prefix)?;
        }
        for (prefix, name) in &data.added_namespaces {
            sink.set_namespace(prefix, name)?;
        }
        if data.statement_cleared {
            sink.clear(&ContextSpec::Any)?;
        }
        if !data.deprecated_contexts.is_empty() {
            let ctxs: Vec<_> = data.deprecated_contexts.iter().cloned().collect();
            sink.clear(&ContextSpec::Exact(ctxs))?;
        }
        for statement in data.deprecated {
            sink.deprecate(statement)?;
        }
        for statement in data.approved {
            sink.approve(statement)?;
        }
        Ok(())
    }

    /// Run a closure against the locked delta (read paths)
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&ChangesetData) -> R) -> R {
        f(&self.data.lock())
    }
}

impl std::fmt::Debug for Changeset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Changeset")
            .field("approved", &data.approved.len())
            .field("deprecated", &data.deprecated.len())
            .field("observations", &data.observations.len())
            .field("statement_cleared", &data.statement_cleared)
            .field("namespace_cleared", &data.namespace_cleared)
            .field("refbacks", &self.refbacks.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadstore_core::{Iri, Value};

    fn stmt(s: &str, ctx: Option<&str>) -> Statement {
        Statement::with_context(
            Resource::iri(format!("http://ex/{s}")),
            Iri::new("http://ex/p"),
            Value::literal("v"),
            ctx.map(|c| Resource::iri(format!("http://ex/{c}"))),
        )
    }

    #[test]
    fn test_approve_deprecate_mutual_exclusion() {
        let cs = Changeset::new();
        let t = stmt("s", None);
        cs.approve(t.clone());
        cs.deprecate(t.clone());
        cs.with_data(|d| {
            assert!(!d.approved.contains(&t));
            assert!(d.deprecated.contains(&t));
        });
        cs.approve(t.clone());
        cs.with_data(|d| {
            assert!(d.approved.contains(&t));
            assert!(!d.deprecated.contains(&t));
        });
    }

    #[test]
    fn test_approved_contexts_shrink_lazily() {
        let cs = Changeset::new();
        let a = stmt("a", Some("g"));
        let b = stmt("b", Some("g"));
        cs.approve(a.clone());
        cs.approve(b.clone());
        let g = Resource::iri("http://ex/g");
        cs.deprecate(a);
        cs.with_data(|d| assert!(d.approved_contexts.contains(&g)));
        cs.deprecate(b);
        cs.with_data(|d| assert!(!d.approved_contexts.contains(&g)));
    }

    #[test]
    fn test_clear_any_drops_approved_and_flags() {
        let cs = Changeset::new();
        cs.approve(stmt("a", Some("g")));
        cs.clear(&ContextSpec::Any);
        cs.with_data(|d| {
            assert!(d.approved.is_empty());
            assert!(d.approved_contexts.is_empty());
            assert!(d.statement_cleared);
        });
    }

    #[test]
    fn test_clear_context_is_scoped() {
        let cs = Changeset::new();
        cs.approve(stmt("a", Some("g1")));
        cs.approve(stmt("b", Some("g2")));
        cs.approve(stmt("c", None));
        let g1 = Resource::iri("http://ex/g1");
        cs.clear(&ContextSpec::context(g1.clone()));
        cs.with_data(|d| {
            assert_eq!(d.approved.len(), 2);
            assert!(!d.approved_contexts.contains(&g1));
            assert!(d.deprecated_contexts.contains(&Some(g1.clone())));
            assert!(!d.statement_cleared);
        });
    }

    #[test]
    fn test_set_namespace_hides_backing_binding() {
        let cs = Changeset::new();
        cs.set_namespace("ex", "http://example.org/");
        cs.with_data(|d| {
            assert!(d.removed_prefixes.contains("ex"));
            assert_eq!(
                d.added_namespaces.get("ex").map(String::as_str),
                Some("http://example.org/")
            );
        });
        cs.remove_namespace("ex");
        cs.with_data(|d| {
            assert!(!d.added_namespaces.contains_key("ex"));
            assert!(d.removed_prefixes.contains("ex"));
        });
    }

    #[test]
    fn test_validate_detects_conflicting_merge() {
        let reader = Changeset::new();
        reader.observe(StatementPattern::new(
            Some(Resource::iri("http://ex/s")),
            None,
            None,
        ));

        let writer = Arc::new(Changeset::new());
        writer.approve(stmt("s", None));
        reader.prepend(writer);

        let err = reader.validate().unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_validate_ignores_unrelated_merge() {
        let reader = Changeset::new();
        reader.observe(StatementPattern::new(
            Some(Resource::iri("http://ex/s")),
            None,
            None,
        ));

        let writer = Arc::new(Changeset::new());
        writer.approve(stmt("other", None));
        reader.prepend(writer);

        reader.validate().unwrap();
    }

    #[test]
    fn test_absorb_preserves_history_order() {
        let older = Changeset::new();
        older.approve(stmt("a", None));
        older.approve(stmt("b", None));

        let newer = Changeset::new();
        newer.deprecate(stmt("a", None));
        newer.approve(stmt("c", None));

        older.absorb(&newer);
        older.with_data(|d| {
            assert!(!d.approved.contains(&stmt("a", None)));
            assert!(d.deprecated.contains(&stmt("a", None)));
            assert!(d.approved.contains(&stmt("b", None)));
            assert!(d.approved.contains(&stmt("c", None)));
        });
    }

    #[test]
    fn test_absorb_carries_clear_flags() {
        let older = Changeset::new();
        older.approve(stmt("a", None));
        older.set_namespace("ex", "http://example.org/");

        let newer = Changeset::new();
        newer.clear(&ContextSpec::Any);
        newer.clear_namespaces();

        older.absorb(&newer);
        older.with_data(|d| {
            assert!(d.approved.is_empty());
            assert!(d.statement_cleared);
            assert!(d.namespace_cleared);
            assert!(d.added_namespaces.is_empty());
        });
    }

    #[test]
    fn test_empty_changeset_is_unchanged() {
        let cs = Changeset::new();
        assert!(!cs.is_changed());
        cs.observe(StatementPattern::any());
        assert!(cs.is_changed());
    }
}
