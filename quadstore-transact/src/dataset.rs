//! Layered read views
//!
//! A dataset is an immutable point-in-time composition: a backing dataset
//! plus zero or more changesets layered over it, most recent outermost.
//! Each layer resolves reads the same way:
//!
//! 1. if the changeset cleared everything (or every requested context),
//!    the backing data is suppressed for the call;
//! 2. otherwise backing statements are fetched, minus anything deprecated
//!    (set difference, skipped entirely when nothing is deprecated);
//! 3. approved statements matching the pattern are unioned in with bag
//!    semantics — no deduplication.
//!
//! Namespace and context enumeration follow the same
//! add/remove/clear-wins shape.

use crate::changeset::Changeset;
use parking_lot::Mutex;
use quadstore_core::{
    Namespace, Resource, Result, Statement, StatementDataset, StatementIter, StatementPattern,
    StatementSink,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// DerivedDataset
// ---------------------------------------------------------------------------

/// One layer: a changeset applied over a backing dataset.
///
/// Holding a `DerivedDataset` pins its changeset against compression
/// (refback); dropping it releases the pin.
pub struct DerivedDataset {
    backing: Box<dyn StatementDataset>,
    changes: Arc<Changeset>,
}

impl DerivedDataset {
    /// Layer `changes` over `backing`. The layer holds a refback on the
    /// changeset until dropped.
    pub fn new(backing: Box<dyn StatementDataset>, changes: Arc<Changeset>) -> Self {
        changes.add_refback();
        DerivedDataset { backing, changes }
    }
}

impl Drop for DerivedDataset {
    fn drop(&mut self) {
        self.changes.remove_refback();
    }
}

impl StatementDataset for DerivedDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        let (suppress, deprecated, deprecated_contexts, approved) =
            self.changes.with_data(|d| {
                let suppress = d.statement_cleared
                    || match pattern.contexts.listed() {
                        Some(ctxs) => {
                            !d.deprecated_contexts.is_empty()
                                && ctxs.iter().all(|c| d.deprecated_contexts.contains(c))
                        }
                        None => false,
                    };
                let deprecated: BTreeSet<Statement> = d
                    .deprecated
                    .iter()
                    .filter(|st| pattern.matches(st))
                    .cloned()
                    .collect();
                let approved: Vec<Statement> = d
                    .approved
                    .iter()
                    .filter(|st| pattern.matches(st))
                    .cloned()
                    .collect();
                (suppress, deprecated, d.deprecated_contexts.clone(), approved)
            });

        let from_backing: StatementIter<'_> = if suppress {
            Box::new(std::iter::empty())
        } else {
            let backing = self.backing.get(pattern)?;
            if deprecated.is_empty() && deprecated_contexts.is_empty() {
                backing
            } else {
                Box::new(backing.filter(move |item| match item {
                    Ok(st) => {
                        !deprecated_contexts.contains(&st.context) && !deprecated.contains(st)
                    }
                    Err(_) => true,
                }))
            }
        };
        Ok(Box::new(from_backing.chain(approved.into_iter().map(Ok))))
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        let (suppress, deprecated_contexts, approved_contexts) = self.changes.with_data(|d| {
            (
                d.statement_cleared,
                d.deprecated_contexts.clone(),
                d.approved_contexts.clone(),
            )
        });
        let mut contexts: BTreeSet<Resource> = BTreeSet::new();
        if !suppress {
            for ctx in self.backing.context_ids()? {
                if !deprecated_contexts.contains(&Some(ctx.clone())) {
                    contexts.insert(ctx);
                }
            }
        }
        contexts.extend(approved_contexts);
        Ok(contexts.into_iter().collect())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        let (cleared, added, removed) = self.changes.with_data(|d| {
            (
                d.namespace_cleared,
                d.added_namespaces.clone(),
                d.removed_prefixes.clone(),
            )
        });
        let mut bindings: BTreeMap<String, String> = BTreeMap::new();
        if !cleared {
            for ns in self.backing.namespaces()? {
                if !removed.contains(&ns.prefix) {
                    bindings.insert(ns.prefix, ns.name);
                }
            }
        }
        for (prefix, name) in added {
            bindings.insert(prefix, name);
        }
        Ok(bindings
            .into_iter()
            .map(|(prefix, name)| Namespace::new(prefix, name))
            .collect())
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        enum Resolved {
            Added(String),
            Hidden,
            Fallthrough,
        }
        let resolved = self.changes.with_data(|d| {
            if let Some(name) = d.added_namespaces.get(prefix) {
                Resolved::Added(name.clone())
            } else if d.namespace_cleared || d.removed_prefixes.contains(prefix) {
                Resolved::Hidden
            } else {
                Resolved::Fallthrough
            }
        });
        match resolved {
            Resolved::Added(name) => Ok(Some(name)),
            Resolved::Hidden => Ok(None),
            Resolved::Fallthrough => self.backing.namespace(prefix),
        }
    }
}

// ---------------------------------------------------------------------------
// SharedDataset
// ---------------------------------------------------------------------------

/// Delegation adapter for a dataset owned elsewhere, typically a branch's
/// cached snapshot: layers stack over it without taking ownership, and
/// dropping the adapter leaves the shared dataset open.
pub struct SharedDataset(pub Arc<dyn StatementDataset>);

impl StatementDataset for SharedDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        self.0.get(pattern)
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        self.0.context_ids()
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        self.0.namespaces()
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        self.0.namespace(prefix)
    }
}

// ---------------------------------------------------------------------------
// ObservingDataset
// ---------------------------------------------------------------------------

/// Serializable read recorder: every statement read is also recorded as an
/// observation on a private sink, whose changeset is later validated
/// against concurrently merged changes.
pub struct ObservingDataset {
    inner: Box<dyn StatementDataset>,
    observer: Mutex<Option<Box<dyn StatementSink>>>,
}

impl ObservingDataset {
    /// Record reads on `observer` while delegating them to `inner`
    pub fn new(inner: Box<dyn StatementDataset>, observer: Box<dyn StatementSink>) -> Self {
        ObservingDataset {
            inner,
            observer: Mutex::new(Some(observer)),
        }
    }

    fn observe(&self, pattern: &StatementPattern) -> Result<()> {
        let mut observer = self.observer.lock();
        if let Some(sink) = observer.as_mut() {
            sink.observe(pattern)?;
        }
        Ok(())
    }
}

impl StatementDataset for ObservingDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        self.observe(pattern)?;
        self.inner.get(pattern)
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        self.observe(&StatementPattern::any())?;
        self.inner.context_ids()
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        self.inner.namespaces()
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        self.inner.namespace(prefix)
    }
}

impl Drop for ObservingDataset {
    fn drop(&mut self) {
        if let Some(mut sink) = self.observer.lock().take() {
            if let Err(e) = sink.flush() {
                tracing::warn!(error = %e, "observation sink flush failed on dataset close");
            }
            if let Err(e) = sink.close() {
                tracing::warn!(error = %e, "observation sink close failed on dataset close");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UnionDataset
// ---------------------------------------------------------------------------

/// Bag-semantics union of two datasets: `get` yields both sides'
/// statements without deduplication. Context enumeration deduplicates;
/// namespace resolution prefers the primary side.
pub struct UnionDataset {
    primary: Box<dyn StatementDataset>,
    additional: Box<dyn StatementDataset>,
}

impl UnionDataset {
    /// Combine two read views into one
    pub fn new(primary: Box<dyn StatementDataset>, additional: Box<dyn StatementDataset>) -> Self {
        UnionDataset {
            primary,
            additional,
        }
    }
}

impl StatementDataset for UnionDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        let first = self.primary.get(pattern)?;
        let second = self.additional.get(pattern)?;
        Ok(Box::new(first.chain(second)))
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        let mut contexts: BTreeSet<Resource> = self.primary.context_ids()?.into_iter().collect();
        contexts.extend(self.additional.context_ids()?);
        Ok(contexts.into_iter().collect())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        let mut bindings: BTreeMap<String, String> = BTreeMap::new();
        // insert the additional side first so primary bindings win
        for ns in self.additional.namespaces()? {
            bindings.insert(ns.prefix, ns.name);
        }
        for ns in self.primary.namespaces()? {
            bindings.insert(ns.prefix, ns.name);
        }
        Ok(bindings
            .into_iter()
            .map(|(prefix, name)| Namespace::new(prefix, name))
            .collect())
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        match self.primary.namespace(prefix)? {
            Some(name) => Ok(Some(name)),
            None => self.additional.namespace(prefix),
        }
    }
}
