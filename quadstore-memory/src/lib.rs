//! # Quadstore Memory
//!
//! In-memory backing source: the reference implementation of the
//! `quadstore-core` storage contract.
//!
//! `MemoryStore` keeps statements and namespace bindings behind one
//! `RwLock`. Sinks buffer their operations and apply them in one write
//! critical section at `flush`, so a flush is all-or-nothing. The store
//! itself never rejects a transaction; conflict detection is the job of
//! the branch layer above (`MemoryStore::fork`).

use parking_lot::RwLock;
use quadstore_core::{
    ContextSpec, IsolationLevel, Namespace, Resource, Result, Statement, StatementBranch,
    StatementDataset, StatementIter, StatementPattern, StatementSink, StatementSource,
};
use quadstore_transact::Branch;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Default, Clone)]
struct MemoryState {
    statements: BTreeSet<Statement>,
    namespaces: BTreeMap<String, String>,
}

impl MemoryState {
    fn matching(&self, pattern: &StatementPattern) -> Vec<Statement> {
        self.statements
            .iter()
            .filter(|st| pattern.matches(st))
            .cloned()
            .collect()
    }

    fn contexts(&self) -> Vec<Resource> {
        let contexts: BTreeSet<Resource> = self
            .statements
            .iter()
            .filter_map(|st| st.context.clone())
            .collect();
        contexts.into_iter().collect()
    }

    fn namespace_list(&self) -> Vec<Namespace> {
        self.namespaces
            .iter()
            .map(|(prefix, name)| Namespace::new(prefix.clone(), name.clone()))
            .collect()
    }
}

/// In-memory statement store.
///
/// Cheap to clone: clones share one store. Use [`MemoryStore::fork`] for
/// transactional access with isolation guarantees.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given statements
    pub fn with_statements(statements: impl IntoIterator<Item = Statement>) -> Self {
        let store = MemoryStore::new();
        store.state.write().statements.extend(statements);
        store
    }

    /// All statements in deterministic order
    pub fn statements(&self) -> Vec<Statement> {
        self.state.read().statements.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().statements.is_empty()
    }
}

impl StatementSource for MemoryStore {
    fn sink(&self, _level: IsolationLevel) -> Result<Box<dyn StatementSink>> {
        Ok(Box::new(MemorySink {
            state: self.state.clone(),
            ops: Vec::new(),
            closed: false,
        }))
    }

    fn dataset(&self, level: IsolationLevel) -> Result<Box<dyn StatementDataset>> {
        if level.is_compatible_with(IsolationLevel::Snapshot) {
            // owned point-in-time copy
            Ok(Box::new(SnapshotDataset {
                state: self.state.read().clone(),
            }))
        } else {
            // live view, snapshots per call
            Ok(Box::new(LiveDataset {
                state: self.state.clone(),
            }))
        }
    }

    fn fork(&self) -> Arc<dyn StatementBranch> {
        Arc::new(Branch::new(Arc::new(self.clone())))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Point-in-time read view over an owned copy of the store state.
struct SnapshotDataset {
    state: MemoryState,
}

impl StatementDataset for SnapshotDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        let pattern = pattern.clone();
        Ok(Box::new(
            self.state
                .statements
                .iter()
                .filter(move |st| pattern.matches(st))
                .cloned()
                .map(Ok),
        ))
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        Ok(self.state.contexts())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.state.namespace_list())
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self.state.namespaces.get(prefix).cloned())
    }
}

/// Read view that sees every committed write, for isolation levels below
/// snapshot.
struct LiveDataset {
    state: Arc<RwLock<MemoryState>>,
}

impl StatementDataset for LiveDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        let matching = self.state.read().matching(pattern);
        Ok(Box::new(matching.into_iter().map(Ok)))
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        Ok(self.state.read().contexts())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.state.read().namespace_list())
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self.state.read().namespaces.get(prefix).cloned())
    }
}

enum Op {
    Approve(Statement),
    Deprecate(Statement),
    Clear(ContextSpec),
    SetNamespace(String, String),
    RemoveNamespace(String),
    ClearNamespaces,
}

/// Buffering write handle: operations queue up in order and apply in one
/// write critical section at `flush`.
struct MemorySink {
    state: Arc<RwLock<MemoryState>>,
    ops: Vec<Op>,
    closed: bool,
}

impl MemorySink {
    fn assert_open(&self, op: &str) {
        assert!(!self.closed, "{op} on a closed sink");
    }
}

impl StatementSink for MemorySink {
    fn approve(&mut self, statement: Statement) -> Result<()> {
        self.assert_open("approve");
        self.ops.push(Op::Approve(statement));
        Ok(())
    }

    fn deprecate(&mut self, statement: Statement) -> Result<()> {
        self.assert_open("deprecate");
        self.ops.push(Op::Deprecate(statement));
        Ok(())
    }

    fn clear(&mut self, contexts: &ContextSpec) -> Result<()> {
        self.assert_open("clear");
        self.ops.push(Op::Clear(contexts.clone()));
        Ok(())
    }

    fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.assert_open("set_namespace");
        self.ops
            .push(Op::SetNamespace(prefix.to_owned(), name.to_owned()));
        Ok(())
    }

    fn remove_namespace(&mut self, prefix: &str) -> Result<()> {
        self.assert_open("remove_namespace");
        self.ops.push(Op::RemoveNamespace(prefix.to_owned()));
        Ok(())
    }

    fn clear_namespaces(&mut self) -> Result<()> {
        self.assert_open("clear_namespaces");
        self.ops.push(Op::ClearNamespaces);
        Ok(())
    }

    fn observe(&mut self, _pattern: &StatementPattern) -> Result<()> {
        // the root store is the arbiter: nothing observed here can be
        // invalidated, so observations are accepted and ignored
        self.assert_open("observe");
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.assert_open("prepare");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.assert_open("flush");
        if self.ops.is_empty() {
            return Ok(());
        }
        let applied = self.ops.len();
        let mut state = self.state.write();
        for op in self.ops.drain(..) {
            match op {
                Op::Approve(st) => {
                    state.statements.insert(st);
                }
                Op::Deprecate(st) => {
                    state.statements.remove(&st);
                }
                Op::Clear(spec) => state.statements.retain(|st| !spec.admits(&st.context)),
                Op::SetNamespace(prefix, name) => {
                    state.namespaces.insert(prefix, name);
                }
                Op::RemoveNamespace(prefix) => {
                    state.namespaces.remove(&prefix);
                }
                Op::ClearNamespaces => state.namespaces.clear(),
            }
        }
        tracing::debug!(applied, total = state.statements.len(), "memory store flushed");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            // unflushed operations are discarded with the sink
            self.ops.clear();
        }
        Ok(())
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
    fn test_flush_is_atomic_and_ordered() {
        let store = MemoryStore::with_statements(vec![stmt("a", None)]);
        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.approve(stmt("b", None)).unwrap();
        sink.deprecate(stmt("a", None)).unwrap();

        // nothing applied before flush
        assert_eq!(store.statements(), vec![stmt("a", None)]);

        sink.flush().unwrap();
        sink.close().unwrap();
        assert_eq!(store.statements(), vec![stmt("b", None)]);
    }

    #[test]
    fn test_close_discards_unflushed_ops() {
        let store = MemoryStore::new();
        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.approve(stmt("a", None)).unwrap();
        sink.close().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_dataset_ignores_later_writes() {
        let store = MemoryStore::with_statements(vec![stmt("a", None)]);
        let snapshot = store.dataset(IsolationLevel::Snapshot).unwrap();
        let live = store.dataset(IsolationLevel::ReadCommitted).unwrap();

        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.approve(stmt("b", None)).unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        assert_eq!(snapshot.get(&StatementPattern::any()).unwrap().count(), 1);
        assert_eq!(live.get(&StatementPattern::any()).unwrap().count(), 2);
    }

    #[test]
    fn test_clear_respects_context_spec() {
        let store = MemoryStore::with_statements(vec![
            stmt("a", None),
            stmt("b", Some("g1")),
            stmt("c", Some("g2")),
        ]);
        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.clear(&ContextSpec::context(Resource::iri("http://ex/g1")))
            .unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        assert_eq!(store.statements(), vec![stmt("a", None), stmt("c", Some("g2"))]);

        // an explicit empty list addresses only the default graph
        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.clear(&ContextSpec::exact([])).unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();
        assert_eq!(store.statements(), vec![stmt("c", Some("g2"))]);
    }

    #[test]
    fn test_namespace_bindings() {
        let store = MemoryStore::new();
        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.set_namespace("ex", "http://example.org/").unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        let ds = store.dataset(IsolationLevel::None).unwrap();
        assert_eq!(
            ds.namespace("ex").unwrap().as_deref(),
            Some("http://example.org/")
        );

        let mut sink = store.sink(IsolationLevel::None).unwrap();
        sink.remove_namespace("ex").unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();
        let ds = store.dataset(IsolationLevel::None).unwrap();
        assert_eq!(ds.namespace("ex").unwrap(), None);
    }

    #[test]
    fn test_fork_returns_isolated_branch() {
        let store = MemoryStore::new();
        let branch = store.fork();
        let mut sink = branch.sink(IsolationLevel::None).unwrap();
        sink.approve(stmt("a", None)).unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        assert!(store.is_empty());
        branch.prepare().unwrap();
        branch.flush().unwrap();
        assert_eq!(store.statements(), vec![stmt("a", None)]);
    }
}
