//! In-crate test doubles: a vec-backed dataset and a minimal backing
//! source. The real reference source lives in `quadstore-memory`; these
//! stay here so unit tests do not need a crate cycle.

use crate::branch::Branch;
use parking_lot::RwLock;
use quadstore_core::{
    ContextSpec, IsolationLevel, Namespace, Resource, Result, Statement, StatementBranch,
    StatementDataset, StatementIter, StatementPattern, StatementSink, StatementSource,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed dataset over a plain vec, preserving insertion order.
#[derive(Default)]
pub(crate) struct VecDataset {
    statements: Vec<Statement>,
    namespaces: BTreeMap<String, String>,
}

impl VecDataset {
    pub(crate) fn with_statements(statements: Vec<Statement>) -> Self {
        VecDataset {
            statements,
            namespaces: BTreeMap::new(),
        }
    }

    pub(crate) fn set_namespace(&mut self, prefix: &str, name: &str) {
        self.namespaces.insert(prefix.to_owned(), name.to_owned());
    }
}

impl StatementDataset for VecDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        let pattern = pattern.clone();
        Ok(Box::new(
            self.statements
                .iter()
                .filter(move |st| pattern.matches(st))
                .cloned()
                .map(Ok),
        ))
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        let contexts: BTreeSet<Resource> = self
            .statements
            .iter()
            .filter_map(|st| st.context.clone())
            .collect();
        Ok(contexts.into_iter().collect())
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self
            .namespaces
            .iter()
            .map(|(prefix, name)| Namespace::new(prefix.clone(), name.clone()))
            .collect())
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self.namespaces.get(prefix).cloned())
    }
}

#[derive(Default, Clone)]
struct TestState {
    statements: BTreeSet<Statement>,
    namespaces: BTreeMap<String, String>,
}

/// Minimal backing source: datasets are point-in-time clones, sinks
/// buffer operations and apply them under the write lock at flush.
#[derive(Default, Clone)]
pub(crate) struct TestSource {
    state: Arc<RwLock<TestState>>,
    sinks_opened: Arc<AtomicUsize>,
}

impl TestSource {
    pub(crate) fn with_statements(statements: Vec<Statement>) -> Self {
        let source = TestSource::default();
        source.state.write().statements.extend(statements);
        source
    }

    pub(crate) fn statements(&self) -> Vec<Statement> {
        self.state.read().statements.iter().cloned().collect()
    }

    pub(crate) fn insert(&self, statement: Statement) {
        self.state.write().statements.insert(statement);
    }

    /// How many sinks this source has handed out so far
    pub(crate) fn sinks_opened(&self) -> usize {
        self.sinks_opened.load(Ordering::SeqCst)
    }
}

impl StatementSource for TestSource {
    fn sink(&self, _level: IsolationLevel) -> Result<Box<dyn StatementSink>> {
        self.sinks_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestSink {
            state: self.state.clone(),
            ops: Vec::new(),
        }))
    }

    fn dataset(&self, _level: IsolationLevel) -> Result<Box<dyn StatementDataset>> {
        let state = self.state.read();
        let mut dataset = VecDataset::with_statements(state.statements.iter().cloned().collect());
        for (prefix, name) in &state.namespaces {
            dataset.set_namespace(prefix, name);
        }
        Ok(Box::new(dataset))
    }

    fn fork(&self) -> Arc<dyn StatementBranch> {
        Arc::new(Branch::new(Arc::new(self.clone())))
    }

    fn close(&self) -> Result<()> {
        Ok(())
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

struct TestSink {
    state: Arc<RwLock<TestState>>,
    ops: Vec<Op>,
}

impl StatementSink for TestSink {
    fn approve(&mut self, statement: Statement) -> Result<()> {
        self.ops.push(Op::Approve(statement));
        Ok(())
    }

    fn deprecate(&mut self, statement: Statement) -> Result<()> {
        self.ops.push(Op::Deprecate(statement));
        Ok(())
    }

    fn clear(&mut self, contexts: &ContextSpec) -> Result<()> {
        self.ops.push(Op::Clear(contexts.clone()));
        Ok(())
    }

    fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.ops
            .push(Op::SetNamespace(prefix.to_owned(), name.to_owned()));
        Ok(())
    }

    fn remove_namespace(&mut self, prefix: &str) -> Result<()> {
        self.ops.push(Op::RemoveNamespace(prefix.to_owned()));
        Ok(())
    }

    fn clear_namespaces(&mut self) -> Result<()> {
        self.ops.push(Op::ClearNamespaces);
        Ok(())
    }

    fn observe(&mut self, _pattern: &StatementPattern) -> Result<()> {
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
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
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
