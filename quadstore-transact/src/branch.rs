//! Branch — a stateful source that keeps a delta chain over its backing
//! source
//!
//! A branch accumulates merged changesets in FIFO order. Reads layer the
//! chain (oldest innermost) over a backing dataset; writes go through
//! per-transaction sinks whose changesets merge into the chain on flush.
//! The chain is bounded opportunistically: whenever no live dataset pins a
//! changeset, it is folded into its neighbor (compression), and an idle
//! auto-flushing branch pushes its whole chain down to the backing source.
//!
//! # Locking
//!
//! One mutex guards all of a branch's mutable state. Public entry points
//! lock it; `*_locked` helpers take the already-locked state, replacing
//! the re-entrant lock structure of a monitor-based design. A sink's
//! `prepare()` additionally claims the *merge gate*: until that sink
//! flushes or closes, no other transaction's changeset can merge, so a
//! validated transaction cannot be invalidated between its `prepare` and
//! its `flush`. The gate is re-entrant: merges by the holding sink, or
//! from the holder's own thread (a dataset dropped mid-window flushes
//! its observations), pass through rather than deadlock.
//!
//! Auto-flush uses a non-blocking lock attempt so an opportunistic flush
//! never stalls a concurrent reader or writer; on contention it silently
//! does nothing and is retried on the next close.

use crate::changeset::Changeset;
use crate::dataset::{DerivedDataset, ObservingDataset, SharedDataset};
use parking_lot::{Condvar, Mutex};
use quadstore_core::{
    ContextSpec, IsolationLevel, Namespace, Resource, Result, Statement, StatementBranch,
    StatementDataset, StatementIter, StatementPattern, StatementSink, StatementSource,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Backing sink held open between branch-level `prepare` and `flush`.
enum Prepared {
    /// Opened for this flush only; closed afterwards
    Owned(Box<dyn StatementSink>),
    /// Alias for the cached serializable sink, which stays in its slot
    /// so datasets opened mid-commit keep reusing it
    Serializable,
}

/// The sink currently holding the merge gate, and the thread it
/// prepared on.
struct GateHolder {
    sink: u64,
    thread: ThreadId,
}

/// Mutable state of a branch, guarded by one mutex.
struct BranchState {
    /// The delta chain: changesets merged but not yet flushed, FIFO
    changes: Vec<Arc<Changeset>>,
    /// Changesets of open sinks, not yet merged
    pending: Vec<Arc<Changeset>>,
    /// Number of open datasets over this branch
    observers: usize,
    /// Cached backing sink; present at `Serializable` isolation and up
    serializable: Option<Box<dyn StatementSink>>,
    /// Backing sink opened by branch-level `prepare`, pending `flush`
    prepared: Option<Prepared>,
    /// Cached backing snapshot; present at `Snapshot` isolation and up.
    /// Declared after the sinks: dropping the snapshot may flush
    /// observations into the backing branch, which must not meet a gate
    /// still held by `serializable`/`prepared`
    snapshot: Option<Arc<dyn StatementDataset>>,
    /// Holder of the merge gate (a sink's prepare→close window)
    gate: Option<GateHolder>,
}

impl BranchState {
    fn prepared_sink_mut(&mut self) -> &mut dyn StatementSink {
        match self.prepared.as_mut().expect("prepared sink") {
            Prepared::Owned(sink) => sink.as_mut(),
            Prepared::Serializable => self
                .serializable
                .as_mut()
                .expect("serializable sink")
                .as_mut(),
        }
    }
}

struct BranchInner {
    backing: Arc<dyn StatementSource>,
    auto_flush: bool,
    state: Mutex<BranchState>,
    gate_released: Condvar,
    next_sink_id: AtomicU64,
}

/// A stateful, forkable view of a backing source that privately
/// accumulates changesets before flushing them.
///
/// Cheap to clone: clones share one branch.
#[derive(Clone)]
pub struct Branch {
    inner: Arc<BranchInner>,
}

impl Branch {
    /// Create a branch over the given backing source
    pub fn new(backing: Arc<dyn StatementSource>) -> Self {
        Self::with_options(backing, false)
    }

    /// Create a branch that flushes itself to the backing source whenever
    /// it becomes idle
    pub fn auto_flushing(backing: Arc<dyn StatementSource>) -> Self {
        Self::with_options(backing, true)
    }

    fn with_options(backing: Arc<dyn StatementSource>, auto_flush: bool) -> Self {
        Branch {
            inner: Arc::new(BranchInner {
                backing,
                auto_flush,
                state: Mutex::new(BranchState {
                    changes: Vec::new(),
                    pending: Vec::new(),
                    observers: 0,
                    snapshot: None,
                    serializable: None,
                    prepared: None,
                    gate: None,
                }),
                gate_released: Condvar::new(),
                next_sink_id: AtomicU64::new(1),
            }),
        }
    }

    /// Does this branch hold unflushed changes?
    pub fn has_changes(&self) -> bool {
        !self.inner.state.lock().changes.is_empty()
    }

    // -- sinks ---------------------------------------------------------------

    fn register_sink_locked(&self, state: &mut BranchState) -> BranchSink {
        let changeset = Arc::new(Changeset::new());
        state.pending.push(changeset.clone());
        BranchSink {
            branch: self.clone(),
            changeset,
            id: self.inner.next_sink_id.fetch_add(1, Ordering::Relaxed),
            prepared: false,
            closed: false,
        }
    }

    /// Merge a flushed changeset into the chain, honoring the merge gate.
    /// `holder` is the caller's gate token, letting a prepared sink merge
    /// its own changeset through its held gate. Merges from the holding
    /// thread also pass: a dataset dropped inside the commit window
    /// flushes its observations on that same thread.
    fn merge(&self, changeset: &Arc<Changeset>, holder: Option<u64>) {
        let mut state = self.inner.state.lock();
        let thread = std::thread::current().id();
        while state
            .gate
            .as_ref()
            .map_or(false, |gate| Some(gate.sink) != holder && gate.thread != thread)
        {
            self.inner.gate_released.wait(&mut state);
        }
        self.merge_locked(&mut state, changeset);
    }

    fn merge_locked(&self, state: &mut BranchState, changeset: &Arc<Changeset>) {
        state.pending.retain(|cs| !Arc::ptr_eq(cs, changeset));
        if changeset.is_changed() {
            state.changes.push(changeset.clone());
            Self::compress_locked(state);
            // the tail may be a fold of several changesets by now
            let merged = state.changes.last().cloned().expect("non-empty chain");
            for pending in &state.pending {
                pending.prepend(merged.clone());
            }
            tracing::debug!(chain_len = state.changes.len(), "changeset merged into branch");
        }
    }

    /// Fold unreferenced tail changesets together. Never touches a
    /// changeset that a live dataset still layers over.
    fn compress_locked(state: &mut BranchState) {
        while state.changes.len() > 1
            && !state.changes[state.changes.len() - 2].has_refbacks()
        {
            let popped = state.changes.pop().expect("non-empty chain");
            let target = state.changes.last().expect("non-empty chain");
            target.absorb(&popped);
            tracing::trace!(chain_len = state.changes.len(), "compressed changeset chain");
        }
    }

    // -- datasets ------------------------------------------------------------

    fn derived_from_serializable(
        &self,
        state: &mut BranchState,
        level: IsolationLevel,
    ) -> Result<Box<dyn StatementDataset>> {
        if state.serializable.is_none() && level.is_compatible_with(IsolationLevel::Serializable) {
            state.serializable = Some(self.inner.backing.sink(level)?);
        }
        let derived = self.derived_from_snapshot(state, level)?;
        if state.serializable.is_some() {
            let observer = self.register_sink_locked(state);
            Ok(Box::new(ObservingDataset::new(derived, Box::new(observer))))
        } else {
            Ok(derived)
        }
    }

    fn derived_from_snapshot(
        &self,
        state: &mut BranchState,
        level: IsolationLevel,
    ) -> Result<Box<dyn StatementDataset>> {
        let mut dataset: Box<dyn StatementDataset> = if let Some(snapshot) = &state.snapshot {
            // the branch already has at least snapshot isolation
            Box::new(SharedDataset(snapshot.clone()))
        } else {
            let fresh = self.inner.backing.dataset(level)?;
            if level.is_compatible_with(IsolationLevel::Snapshot) {
                // keep the snapshot until this branch is released
                let shared: Arc<dyn StatementDataset> = Arc::from(fresh);
                state.snapshot = Some(shared.clone());
                Box::new(SharedDataset(shared))
            } else {
                fresh
            }
        };
        for changeset in &state.changes {
            dataset = Box::new(DerivedDataset::new(dataset, changeset.clone()));
        }
        Ok(dataset)
    }

    // -- branch-level two-phase flush ----------------------------------------

    fn prepare_locked(&self, state: &mut BranchState) -> Result<()> {
        if state.changes.is_empty() {
            return Ok(());
        }
        if state.prepared.is_none() {
            let prepared = if state.serializable.is_some() {
                Prepared::Serializable
            } else {
                Prepared::Owned(self.inner.backing.sink(IsolationLevel::None)?)
            };
            state.prepared = Some(prepared);
        }
        let changes = state.changes.clone();
        let sink = state.prepared_sink_mut();
        for changeset in &changes {
            changeset.replay_observations(sink)?;
        }
        sink.prepare()
    }

    fn flush_locked(&self, state: &mut BranchState) -> Result<()> {
        if state.changes.is_empty() {
            return Ok(());
        }
        if state.prepared.is_none() {
            self.prepare_locked(state)?;
        }
        let changes = state.changes.clone();
        {
            let sink = state.prepared_sink_mut();
            // replay the whole chain before flushing the backing sink, so
            // a failure part-way leaves the backing transaction unflushed
            for changeset in &changes {
                changeset.replay_into(sink)?;
            }
            sink.flush()?;
        }
        state.changes.clear();
        match state.prepared.take().expect("prepared sink") {
            Prepared::Owned(mut sink) => sink.close()?,
            // the serializable sink stays cached in its slot
            Prepared::Serializable => {}
        }
        tracing::debug!(flushed = changes.len(), "branch flushed to backing source");
        Ok(())
    }

    // -- auto-flush ----------------------------------------------------------

    /// Opportunistic flush of an idle branch. Non-blocking: lock
    /// contention means someone is using the branch, so skip silently and
    /// let the next close retry.
    fn auto_flush(&self) {
        if !self.inner.auto_flush {
            return;
        }
        if let Some(mut state) = self.inner.state.try_lock() {
            self.auto_flush_locked(&mut state);
        }
    }

    fn auto_flush_locked(&self, state: &mut BranchState) {
        if !self.inner.auto_flush {
            return;
        }
        if state.serializable.is_none() && state.observers == 0 && !state.changes.is_empty() {
            match self.flush_locked(state) {
                Ok(()) => tracing::debug!("idle branch auto-flushed"),
                Err(e) => {
                    tracing::warn!(error = %e, "auto-flush failed; changes remain buffered")
                }
            }
        }
    }
}

impl StatementSource for Branch {
    fn sink(&self, _level: IsolationLevel) -> Result<Box<dyn StatementSink>> {
        let mut state = self.inner.state.lock();
        Ok(Box::new(self.register_sink_locked(&mut state)))
    }

    fn dataset(&self, level: IsolationLevel) -> Result<Box<dyn StatementDataset>> {
        let mut state = self.inner.state.lock();
        let inner = self.derived_from_serializable(&mut state, level)?;
        state.observers += 1;
        Ok(Box::new(BranchDataset {
            branch: self.clone(),
            inner: Some(inner),
        }))
    }

    fn fork(&self) -> Arc<dyn StatementBranch> {
        Arc::new(Branch::new(Arc::new(self.clone())))
    }

    fn close(&self) -> Result<()> {
        let (serializable, prepared, snapshot) = {
            let mut state = self.inner.state.lock();
            (
                state.serializable.take(),
                state.prepared.take(),
                state.snapshot.take(),
            )
        };
        // close the sinks before dropping the snapshot: its observer
        // flushes into the backing branch, which must not still see a
        // gate held by one of these sinks
        let mut result = Ok(());
        if let Some(Prepared::Owned(mut sink)) = prepared {
            if let Err(e) = sink.close() {
                result = Err(e);
            }
        }
        if let Some(mut sink) = serializable {
            if let Err(e) = sink.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        drop(snapshot);
        result
    }
}

impl StatementBranch for Branch {
    fn prepare(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.prepare_locked(&mut state)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.flush_locked(&mut state)
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Branch")
            .field("changes", &state.changes.len())
            .field("pending", &state.pending.len())
            .field("observers", &state.observers)
            .field("auto_flush", &self.inner.auto_flush)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BranchSink
// ---------------------------------------------------------------------------

/// Write handle bound to one changeset of one branch.
///
/// `prepare` claims the branch's merge gate until the sink flushes or
/// closes, so a validated changeset cannot be invalidated by a
/// concurrent merge before it lands. Mutating a closed sink is a caller
/// bug and panics.
pub struct BranchSink {
    branch: Branch,
    changeset: Arc<Changeset>,
    id: u64,
    prepared: bool,
    closed: bool,
}

impl BranchSink {
    fn assert_open(&self, op: &str) {
        assert!(!self.closed, "{op} on a closed sink");
    }

    fn release_gate(&self) {
        let mut state = self.branch.inner.state.lock();
        if state.gate.as_ref().map(|gate| gate.sink) == Some(self.id) {
            state.gate = None;
            self.branch.inner.gate_released.notify_all();
        }
    }
}

impl StatementSink for BranchSink {
    fn approve(&mut self, statement: Statement) -> Result<()> {
        self.assert_open("approve");
        self.changeset.approve(statement);
        Ok(())
    }

    fn deprecate(&mut self, statement: Statement) -> Result<()> {
        self.assert_open("deprecate");
        self.changeset.deprecate(statement);
        Ok(())
    }

    fn clear(&mut self, contexts: &ContextSpec) -> Result<()> {
        self.assert_open("clear");
        self.changeset.clear(contexts);
        Ok(())
    }

    fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.assert_open("set_namespace");
        self.changeset.set_namespace(prefix, name);
        Ok(())
    }

    fn remove_namespace(&mut self, prefix: &str) -> Result<()> {
        self.assert_open("remove_namespace");
        self.changeset.remove_namespace(prefix);
        Ok(())
    }

    fn clear_namespaces(&mut self) -> Result<()> {
        self.assert_open("clear_namespaces");
        self.changeset.clear_namespaces();
        Ok(())
    }

    fn observe(&mut self, pattern: &StatementPattern) -> Result<()> {
        self.assert_open("observe");
        self.changeset.observe(pattern.clone());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.assert_open("prepare");
        if !self.prepared {
            let mut state = self.branch.inner.state.lock();
            while state.gate.is_some() {
                self.branch.inner.gate_released.wait(&mut state);
            }
            state.gate = Some(GateHolder {
                sink: self.id,
                thread: std::thread::current().id(),
            });
            drop(state);
            self.prepared = true;
            // merges are gated out now, so the prepend set is frozen
            if let Err(e) = self.changeset.validate() {
                // a failed validation ends the commit window right away,
                // leaving the branch usable for a retry
                self.prepared = false;
                self.release_gate();
                return Err(e);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.assert_open("flush");
        let holder = self.prepared.then_some(self.id);
        self.branch.merge(&self.changeset, holder);
        if self.prepared {
            // the changeset is merged, so the commit window is over
            self.prepared = false;
            self.release_gate();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.release_gate();
        {
            let mut state = self.branch.inner.state.lock();
            // a never-merged changeset is abandoned with its sink
            state.pending.retain(|cs| !Arc::ptr_eq(cs, &self.changeset));
        }
        self.branch.auto_flush();
        Ok(())
    }
}

impl Drop for BranchSink {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

// ---------------------------------------------------------------------------
// BranchDataset
// ---------------------------------------------------------------------------

/// Read handle over a branch: the layered view plus the branch
/// bookkeeping that must run when the reader goes away (release the
/// observer slot, compress the chain, attempt auto-flush).
struct BranchDataset {
    branch: Branch,
    /// `None` only mid-drop; the layers drop first so their refbacks are
    /// gone before compression runs
    inner: Option<Box<dyn StatementDataset>>,
}

impl BranchDataset {
    fn inner(&self) -> &dyn StatementDataset {
        self.inner.as_deref().expect("dataset accessed during drop")
    }
}

impl StatementDataset for BranchDataset {
    fn get(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>> {
        self.inner().get(pattern)
    }

    fn context_ids(&self) -> Result<Vec<Resource>> {
        self.inner().context_ids()
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        self.inner().namespaces()
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        self.inner().namespace(prefix)
    }
}

impl Drop for BranchDataset {
    fn drop(&mut self) {
        // release refbacks (and merge any observation changeset) first
        self.inner.take();
        let mut state = self.branch.inner.state.lock();
        debug_assert!(state.observers > 0, "observer count underflow");
        state.observers = state.observers.saturating_sub(1);
        Branch::compress_locked(&mut state);
        self.branch.auto_flush_locked(&mut state);
    }
}
