//! Store façade: snapshot isolation over raw backing sources
//!
//! Wraps the explicit and inferred backing sources of a store in two
//! long-lived auto-flushing branches. The branches buffer committed
//! changes as changeset chains, which is what upgrades a backing source
//! with weak isolation to snapshot semantics: readers pin the branch
//! snapshot plus the chain as merged at open time.

use crate::branch::Branch;
use crate::union::UnionBranch;
use quadstore_core::{IsolationLevel, Result, StatementBranch, StatementSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Flush a branch down to its backing source whenever it becomes
    /// idle. Disable to keep changes buffered until an explicit
    /// branch-level flush.
    pub auto_flush: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { auto_flush: true }
    }
}

/// Snapshot-isolating façade over a store's explicit and inferred
/// backing sources.
pub struct SnapshotStore {
    explicit_backing: Arc<dyn StatementSource>,
    inferred_backing: Arc<dyn StatementSource>,
    explicit: Arc<Branch>,
    inferred: Arc<Branch>,
}

impl SnapshotStore {
    pub fn new(
        explicit: Arc<dyn StatementSource>,
        inferred: Arc<dyn StatementSource>,
        config: StoreConfig,
    ) -> Self {
        let branch = |backing: &Arc<dyn StatementSource>| {
            if config.auto_flush {
                Arc::new(Branch::auto_flushing(backing.clone()))
            } else {
                Arc::new(Branch::new(backing.clone()))
            }
        };
        SnapshotStore {
            explicit: branch(&explicit),
            inferred: branch(&inferred),
            explicit_backing: explicit,
            inferred_backing: inferred,
        }
    }

    /// Source for explicitly asserted statements.
    ///
    /// When the level does not demand snapshot isolation and the branch
    /// holds no buffered changes, the raw backing source serves directly
    /// and the branch machinery stays out of the read path.
    pub fn explicit_source(&self, level: IsolationLevel) -> Arc<dyn StatementSource> {
        Self::select(&self.explicit, &self.explicit_backing, level)
    }

    /// Source for inferred statements.
    pub fn inferred_source(&self, level: IsolationLevel) -> Arc<dyn StatementSource> {
        Self::select(&self.inferred, &self.inferred_backing, level)
    }

    fn select(
        branch: &Arc<Branch>,
        backing: &Arc<dyn StatementSource>,
        level: IsolationLevel,
    ) -> Arc<dyn StatementSource> {
        if !level.is_compatible_with(IsolationLevel::Snapshot) && !branch.has_changes() {
            backing.clone()
        } else {
            branch.clone()
        }
    }

    /// Explicit and inferred statements as one source; writes reach the
    /// explicit branch only
    pub fn union_source(&self) -> UnionBranch {
        UnionBranch::new(
            self.explicit.clone() as Arc<dyn StatementBranch>,
            self.inferred.clone() as Arc<dyn StatementBranch>,
        )
    }

    /// Push both branches down to their backing sources
    pub fn flush(&self) -> Result<()> {
        StatementBranch::flush(self.explicit.as_ref())?;
        StatementBranch::flush(self.inferred.as_ref())
    }

    /// Close both branches, keeping going past the first failure
    pub fn close(&self) -> Result<()> {
        let explicit = StatementSource::close(self.explicit.as_ref());
        let inferred = StatementSource::close(self.inferred.as_ref());
        explicit.and(inferred)
    }
}
