//! # Quadstore Transact
//!
//! Transactional layering over any statement source, built from immutable
//! deltas.
//!
//! This crate provides:
//! - Changesets (the isolated delta of one pending transaction)
//! - Layered point-in-time datasets (changeset chains over a backing view)
//! - Branches (forkable sources that buffer committed changesets before
//!   flushing them to their backing source)
//! - Serializable conflict detection (observed reads validated against
//!   concurrently merged changes)
//! - A snapshot-isolating store façade over explicit and inferred tiers
//!
//! ## Example
//!
//! ```ignore
//! use quadstore_transact::Branch;
//! use quadstore_core::{IsolationLevel, StatementSource};
//!
//! let branch = Branch::new(backing);
//! let mut sink = branch.sink(IsolationLevel::Snapshot)?;
//! sink.approve(statement)?;
//! sink.prepare()?;
//! sink.flush()?;
//! sink.close()?;
//!
//! // the write is visible through the branch, not yet in `backing`
//! let dataset = branch.dataset(IsolationLevel::Snapshot)?;
//! ```

pub mod branch;
pub mod changeset;
pub mod dataset;
pub mod store;
pub mod union;

// Re-exports
pub use branch::{Branch, BranchSink};
pub use changeset::Changeset;
pub use dataset::{DerivedDataset, ObservingDataset, SharedDataset, UnionDataset};
pub use store::{SnapshotStore, StoreConfig};
pub use union::UnionBranch;

#[cfg(test)]
pub(crate) mod testutil;
