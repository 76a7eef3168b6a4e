//! # Quadstore Core
//!
//! Shared vocabulary for the quadstore workspace: the RDF statement model,
//! isolation levels, error types, and the storage traits that a backing
//! statement source must implement.
//!
//! This crate deliberately contains no storage logic. The transactional
//! layering protocol lives in `quadstore-transact`; reference backing
//! storage lives in `quadstore-memory`. Both consume the traits defined
//! here, so external storage engines can plug in without depending on
//! either.

pub mod error;
pub mod isolation;
pub mod namespace;
pub mod source;
pub mod statement;
pub mod term;

pub use error::{Result, StoreError};
pub use isolation::IsolationLevel;
pub use namespace::Namespace;
pub use source::{StatementBranch, StatementDataset, StatementIter, StatementSink, StatementSource};
pub use statement::{ContextSpec, Statement, StatementPattern};
pub use term::{BNode, Iri, Resource, Value};
