//! Transaction isolation levels
//!
//! Levels form a total order from weakest to strongest. A requested level
//! is *compatible with* a guarantee when it is at least as strong, so
//! callers ask "does this request require snapshot semantics" with
//! [`IsolationLevel::is_compatible_with`].
//!
//! What each tier buys in the layering protocol:
//! - `Snapshot` and up: a branch caches one backing snapshot for its whole
//!   lifetime, so every dataset it hands out observes the same backing
//!   point in time.
//! - `Serializable`: reads are additionally recorded as observations and
//!   validated at commit against concurrently merged changesets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested strength of consistency for a read or write handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// No isolation: reads may observe uncommitted, in-flight changes
    None,
    /// Reads observe only committed changes, with no point-in-time pinning
    ReadCommitted,
    /// All reads in one branch observe a single backing snapshot
    Snapshot,
    /// Snapshot, plus repeatable reads within one dataset
    SnapshotRead,
    /// Snapshot, plus observed reads are validated at commit
    Serializable,
}

impl IsolationLevel {
    /// Is this level at least as strong as `required`?
    pub fn is_compatible_with(self, required: IsolationLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::None => "NONE",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::SnapshotRead => "SNAPSHOT_READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(IsolationLevel::None < IsolationLevel::ReadCommitted);
        assert!(IsolationLevel::ReadCommitted < IsolationLevel::Snapshot);
        assert!(IsolationLevel::Snapshot < IsolationLevel::SnapshotRead);
        assert!(IsolationLevel::SnapshotRead < IsolationLevel::Serializable);
    }

    #[test]
    fn test_compatibility() {
        assert!(IsolationLevel::Serializable.is_compatible_with(IsolationLevel::Snapshot));
        assert!(IsolationLevel::Snapshot.is_compatible_with(IsolationLevel::Snapshot));
        assert!(!IsolationLevel::ReadCommitted.is_compatible_with(IsolationLevel::Snapshot));
        assert!(!IsolationLevel::Snapshot.is_compatible_with(IsolationLevel::Serializable));
        // every level is compatible with NONE
        assert!(IsolationLevel::None.is_compatible_with(IsolationLevel::None));
    }
}
