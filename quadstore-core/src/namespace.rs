//! Namespace bindings
//!
//! A namespace binds a short prefix (`ex`) to a name IRI
//! (`http://example.org/`). Bindings are plain value types; the
//! add/remove/clear layering over them lives in `quadstore-transact`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A prefix-to-name binding.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Short prefix, without the trailing colon
    pub prefix: String,
    /// Namespace name IRI
    pub name: String,
}

impl Namespace {
    /// Create a binding
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Namespace {
            prefix: prefix.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: <{}>", self.prefix, self.name)
    }
}
