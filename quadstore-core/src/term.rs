//! RDF term model
//!
//! Terms are immutable value types with structural identity: two terms are
//! the same term exactly when their components are equal. Ordering is
//! derived and total so that terms (and the statements built from them) can
//! live in sorted sets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An IRI reference.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Iri(pub String);

impl Iri {
    /// Create an IRI from anything string-like
    pub fn new(iri: impl Into<String>) -> Self {
        Iri(iri.into())
    }

    /// The IRI string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// A blank node, identified by its label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BNode(pub String);

impl BNode {
    /// Create a blank node with the given label
    pub fn new(label: impl Into<String>) -> Self {
        BNode(label.into())
    }
}

impl fmt::Display for BNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_:{}", self.0)
    }
}

/// A resource: the subject/context position of a statement.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// Named resource
    Iri(Iri),
    /// Anonymous resource
    BNode(BNode),
}

impl Resource {
    /// Convenience constructor for a named resource
    pub fn iri(iri: impl Into<String>) -> Self {
        Resource::Iri(Iri::new(iri))
    }

    /// Convenience constructor for a blank node
    pub fn bnode(label: impl Into<String>) -> Self {
        Resource::BNode(BNode::new(label))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Iri(iri) => iri.fmt(f),
            Resource::BNode(b) => b.fmt(f),
        }
    }
}

impl From<Iri> for Resource {
    fn from(iri: Iri) -> Self {
        Resource::Iri(iri)
    }
}

impl From<BNode> for Resource {
    fn from(b: BNode) -> Self {
        Resource::BNode(b)
    }
}

/// A value: the object position of a statement.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Resource-valued object (IRI or blank node)
    Resource(Resource),
    /// Literal object
    Literal {
        /// Lexical form
        lexical: String,
        /// Datatype IRI (`xsd:string` for plain literals)
        datatype: Iri,
        /// Language tag for language-tagged strings
        language: Option<String>,
    },
}

/// Datatype IRI for plain string literals
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

impl Value {
    /// Convenience constructor for an IRI-valued object
    pub fn iri(iri: impl Into<String>) -> Self {
        Value::Resource(Resource::iri(iri))
    }

    /// Convenience constructor for a plain string literal
    pub fn literal(lexical: impl Into<String>) -> Self {
        Value::Literal {
            lexical: lexical.into(),
            datatype: Iri::new(XSD_STRING),
            language: None,
        }
    }

    /// Convenience constructor for a typed literal
    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Value::Literal {
            lexical: lexical.into(),
            datatype: Iri::new(datatype),
            language: None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Resource(r) => r.fmt(f),
            Value::Literal {
                lexical,
                datatype,
                language,
            } => match language {
                Some(lang) => write!(f, "{:?}@{}", lexical, lang),
                None => write!(f, "{:?}^^{}", lexical, datatype),
            },
        }
    }
}

impl From<Resource> for Value {
    fn from(r: Resource) -> Self {
        Value::Resource(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Resource::iri("http://ex.org/a"), Resource::iri("http://ex.org/a"));
        assert_ne!(Resource::iri("http://ex.org/a"), Resource::bnode("a"));
        assert_eq!(Value::literal("x"), Value::literal("x"));
        assert_ne!(Value::literal("x"), Value::typed_literal("x", "http://ex.org/dt"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Resource::iri("http://ex.org/a").to_string(), "<http://ex.org/a>");
        assert_eq!(Resource::bnode("b1").to_string(), "_:b1");
        assert_eq!(Value::literal("hi").to_string(), format!("{:?}^^<{}>", "hi", XSD_STRING));
    }
}
