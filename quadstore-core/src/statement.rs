//! Statements and statement patterns
//!
//! A [`Statement`] is an immutable (subject, predicate, object, context)
//! fact; `context: None` places it in the default graph. Identity is
//! structural, never reference-based.
//!
//! A [`StatementPattern`] is the canonical form of a read: each of
//! subject/predicate/object is either bound or a wildcard, and the context
//! selector is a normalized [`ContextSpec`]. Patterns hash and compare
//! structurally so sets of recorded observations are deterministic.

use crate::term::{Iri, Resource, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single (subject, predicate, object, context) fact.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Statement {
    /// Subject resource
    pub subject: Resource,
    /// Predicate IRI
    pub predicate: Iri,
    /// Object value
    pub object: Value,
    /// Context (named graph); `None` is the default graph
    pub context: Option<Resource>,
}

impl Statement {
    /// Create a statement in the default graph
    pub fn new(subject: Resource, predicate: Iri, object: Value) -> Self {
        Statement {
            subject,
            predicate,
            object,
            context: None,
        }
    }

    /// Create a statement in the given context
    pub fn with_context(
        subject: Resource,
        predicate: Iri,
        object: Value,
        context: Option<Resource>,
    ) -> Self {
        Statement {
            subject,
            predicate,
            object,
            context,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(
                f,
                "{} {} {} {}",
                self.subject, self.predicate, self.object, ctx
            ),
            None => write!(f, "{} {} {}", self.subject, self.predicate, self.object),
        }
    }
}

/// Context selector for reads, clears, and observations.
///
/// Calling convention (mirrored from the store's public API):
/// - omitting contexts entirely means *all graphs* ([`ContextSpec::Any`]);
/// - an explicit empty list means *default graph only*
///   (`Exact([None])` after normalization);
/// - a non-empty list names the graphs to address, where `None` addresses
///   the default graph.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContextSpec {
    /// All graphs
    Any,
    /// Exactly the listed graphs, sorted and deduplicated.
    /// `None` entries address the default graph.
    Exact(Vec<Option<Resource>>),
}

impl ContextSpec {
    /// Normalize an explicit context list.
    ///
    /// An empty list maps to "default graph only", matching the convention
    /// that omitting the argument (not this constructor) means all graphs.
    pub fn exact(contexts: impl IntoIterator<Item = Option<Resource>>) -> Self {
        let mut ctxs: Vec<Option<Resource>> = contexts.into_iter().collect();
        if ctxs.is_empty() {
            ctxs.push(None);
        }
        ctxs.sort();
        ctxs.dedup();
        ContextSpec::Exact(ctxs)
    }

    /// Selector for the default graph only
    pub fn default_graph() -> Self {
        ContextSpec::Exact(vec![None])
    }

    /// Selector for a single named graph
    pub fn context(ctx: Resource) -> Self {
        ContextSpec::Exact(vec![Some(ctx)])
    }

    /// Does this selector admit the given statement context?
    pub fn admits(&self, context: &Option<Resource>) -> bool {
        match self {
            ContextSpec::Any => true,
            ContextSpec::Exact(ctxs) => ctxs.contains(context),
        }
    }

    /// The listed contexts, or `None` for the all-graphs selector
    pub fn listed(&self) -> Option<&[Option<Resource>]> {
        match self {
            ContextSpec::Any => None,
            ContextSpec::Exact(ctxs) => Some(ctxs),
        }
    }
}

impl Default for ContextSpec {
    fn default() -> Self {
        ContextSpec::Any
    }
}

/// A canonicalized read pattern: bound terms or wildcards plus a context
/// selector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementPattern {
    /// Bound subject, or wildcard
    pub subject: Option<Resource>,
    /// Bound predicate, or wildcard
    pub predicate: Option<Iri>,
    /// Bound object, or wildcard
    pub object: Option<Value>,
    /// Context selector
    pub contexts: ContextSpec,
}

impl StatementPattern {
    /// Pattern matching every statement in every graph
    pub fn any() -> Self {
        StatementPattern {
            subject: None,
            predicate: None,
            object: None,
            contexts: ContextSpec::Any,
        }
    }

    /// Pattern with the given bound positions, matching all graphs
    pub fn new(
        subject: Option<Resource>,
        predicate: Option<Iri>,
        object: Option<Value>,
    ) -> Self {
        StatementPattern {
            subject,
            predicate,
            object,
            contexts: ContextSpec::Any,
        }
    }

    /// Restrict this pattern to the given context selector
    pub fn in_contexts(mut self, contexts: ContextSpec) -> Self {
        self.contexts = contexts;
        self
    }

    /// Pattern matching exactly one statement
    pub fn of(statement: &Statement) -> Self {
        StatementPattern {
            subject: Some(statement.subject.clone()),
            predicate: Some(statement.predicate.clone()),
            object: Some(statement.object.clone()),
            contexts: ContextSpec::Exact(vec![statement.context.clone()]),
        }
    }

    /// Does the statement match this pattern?
    pub fn matches(&self, statement: &Statement) -> bool {
        if let Some(s) = &self.subject {
            if *s != statement.subject {
                return false;
            }
        }
        if let Some(p) = &self.predicate {
            if *p != statement.predicate {
                return false;
            }
        }
        if let Some(o) = &self.object {
            if *o != statement.object {
                return false;
            }
        }
        self.contexts.admits(&statement.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(s: &str, p: &str, o: &str, ctx: Option<&str>) -> Statement {
        Statement::with_context(
            Resource::iri(s),
            Iri::new(p),
            Value::iri(o),
            ctx.map(Resource::iri),
        )
    }

    #[test]
    fn test_pattern_wildcards() {
        let t = stmt("http://ex/s", "http://ex/p", "http://ex/o", None);
        assert!(StatementPattern::any().matches(&t));
        assert!(StatementPattern::new(Some(Resource::iri("http://ex/s")), None, None).matches(&t));
        assert!(!StatementPattern::new(Some(Resource::iri("http://ex/x")), None, None).matches(&t));
        assert!(StatementPattern::of(&t).matches(&t));
    }

    #[test]
    fn test_context_spec_normalization() {
        // explicit empty list means default graph only
        assert_eq!(ContextSpec::exact([]), ContextSpec::default_graph());
        // duplicates collapse, order is canonical
        let g = Resource::iri("http://ex/g");
        let spec = ContextSpec::exact([Some(g.clone()), None, Some(g.clone())]);
        assert_eq!(spec, ContextSpec::Exact(vec![None, Some(g)]));
    }

    #[test]
    fn test_context_admission() {
        let g1 = Resource::iri("http://ex/g1");
        let in_g1 = stmt("http://ex/s", "http://ex/p", "http://ex/o", Some("http://ex/g1"));
        let in_default = stmt("http://ex/s", "http://ex/p", "http://ex/o", None);

        let only_g1 = StatementPattern::any().in_contexts(ContextSpec::context(g1));
        assert!(only_g1.matches(&in_g1));
        assert!(!only_g1.matches(&in_default));

        let default_only = StatementPattern::any().in_contexts(ContextSpec::default_graph());
        assert!(!default_only.matches(&in_g1));
        assert!(default_only.matches(&in_default));
    }
}
