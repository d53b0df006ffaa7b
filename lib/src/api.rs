//! Host-facing surface: the [`TripleStore`] capability trait and the values it
//! exchanges.
//!
//! A host graph library depends only on this trait; [`crate::QuadStore`] is the
//! persistent implementation.

use crate::errors::Result;
use crate::options::{OpenMode, OpenStatus, TripleKind};
use std::path::Path;

/// Initializes logging defaults: `QUADSTORE_LOG`, when set, replaces `RUST_LOG`.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("QUADSTORE_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}

/// A subject, predicate and object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermTriple<T> {
    pub subject: T,
    pub predicate: T,
    pub object: T,
}

impl<T> TermTriple<T> {
    pub fn new(subject: T, predicate: T, object: T) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl<T> From<[T; 3]> for TermTriple<T> {
    fn from([subject, predicate, object]: [T; 3]) -> Self {
        Self::new(subject, predicate, object)
    }
}

/// One result of [`TripleStore::triples`]: the triple and the contexts it was
/// found in. A context-scoped query reports only the scoped context.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTriple<T> {
    pub triple: TermTriple<T>,
    pub contexts: Vec<T>,
}

pub type TripleIter<'a, T> = Box<dyn Iterator<Item = Result<MatchedTriple<T>>> + 'a>;
pub type ContextIter<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

/// The operations a host graph API calls on its storage backend.
///
/// Every operation except `open`, `destroy` and `is_open` fails with
/// [`crate::StoreError::NotOpen`] on a closed store. Pattern arguments use
/// `None` as a wildcard; a `None` context means the union of all graphs.
pub trait TripleStore {
    type Term: Clone + 'static;

    /// Attaches to (or with [`OpenMode::Create`], lays down) the store at `path`.
    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<OpenStatus>;

    /// Stops background syncing, flushes and releases every file. A no-op when closed.
    fn close(&mut self) -> Result<()>;

    /// Deletes the store directory at `path`. The store must be closed.
    fn destroy(&self, path: &Path) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Adds a triple to `context`. Returns false when it was already there.
    fn add(
        &mut self,
        subject: &Self::Term,
        predicate: &Self::Term,
        object: &Self::Term,
        context: &Self::Term,
        kind: TripleKind,
    ) -> Result<bool>;

    /// Removes matching triples and returns how many were removed.
    ///
    /// With everything unbound the store is cleared. With a context bound only
    /// that graph loses the matches; without one the matches leave every
    /// graph. An all-wildcard pattern within a context also deregisters it.
    fn remove(
        &mut self,
        subject: Option<&Self::Term>,
        predicate: Option<&Self::Term>,
        object: Option<&Self::Term>,
        context: Option<&Self::Term>,
    ) -> Result<usize>;

    /// Lazily yields the triples matching the pattern, in index order.
    fn triples(
        &self,
        subject: Option<&Self::Term>,
        predicate: Option<&Self::Term>,
        object: Option<&Self::Term>,
        context: Option<&Self::Term>,
    ) -> Result<TripleIter<'_, Self::Term>>;

    /// Distinct union triples, or the triples of one graph.
    fn len(&self, context: Option<&Self::Term>) -> Result<usize>;

    fn is_empty(&self, context: Option<&Self::Term>) -> Result<bool> {
        Ok(self.len(context)? == 0)
    }

    /// Every known graph, or with `triple` the graphs that assert it.
    fn contexts(
        &self,
        triple: Option<(&Self::Term, &Self::Term, &Self::Term)>,
    ) -> Result<ContextIter<'_, Self::Term>>;

    /// Registers a graph without adding triples to it.
    fn add_graph(&mut self, context: &Self::Term) -> Result<()>;

    /// Removes every triple of a graph and deregisters it.
    fn remove_graph(&mut self, context: &Self::Term) -> Result<usize> {
        self.remove(None, None, None, Some(context))
    }
}
