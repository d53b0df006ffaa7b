//! Known graphs and per-triple context membership.
//!
//! The registry file lists every graph that has been registered, either
//! explicitly or by adding a triple to it. Which graphs hold a given triple is
//! recorded on the triple's canonical (context-less) index entry, so the union
//! view and `contexts(triple)` need a single read.

use crate::errors::Result;
use crate::index::IndexSet;
use crate::keys::{encode_context_set, IdTriple, TermId};
use crate::kv::{KvStore, PrefixScan};
use crate::options::TripleKind;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct ContextRegistry {
    store: Arc<dyn KvStore>,
    scan_batch: usize,
}

impl ContextRegistry {
    pub fn new(store: Arc<dyn KvStore>, scan_batch: usize) -> Self {
        Self { store, scan_batch }
    }

    pub fn register(&self, context: TermId) -> Result<()> {
        self.store.put(&context.to_bytes(), b"")
    }

    pub fn deregister(&self, context: TermId) -> Result<()> {
        self.store.delete(&context.to_bytes())
    }

    pub fn is_registered(&self, context: TermId) -> Result<bool> {
        self.store.contains(&context.to_bytes())
    }

    /// Registered context ids, in key order.
    pub fn ids(&self) -> impl Iterator<Item = Result<TermId>> + '_ {
        PrefixScan::new(self.store.as_ref(), Vec::new(), self.scan_batch)
            .map(|entry| entry.and_then(|(key, _)| TermId::parse(&key)))
    }

    pub fn len(&self) -> Result<usize> {
        let mut n = 0usize;
        for id in self.ids() {
            id?;
            n += 1;
        }
        Ok(n)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.truncate()
    }
}

/// Records `spo` in `context`. Returns false, touching nothing, when the
/// triple is already present in that context.
pub fn add_to_context(
    indexes: &IndexSet,
    registry: &ContextRegistry,
    context: TermId,
    spo: &IdTriple,
    kind: TripleKind,
) -> Result<bool> {
    if indexes.contains(Some(context), spo)? {
        return Ok(false);
    }
    registry.register(context)?;
    let mut contexts = indexes.context_set(spo)?;
    contexts.insert(context);
    let canonical = encode_context_set(&contexts);
    let mut entries: Vec<(Option<TermId>, Option<&[u8]>)> = vec![(Some(context), Some(&b""[..]))];
    // quoted triples stay out of the union view
    if !kind.is_quoted() {
        entries.push((None, Some(canonical.as_slice())));
    }
    indexes.write_all(spo, &entries)?;
    Ok(true)
}

/// Drops `spo` from `context`, shrinking or deleting its canonical entry.
pub fn remove_from_context(indexes: &IndexSet, context: TermId, spo: &IdTriple) -> Result<()> {
    let mut contexts = indexes.context_set(spo)?;
    contexts.remove(&context);
    if contexts.is_empty() {
        indexes.write_all(spo, &[(Some(context), None), (None, None)])
    } else {
        let canonical = encode_context_set(&contexts);
        indexes.write_all(spo, &[(Some(context), None), (None, Some(canonical.as_slice()))])
    }
}

/// Drops `spo` from every context listed on its canonical entry, and the
/// canonical entry itself.
pub fn remove_everywhere(
    indexes: &IndexSet,
    spo: &IdTriple,
    contexts: &BTreeSet<TermId>,
) -> Result<()> {
    let entries: Vec<(Option<TermId>, Option<&[u8]>)> = contexts
        .iter()
        .map(|context| (Some(*context), None))
        .chain(std::iter::once((None, None)))
        .collect();
    indexes.write_all(spo, &entries)
}
