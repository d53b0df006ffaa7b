//! The three permuted indexes.
//!
//! Every (context, triple) entry is written to all three rotations with the
//! same value, so any one of them can answer a lookup and any bound prefix
//! is a contiguous range in at least one of them.

use crate::errors::Result;
use crate::keys::{decode_context_set, IdTriple, Rotation, TermId};
use crate::kv::{KvStore, PrefixScan, WriteOp};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct IndexSet {
    indexes: [Arc<dyn KvStore>; 3],
    scan_batch: usize,
}

impl IndexSet {
    /// `indexes` are ordered by rotation offset: spo, pos, osp.
    pub fn new(indexes: [Arc<dyn KvStore>; 3], scan_batch: usize) -> Self {
        Self {
            indexes,
            scan_batch,
        }
    }

    pub fn store(&self, rotation: Rotation) -> &dyn KvStore {
        self.indexes[rotation.offset()].as_ref()
    }

    /// Entries of one rotation whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, rotation: Rotation, prefix: Vec<u8>) -> PrefixScan<'_> {
        PrefixScan::new(self.store(rotation), prefix, self.scan_batch)
    }

    /// Number of entries under `prefix` in the spo index.
    pub fn count_prefix(&self, prefix: Vec<u8>) -> Result<usize> {
        let mut n = 0usize;
        for entry in self.scan_prefix(Rotation::Spo, prefix) {
            entry?;
            n += 1;
        }
        Ok(n)
    }

    pub fn contains(&self, context: Option<TermId>, spo: &IdTriple) -> Result<bool> {
        self.store(Rotation::Spo)
            .contains(&Rotation::Spo.encode_key(context, spo))
    }

    /// Contexts recorded on the canonical entry of `spo`; empty when absent.
    pub fn context_set(&self, spo: &IdTriple) -> Result<BTreeSet<TermId>> {
        match self
            .store(Rotation::Spo)
            .get(&Rotation::Spo.encode_key(None, spo))?
        {
            Some(value) => decode_context_set(&value),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Applies the (context, value) writes for `spo` to every rotation, one
    /// batch per index. A `None` value deletes the entry.
    pub fn write_all(
        &self,
        spo: &IdTriple,
        entries: &[(Option<TermId>, Option<&[u8]>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for rotation in Rotation::ALL {
            let ops = entries
                .iter()
                .map(|(context, value)| {
                    let key = rotation.encode_key(*context, spo);
                    match value {
                        Some(v) => WriteOp::Put(key, v.to_vec()),
                        None => WriteOp::Delete(key),
                    }
                })
                .collect();
            self.store(rotation).write_batch(ops)?;
        }
        Ok(())
    }

    /// Writes the entry for (context, spo) to every rotation.
    pub fn insert_all(&self, context: Option<TermId>, spo: &IdTriple, value: &[u8]) -> Result<()> {
        self.write_all(spo, &[(context, Some(value))])
    }

    /// Deletes the entry for (context, spo) from every rotation.
    pub fn remove_all(&self, context: Option<TermId>, spo: &IdTriple) -> Result<()> {
        self.write_all(spo, &[(context, None)])
    }

    pub fn truncate(&self) -> Result<()> {
        for index in &self.indexes {
            index.truncate()?;
        }
        Ok(())
    }
}
