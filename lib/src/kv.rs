//! Ordered byte-keyed storage underneath the indexes.
//!
//! `KvStore` is the only contract the indexing layer relies on: point reads
//! and writes, ordered range reads from a prefix, truncation and a `sync`
//! flush. [`RedbKv`] keeps each store in its own redb file; [`MemoryKv`] is a
//! `BTreeMap` used for temporary stores and tests.

use crate::config::StoreOptions;
use crate::errors::{Result, StoreError};
use log::debug;
use redb::{Database, Durability, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// One write in a [`KvStore::write_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Returns at most `limit` entries whose keys start with `prefix`, in key
    /// order. With `after` set, only keys strictly greater than it are returned.
    fn scan_batch(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Removes every entry.
    fn truncate(&self) -> Result<()>;

    /// Makes all previous writes durable.
    fn sync(&self) -> Result<()>;

    /// Applies `ops` in order. Stores that can do so commit them together.
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        for op in ops {
            match op {
                WriteOp::Put(key, value) => self.put(&key, &value)?,
                WriteOp::Delete(key) => self.delete(&key)?,
            }
        }
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Lazy iterator over every entry sharing a prefix.
///
/// Entries are pulled in batches, each from a fresh read, so writes made while
/// the scan is in progress may or may not be observed.
pub struct PrefixScan<'a> {
    store: &'a dyn KvStore,
    prefix: Vec<u8>,
    batch: usize,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    last: Option<Vec<u8>>,
    exhausted: bool,
}

impl<'a> PrefixScan<'a> {
    pub fn new(store: &'a dyn KvStore, prefix: Vec<u8>, batch: usize) -> Self {
        Self {
            store,
            prefix,
            batch: batch.max(1),
            buffer: VecDeque::new(),
            last: None,
            exhausted: false,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn refill(&mut self) -> Result<()> {
        let entries = self
            .store
            .scan_batch(&self.prefix, self.last.as_deref(), self.batch)?;
        if entries.len() < self.batch {
            self.exhausted = true;
        }
        if let Some((k, _)) = entries.last() {
            self.last = Some(k.clone());
        }
        self.buffer.extend(entries);
        Ok(())
    }
}

impl Iterator for PrefixScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// A single redb database file holding one ordered table.
pub struct RedbKv {
    db: Database,
    path: PathBuf,
    durable_writes: bool,
}

impl RedbKv {
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        let db = redb::Builder::new()
            .set_cache_size(options.cache_bytes())
            .create(path)
            .map_err(|e| match e {
                redb::DatabaseError::DatabaseAlreadyOpen => StoreError::Locked(path.to_path_buf()),
                e => e.into(),
            })?;
        // make sure the table exists so readers never see TableDoesNotExist
        let txn = db.begin_write()?;
        {
            txn.open_table(ENTRIES)?;
        }
        txn.commit()?;
        debug!("Opened {}", path.display());
        Ok(Self {
            db,
            path: path.to_path_buf(),
            durable_writes: options.write_safety,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn begin_write(&self) -> Result<redb::WriteTransaction> {
        let mut txn = self.db.begin_write()?;
        if !self.durable_writes {
            txn.set_durability(Durability::None);
        }
        Ok(txn)
    }
}

impl KvStore for RedbKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let value = table.get(key)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn scan_batch(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let lower = match after {
            Some(k) => Bound::Excluded(k),
            None => Bound::Included(prefix),
        };
        let mut out = Vec::new();
        for item in table.range::<&[u8]>((lower, Bound::Unbounded))? {
            let (k, v) = item?;
            let k = k.value();
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.value().to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            for op in &ops {
                match op {
                    WriteOp::Put(key, value) => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    WriteOp::Delete(key) => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn truncate(&self) -> Result<()> {
        let txn = self.begin_write()?;
        txn.delete_table(ENTRIES)?;
        {
            txn.open_table(ENTRIES)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // a durable commit persists every non-durable commit before it
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        txn.commit()?;
        Ok(())
    }
}

/// In-memory ordered map with the same semantics as [`RedbKv`].
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    syncs: AtomicUsize,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `sync` calls received so far.
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("in-memory store lock poisoned".to_string())
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.entries.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        map.remove(key);
        Ok(())
    }

    fn scan_batch(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.entries.read().map_err(|_| poisoned())?;
        let lower = match after {
            Some(k) => Bound::Excluded(k),
            None => Bound::Included(prefix),
        };
        Ok(map
            .range::<[u8], _>((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        for op in ops {
            match op {
                WriteOp::Put(key, value) => {
                    map.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn truncate(&self) -> Result<()> {
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        map.clear();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(store: &dyn KvStore) {
        for key in ["^1^", "^1^2^", "^10^", "^2^", "1^", "a"] {
            store.put(key.as_bytes(), key.as_bytes()).unwrap();
        }
    }

    fn scan_keys(store: &dyn KvStore, prefix: &str, batch: usize) -> Vec<String> {
        PrefixScan::new(store, prefix.as_bytes().to_vec(), batch)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect()
    }

    fn check_prefix_scans(store: &dyn KvStore) {
        fill(store);
        assert_eq!(scan_keys(store, "^1^", 1), vec!["^1^", "^1^2^"]);
        assert_eq!(scan_keys(store, "^", 2), vec!["^10^", "^1^", "^1^2^", "^2^"]);
        assert!(scan_keys(store, "^3^", 4).is_empty());
        assert_eq!(scan_keys(store, "", 100).len(), 6);
    }

    #[test]
    fn memory_prefix_scan_in_batches() {
        check_prefix_scans(&MemoryKv::new());
    }

    #[test]
    fn redb_prefix_scan_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let kv = RedbKv::open(&dir.path().join("t.redb"), &StoreOptions::default()).unwrap();
        check_prefix_scans(&kv);
    }

    #[test]
    fn scan_tolerates_deletes_between_batches() {
        let kv = MemoryKv::new();
        fill(&kv);
        let mut seen = Vec::new();
        for entry in PrefixScan::new(&kv, b"^".to_vec(), 1) {
            let (k, _) = entry.unwrap();
            kv.delete(&k).unwrap();
            seen.push(k);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(kv.len(), 2);
    }

    fn check_write_batch(store: &dyn KvStore) {
        fill(store);
        store
            .write_batch(vec![
                WriteOp::Delete(b"^1^".to_vec()),
                WriteOp::Put(b"^3^".to_vec(), b"x".to_vec()),
                WriteOp::Put(b"^3^".to_vec(), b"y".to_vec()),
                WriteOp::Delete(b"absent".to_vec()),
            ])
            .unwrap();
        assert_eq!(scan_keys(store, "^", 10), vec!["^10^", "^1^2^", "^2^", "^3^"]);
        assert_eq!(store.get(b"^3^").unwrap(), Some(b"y".to_vec()));
        store.write_batch(Vec::new()).unwrap();
    }

    #[test]
    fn memory_write_batch_applies_in_order() {
        check_write_batch(&MemoryKv::new());
    }

    #[test]
    fn redb_write_batch_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let kv = RedbKv::open(&dir.path().join("t.redb"), &StoreOptions::default()).unwrap();
        check_write_batch(&kv);
    }

    #[test]
    fn redb_refuses_a_second_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.redb");
        let first = RedbKv::open(&path, &StoreOptions::default()).unwrap();
        assert!(matches!(
            RedbKv::open(&path, &StoreOptions::default()),
            Err(StoreError::Locked(p)) if p == path
        ));
        drop(first);
        assert!(RedbKv::open(&path, &StoreOptions::default()).is_ok());
    }

    #[test]
    fn redb_survives_reopen_after_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.redb");
        {
            let kv = RedbKv::open(&path, &StoreOptions::default()).unwrap();
            kv.put(b"k", b"v").unwrap();
            kv.delete(b"missing").unwrap();
            kv.sync().unwrap();
        }
        let kv = RedbKv::open(&path, &StoreOptions::default()).unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v".to_vec()));
        kv.truncate().unwrap();
        assert!(!kv.contains(b"k").unwrap());
    }
}
