//! Interning of term encodings into compact, monotonically increasing ids.
//!
//! Two persisted maps (`k2i`: encoding to id, `i2k`: id to encoding) plus a
//! counter kept under [`TERM_COUNTER_KEY`] in `i2k`. Regular `i2k` keys are
//! decimal digits, so the counter key cannot collide with an entry. Ids are
//! never reclaimed.

use crate::errors::{Result, StoreError};
use crate::keys::TermId;
use crate::kv::{KvStore, WriteOp};
use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

pub const TERM_COUNTER_KEY: &[u8] = b"__terms__";

pub struct TermDictionary {
    k2i: Arc<dyn KvStore>,
    i2k: Arc<dyn KvStore>,
    terms: Mutex<u64>,
    ids: Mutex<LruCache<Vec<u8>, TermId>>,
    encodings: Mutex<LruCache<TermId, Vec<u8>>>,
}

fn guard<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| StoreError::Storage("term dictionary lock poisoned".to_string()))
}

impl TermDictionary {
    /// Attaches to the two dictionary stores and restores the counter.
    /// A missing counter means a fresh store.
    pub fn open(
        k2i: Arc<dyn KvStore>,
        i2k: Arc<dyn KvStore>,
        cache_capacity: NonZeroUsize,
    ) -> Result<Self> {
        let terms = match i2k.get(TERM_COUNTER_KEY)? {
            Some(raw) => TermId::parse(&raw)?.get(),
            None => 0,
        };
        debug!("Term dictionary holds {} terms", terms);
        Ok(Self {
            k2i,
            i2k,
            terms: Mutex::new(terms),
            ids: Mutex::new(LruCache::new(cache_capacity)),
            encodings: Mutex::new(LruCache::new(cache_capacity)),
        })
    }

    /// Number of encodings ever interned.
    pub fn len(&self) -> Result<u64> {
        Ok(*guard(&self.terms)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Id of `encoding` if it has been interned, without assigning one.
    pub fn lookup(&self, encoding: &[u8]) -> Result<Option<TermId>> {
        if let Some(id) = guard(&self.ids)?.get(encoding) {
            return Ok(Some(*id));
        }
        let Some(raw) = self.k2i.get(encoding)? else {
            return Ok(None);
        };
        let id = TermId::parse(&raw)?;
        self.remember(encoding, id)?;
        Ok(Some(id))
    }

    /// Id of `encoding`, assigning the next one on first sight.
    pub fn intern(&self, encoding: &[u8]) -> Result<TermId> {
        if let Some(id) = self.lookup(encoding)? {
            return Ok(id);
        }
        let mut terms = guard(&self.terms)?;
        // another caller may have interned it while we waited for the counter
        if let Some(raw) = self.k2i.get(encoding)? {
            let id = TermId::parse(&raw)?;
            self.remember(encoding, id)?;
            return Ok(id);
        }
        let next = *terms + 1;
        let id = TermId::new(next)
            .ok_or_else(|| StoreError::CorruptEntry("term counter overflow".to_string()))?;
        let id_bytes = id.to_bytes();
        // the counter commits with the reverse entry; a crash before the
        // forward entry leaves a gap, never a reused id
        self.i2k.write_batch(vec![
            WriteOp::Put(TERM_COUNTER_KEY.to_vec(), id_bytes.clone()),
            WriteOp::Put(id_bytes.clone(), encoding.to_vec()),
        ])?;
        self.k2i.put(encoding, &id_bytes)?;
        *terms = next;
        self.remember(encoding, id)?;
        Ok(id)
    }

    /// Encoding interned under `id`.
    pub fn resolve(&self, id: TermId) -> Result<Vec<u8>> {
        if let Some(encoding) = guard(&self.encodings)?.get(&id) {
            return Ok(encoding.clone());
        }
        let encoding = self
            .i2k
            .get(&id.to_bytes())?
            .ok_or(StoreError::UnknownId(id))?;
        self.remember(&encoding, id)?;
        Ok(encoding)
    }

    fn remember(&self, encoding: &[u8], id: TermId) -> Result<()> {
        guard(&self.ids)?.put(encoding.to_vec(), id);
        guard(&self.encodings)?.put(id, encoding.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn stores() -> (Arc<dyn KvStore>, Arc<dyn KvStore>) {
        (Arc::new(MemoryKv::new()), Arc::new(MemoryKv::new()))
    }

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn intern_is_idempotent_and_monotone() {
        let (k2i, i2k) = stores();
        let dict = TermDictionary::open(k2i, i2k, cap(16)).unwrap();
        let a = dict.intern(b"<urn:a>").unwrap();
        let b = dict.intern(b"<urn:b>").unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(dict.intern(b"<urn:a>").unwrap(), a);
        assert_eq!(dict.len().unwrap(), 2);
        assert_eq!(dict.resolve(b).unwrap(), b"<urn:b>");
    }

    #[test]
    fn lookup_does_not_assign() {
        let (k2i, i2k) = stores();
        let dict = TermDictionary::open(k2i, i2k, cap(16)).unwrap();
        assert_eq!(dict.lookup(b"<urn:x>").unwrap(), None);
        assert!(dict.is_empty().unwrap());
    }

    #[test]
    fn counter_survives_reopen() {
        let (k2i, i2k) = stores();
        {
            let dict = TermDictionary::open(k2i.clone(), i2k.clone(), cap(16)).unwrap();
            dict.intern(b"<urn:a>").unwrap();
            dict.intern(b"<urn:b>").unwrap();
        }
        let dict = TermDictionary::open(k2i, i2k, cap(16)).unwrap();
        assert_eq!(dict.len().unwrap(), 2);
        assert_eq!(dict.intern(b"<urn:c>").unwrap().get(), 3);
        assert_eq!(dict.lookup(b"<urn:a>").unwrap().map(TermId::get), Some(1));
    }

    #[test]
    fn eviction_never_changes_answers() {
        let (k2i, i2k) = stores();
        let dict = TermDictionary::open(k2i, i2k, cap(1)).unwrap();
        let ids: Vec<TermId> = (0..10)
            .map(|i| dict.intern(format!("<urn:t{}>", i).as_bytes()).unwrap())
            .collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(dict.resolve(*id).unwrap(), format!("<urn:t{}>", i).into_bytes());
            assert_eq!(dict.intern(format!("<urn:t{}>", i).as_bytes()).unwrap(), *id);
        }
    }

    #[test]
    fn unknown_id_is_an_error() {
        let (k2i, i2k) = stores();
        let dict = TermDictionary::open(k2i, i2k, cap(4)).unwrap();
        let missing = TermId::new(99).unwrap();
        assert!(matches!(dict.resolve(missing), Err(StoreError::UnknownId(id)) if id == missing));
    }
}
