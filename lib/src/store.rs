//! The engine facade: lifecycle, mutation and query orchestration over the
//! dictionary, indexes, context registry and sync scheduler.

use crate::api::{ContextIter, MatchedTriple, TermTriple, TripleIter, TripleStore};
use crate::codec::{NTriplesCodec, TermCodec};
use crate::config::StoreOptions;
use crate::contexts::{add_to_context, remove_everywhere, remove_from_context, ContextRegistry};
use crate::dictionary::TermDictionary;
use crate::errors::{Result, StoreError};
use crate::index::IndexSet;
use crate::keys::{decode_context_set, key_prefix, Rotation, TermId, SEP};
use crate::kv::{KvStore, MemoryKv, PrefixScan, RedbKv};
use crate::options::{OpenMode, OpenStatus, TripleKind};
use crate::planner::{mask_of, readable_mask, PatternPlanner, Plan};
use crate::sync::SyncScheduler;
use fs2::FileExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CONTEXTS_FILE: &str = "contexts";
const K2I_FILE: &str = "k2i";
const I2K_FILE: &str = "i2k";
const LOCK_FILE: &str = "store.lock";

fn file_name(stem: &str) -> String {
    format!("{}.redb", stem)
}

/// Counters reported by [`QuadStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Registered graphs.
    pub contexts: usize,
    /// Distinct triples in the union view.
    pub triples: usize,
    /// Encodings ever interned.
    pub terms: u64,
    /// Completed background flushes since open.
    pub flushes: usize,
}

/// The six ordered stores making up one quad store.
struct StoreFiles {
    indexes: [Arc<dyn KvStore>; 3],
    contexts: Arc<dyn KvStore>,
    k2i: Arc<dyn KvStore>,
    i2k: Arc<dyn KvStore>,
}

impl StoreFiles {
    fn open_dir(dir: &Path, options: &StoreOptions) -> Result<Self> {
        let open = |stem: &str| -> Result<Arc<dyn KvStore>> {
            Ok(Arc::new(RedbKv::open(&dir.join(file_name(stem)), options)?))
        };
        Ok(Self {
            indexes: [
                open(Rotation::Spo.file_stem())?,
                open(Rotation::Pos.file_stem())?,
                open(Rotation::Osp.file_stem())?,
            ],
            contexts: open(CONTEXTS_FILE)?,
            k2i: open(K2I_FILE)?,
            i2k: open(I2K_FILE)?,
        })
    }

    fn in_memory() -> Self {
        let mem = || -> Arc<dyn KvStore> { Arc::new(MemoryKv::new()) };
        Self {
            indexes: [mem(), mem(), mem()],
            contexts: mem(),
            k2i: mem(),
            i2k: mem(),
        }
    }

    fn named(&self) -> [(&'static str, &Arc<dyn KvStore>); 6] {
        [
            (Rotation::Spo.file_stem(), &self.indexes[0]),
            (Rotation::Pos.file_stem(), &self.indexes[1]),
            (Rotation::Osp.file_stem(), &self.indexes[2]),
            (CONTEXTS_FILE, &self.contexts),
            (K2I_FILE, &self.k2i),
            (I2K_FILE, &self.i2k),
        ]
    }

    fn sync_all(&self) -> Result<()> {
        for (_, store) in self.named() {
            store.sync()?;
        }
        Ok(())
    }
}

/// Everything that only exists between `open` and `close`.
struct OpenStore {
    path: Option<PathBuf>,
    files: Arc<StoreFiles>,
    dictionary: TermDictionary,
    indexes: IndexSet,
    registry: ContextRegistry,
    scheduler: SyncScheduler,
    lock: Option<File>,
}

impl OpenStore {
    fn attach(
        files: StoreFiles,
        path: Option<PathBuf>,
        lock: Option<File>,
        options: &StoreOptions,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(options.cache_capacity)
            .ok_or_else(|| StoreError::Config("cache_capacity must be positive".to_string()))?;
        let files = Arc::new(files);
        let dictionary = TermDictionary::open(files.k2i.clone(), files.i2k.clone(), capacity)?;
        let indexes = IndexSet::new(files.indexes.clone(), options.scan_batch);
        let registry = ContextRegistry::new(files.contexts.clone(), options.scan_batch);
        let flushed = files.clone();
        let scheduler = SyncScheduler::start(options.sync.clone(), move || flushed.sync_all())?;
        Ok(Self {
            path,
            files,
            dictionary,
            indexes,
            registry,
            scheduler,
            lock,
        })
    }

    /// Joins the sync thread before the final flush so the two never overlap.
    fn shutdown(mut self) -> Result<()> {
        self.scheduler.stop();
        let flushed = self.files.sync_all();
        if let Some(lock) = self.lock.take() {
            let _ = lock.unlock();
        }
        flushed
    }

    fn term<C: TermCodec>(&self, codec: &C, id: TermId) -> Result<C::Term> {
        codec.decode(&self.dictionary.resolve(id)?)
    }

    fn lookup<C: TermCodec>(&self, codec: &C, term: &C::Term) -> Result<Option<TermId>> {
        self.dictionary.lookup(&codec.encode(term))
    }

    fn intern<C: TermCodec>(&self, codec: &C, term: &C::Term) -> Result<TermId> {
        self.dictionary.intern(&codec.encode(term))
    }

    /// Ids of the bound pattern positions, or None when one of them was never
    /// interned and so cannot match anything.
    fn pattern_ids<C: TermCodec>(
        &self,
        codec: &C,
        spo: [Option<&C::Term>; 3],
    ) -> Result<Option<[Option<TermId>; 3]>> {
        let mut ids = [None; 3];
        for (slot, term) in ids.iter_mut().zip(spo) {
            if let Some(term) = term {
                match self.lookup(codec, term)? {
                    Some(id) => *slot = Some(id),
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(ids))
    }

    fn clear(&self) -> Result<usize> {
        let removed = self.indexes.count_prefix(vec![SEP])?;
        self.indexes.truncate()?;
        self.registry.clear()?;
        info!("Cleared store ({} union triples)", removed);
        Ok(removed)
    }

    fn remove_ids(
        &self,
        planner: &PatternPlanner,
        spo: [Option<TermId>; 3],
        context: Option<TermId>,
    ) -> Result<usize> {
        if let [Some(s), Some(p), Some(o)] = spo {
            let triple = [s, p, o];
            return match context {
                Some(c) if self.indexes.contains(Some(c), &triple)? => {
                    remove_from_context(&self.indexes, c, &triple)?;
                    Ok(1)
                }
                None if self.indexes.contains(None, &triple)? => {
                    let contexts = self.indexes.context_set(&triple)?;
                    remove_everywhere(&self.indexes, &triple, &contexts)?;
                    Ok(1)
                }
                _ => Ok(0),
            };
        }
        let mask = mask_of(&spo);
        let plan = planner.plan(mask);
        debug!(
            "remove {} via {} in context {:?}",
            readable_mask(mask),
            plan.rotation.file_stem(),
            context.map(|c| c.get())
        );
        let mut removed = 0usize;
        for entry in self
            .indexes
            .scan_prefix(plan.rotation, plan.prefix(context, &spo))
        {
            let (key, value) = entry?;
            let (_, triple) = plan.rotation.decode_key(&key)?;
            match context {
                Some(c) => remove_from_context(&self.indexes, c, &triple)?,
                None => remove_everywhere(&self.indexes, &triple, &decode_context_set(&value)?)?,
            }
            removed += 1;
        }
        if let (Some(c), 0) = (context, mask) {
            self.registry.deregister(c)?;
            debug!("Deregistered context {}", c);
        }
        Ok(removed)
    }
}

/// Lazy result stream of a `triples` query.
struct Matches<'a, C: TermCodec> {
    store: &'a OpenStore,
    codec: &'a C,
    plan: Plan,
    scan: PrefixScan<'a>,
    bound: [Option<C::Term>; 3],
    context: Option<C::Term>,
}

impl<C: TermCodec> Matches<'_, C> {
    fn decode(&self, key: &[u8], value: &[u8]) -> Result<MatchedTriple<C::Term>> {
        let bound = [
            self.bound[0].as_ref(),
            self.bound[1].as_ref(),
            self.bound[2].as_ref(),
        ];
        let terms = self
            .plan
            .decode_with(key, bound, |id| self.store.term(self.codec, id))?;
        let contexts = match &self.context {
            Some(context) => vec![context.clone()],
            None => decode_context_set(value)?
                .into_iter()
                .map(|id| self.store.term(self.codec, id))
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(MatchedTriple {
            triple: TermTriple::from(terms),
            contexts,
        })
    }
}

impl<C: TermCodec> Iterator for Matches<'_, C> {
    type Item = Result<MatchedTriple<C::Term>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.scan.next()?;
        Some(entry.and_then(|(key, value)| self.decode(&key, &value)))
    }
}

/// A persistent quad store over six redb files in one directory.
///
/// The store starts closed; call [`TripleStore::open`] (or
/// [`QuadStore::open_in_memory`]) before anything else. Dropping an open store
/// closes it.
pub struct QuadStore<C: TermCodec = NTriplesCodec> {
    codec: C,
    options: StoreOptions,
    planner: PatternPlanner,
    inner: Option<OpenStore>,
}

impl QuadStore<NTriplesCodec> {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self::with_codec(NTriplesCodec, options)
    }
}

impl Default for QuadStore<NTriplesCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: TermCodec> QuadStore<C> {
    pub fn with_codec(codec: C, options: StoreOptions) -> Self {
        Self {
            codec,
            options,
            planner: PatternPlanner::new(),
            inner: None,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Directory of the open store; None when closed or in memory.
    pub fn path(&self) -> Option<&Path> {
        self.inner.as_ref().and_then(|s| s.path.as_deref())
    }

    fn open_store(&self) -> Result<&OpenStore> {
        self.inner.as_ref().ok_or(StoreError::NotOpen)
    }

    /// Opens a temporary store that lives only as long as this handle.
    pub fn open_in_memory(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Err(StoreError::StoreIsOpen);
        }
        self.options.check()?;
        self.inner = Some(OpenStore::attach(
            StoreFiles::in_memory(),
            None,
            None,
            &self.options,
        )?);
        info!("Opened in-memory store");
        Ok(())
    }

    /// Flushes every file now and clears the pending-sync state.
    pub fn sync_now(&self) -> Result<()> {
        let store = self.open_store()?;
        store.files.sync_all()?;
        store.scheduler.mark_clean();
        debug!("Synced store on request");
        Ok(())
    }

    /// True while mutations are waiting for the background flush.
    pub fn is_sync_pending(&self) -> Result<bool> {
        Ok(self.open_store()?.scheduler.is_pending())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let store = self.open_store()?;
        Ok(StoreStats {
            contexts: store.registry.len()?,
            triples: store.indexes.count_prefix(vec![SEP])?,
            terms: store.dictionary.len()?,
            flushes: store.scheduler.flush_count(),
        })
    }

    /// Human-readable listing of every entry of every store file.
    pub fn dump(&self) -> Result<String> {
        let store = self.open_store()?;
        let mut out = String::from("\n");
        for (name, kv) in store.files.named() {
            let _ = writeln!(out, "db: {}", name);
            for entry in PrefixScan::new(kv.as_ref(), Vec::new(), self.options.scan_batch) {
                let (key, value) = entry?;
                let _ = writeln!(
                    out,
                    "\t{}: {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Ok(out)
    }

    fn lock_dir(&self, dir: &Path) -> Result<Option<File>> {
        if self.options.multiple_processes {
            return Ok(None);
        }
        let lock_path = dir.join(LOCK_FILE);
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        if let Err(e) = lock_file.try_lock_exclusive() {
            debug!("Lock on {} refused: {}", lock_path.display(), e);
            return Err(StoreError::Locked(lock_path));
        }
        Ok(Some(lock_file))
    }
}

impl<C: TermCodec> TripleStore for QuadStore<C> {
    type Term = C::Term;

    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<OpenStatus> {
        if self.inner.is_some() {
            return Err(StoreError::StoreIsOpen);
        }
        self.options.check()?;
        if mode.is_create() {
            if path.exists() && (!path.is_dir() || std::fs::read_dir(path)?.next().is_some()) {
                return Err(StoreError::AlreadyExists(path.to_path_buf()));
            }
            std::fs::create_dir_all(path)?;
        } else if !path.join(file_name(Rotation::Spo.file_stem())).exists() {
            if path.exists() {
                warn!("{} exists but holds no store", path.display());
            }
            return Ok(OpenStatus::NoStore);
        }
        let lock = self.lock_dir(path)?;
        debug!(
            "Engine knobs without a redb counterpart: page_size={} block_size={} autocheckpoint={} transaction_log={}",
            self.options.page_size,
            self.options.block_size,
            self.options.autocheckpoint,
            self.options.transaction_log
        );
        let files = StoreFiles::open_dir(path, &self.options)?;
        let store = OpenStore::attach(files, Some(path.to_path_buf()), lock, &self.options)?;
        self.inner = Some(store);
        info!("Opened store at {}", path.display());
        Ok(OpenStatus::Valid)
    }

    fn close(&mut self) -> Result<()> {
        let Some(store) = self.inner.take() else {
            return Ok(());
        };
        let path = store.path.clone();
        store.shutdown()?;
        match path {
            Some(path) => info!("Closed store at {}", path.display()),
            None => info!("Closed in-memory store"),
        }
        Ok(())
    }

    fn destroy(&self, path: &Path) -> Result<()> {
        if self.inner.is_some() {
            return Err(StoreError::StoreIsOpen);
        }
        if !path.exists() {
            debug!("Nothing to destroy at {}", path.display());
            return Ok(());
        }
        std::fs::remove_dir_all(path)?;
        info!("Destroyed store at {}", path.display());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn add(
        &mut self,
        subject: &C::Term,
        predicate: &C::Term,
        object: &C::Term,
        context: &C::Term,
        kind: TripleKind,
    ) -> Result<bool> {
        let store = self.open_store()?;
        let codec = &self.codec;
        let spo = [
            store.intern(codec, subject)?,
            store.intern(codec, predicate)?,
            store.intern(codec, object)?,
        ];
        let context = store.intern(codec, context)?;
        let added = add_to_context(&store.indexes, &store.registry, context, &spo, kind)?;
        if added {
            store.scheduler.mark_dirty();
            debug!("Added {}^{}^{} to context {}", spo[0], spo[1], spo[2], context);
        }
        Ok(added)
    }

    fn remove(
        &mut self,
        subject: Option<&C::Term>,
        predicate: Option<&C::Term>,
        object: Option<&C::Term>,
        context: Option<&C::Term>,
    ) -> Result<usize> {
        let store = self.open_store()?;
        if subject.is_none() && predicate.is_none() && object.is_none() && context.is_none() {
            let removed = store.clear()?;
            store.scheduler.mark_dirty();
            return Ok(removed);
        }
        let Some(spo) = store.pattern_ids(&self.codec, [subject, predicate, object])? else {
            return Ok(0);
        };
        let context = match context {
            Some(term) => match store.lookup(&self.codec, term)? {
                Some(id) => Some(id),
                None => return Ok(0),
            },
            None => None,
        };
        let removed = store.remove_ids(&self.planner, spo, context)?;
        if removed > 0 || (context.is_some() && mask_of(&spo) == 0) {
            store.scheduler.mark_dirty();
        }
        Ok(removed)
    }

    fn triples(
        &self,
        subject: Option<&C::Term>,
        predicate: Option<&C::Term>,
        object: Option<&C::Term>,
        context: Option<&C::Term>,
    ) -> Result<TripleIter<'_, C::Term>> {
        let store = self.open_store()?;
        let Some(spo) = store.pattern_ids(&self.codec, [subject, predicate, object])? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let context_id = match context {
            Some(term) => match store.lookup(&self.codec, term)? {
                Some(id) => Some(id),
                None => return Ok(Box::new(std::iter::empty())),
            },
            None => None,
        };
        let plan = *self.planner.plan(mask_of(&spo));
        let scan = store
            .indexes
            .scan_prefix(plan.rotation, plan.prefix(context_id, &spo));
        Ok(Box::new(Matches {
            store,
            codec: &self.codec,
            plan,
            scan,
            bound: [subject.cloned(), predicate.cloned(), object.cloned()],
            context: context.cloned(),
        }))
    }

    fn len(&self, context: Option<&C::Term>) -> Result<usize> {
        let store = self.open_store()?;
        let context_id = match context {
            Some(term) => match store.lookup(&self.codec, term)? {
                Some(id) => Some(id),
                None => return Ok(0),
            },
            None => None,
        };
        store.indexes.count_prefix(key_prefix(context_id, &[]))
    }

    fn contexts(
        &self,
        triple: Option<(&C::Term, &C::Term, &C::Term)>,
    ) -> Result<ContextIter<'_, C::Term>> {
        let store = self.open_store()?;
        let codec = &self.codec;
        let Some((s, p, o)) = triple else {
            return Ok(Box::new(
                store
                    .registry
                    .ids()
                    .map(move |id| id.and_then(|id| store.term(codec, id))),
            ));
        };
        let Some([Some(s), Some(p), Some(o)]) = store.pattern_ids(codec, [Some(s), Some(p), Some(o)])?
        else {
            return Ok(Box::new(std::iter::empty()));
        };
        let ids = store.indexes.context_set(&[s, p, o])?;
        Ok(Box::new(
            ids.into_iter().map(move |id| store.term(codec, id)),
        ))
    }

    fn add_graph(&mut self, context: &C::Term) -> Result<()> {
        let store = self.open_store()?;
        let id = store.intern(&self.codec, context)?;
        store.registry.register(id)?;
        store.scheduler.mark_dirty();
        debug!("Registered context {}", id);
        Ok(())
    }
}

impl<C: TermCodec> Drop for QuadStore<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Failed to close quad store on drop: {err}");
        }
    }
}
