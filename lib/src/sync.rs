//! Debounced background flushing.
//!
//! Mutations only mark the store dirty. A dedicated thread flushes once the
//! store has been quiet for `min_quiet`, and never later than `max_wait` after
//! the first unflushed mutation, so a steady stream of writes cannot postpone
//! durability forever.

use crate::config::SyncOptions;
use crate::errors::Result;
use log::{debug, error};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    dirty: bool,
    first_pending: Option<Instant>,
    last_mutation: Option<Instant>,
    stopping: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    flushes: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        // the state is a handful of plain fields, always consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct SyncScheduler {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SyncScheduler {
    /// Spawns the flush thread. `flush` runs on that thread whenever a
    /// deadline passes with mutations pending.
    pub fn start<F>(options: SyncOptions, flush: F) -> Result<Self>
    where
        F: Fn() -> Result<()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
            flushes: AtomicUsize::new(0),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("quadstore-sync".to_string())
            .spawn(move || run(&worker_shared, &options, flush))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Records a mutation.
    pub fn mark_dirty(&self) {
        let now = Instant::now();
        let mut state = self.shared.state();
        if !state.dirty {
            state.dirty = true;
            state.first_pending = Some(now);
        }
        state.last_mutation = Some(now);
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// True while mutations are waiting for a flush.
    pub fn is_pending(&self) -> bool {
        self.shared.state().dirty
    }

    /// Clears the pending state after the caller flushed synchronously.
    pub fn mark_clean(&self) {
        let mut state = self.shared.state();
        state.dirty = false;
        state.first_pending = None;
        state.last_mutation = None;
    }

    /// Number of flushes the background thread has completed.
    pub fn flush_count(&self) -> usize {
        self.shared.flushes.load(Ordering::SeqCst)
    }

    /// Stops the thread without a final flush. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.state().stopping = true;
        self.shared.wakeup.notify_all();
        if worker.join().is_err() {
            error!("sync thread panicked");
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(shared: &Shared, options: &SyncOptions, flush: F)
where
    F: Fn() -> Result<()>,
{
    let min_quiet = options.min_quiet();
    let max_wait = options.max_wait();
    let poll = options.poll_interval();
    let mut state = shared.state();
    loop {
        if state.stopping {
            break;
        }
        let (Some(first), Some(last)) = (state.first_pending, state.last_mutation) else {
            state = shared
                .wakeup
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
            continue;
        };
        let deadline = (last + min_quiet).min(first + max_wait);
        let now = Instant::now();
        if now < deadline {
            let timeout = (deadline - now).min(poll);
            state = shared
                .wakeup
                .wait_timeout(state, timeout)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
            continue;
        }
        state.dirty = false;
        state.first_pending = None;
        state.last_mutation = None;
        drop(state);
        let started = Instant::now();
        match flush() {
            Ok(()) => debug!("background sync took {:?}", started.elapsed()),
            Err(e) => error!("background sync failed: {}", e),
        }
        shared.flushes.fetch_add(1, Ordering::SeqCst);
        state = shared.state();
    }
}

/// Sleeps in `step` increments until `done` holds or `limit` elapses.
#[cfg(test)]
pub(crate) fn wait_until(limit: Duration, step: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + limit;
    while Instant::now() < until {
        if done() {
            return true;
        }
        thread::sleep(step);
    }
    done()
}
