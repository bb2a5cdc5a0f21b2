//! Pool: a queue of runnable work units with a declared access policy
//! (spec §3, §4.6).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Which producer/consumer pattern a pool's callers promise to follow.
/// Mirrors `ABT_POOL_ACCESS_{PRIV,SPSC,MPSC,SPMC,MPMC}`
/// (`examples/original_source/include/thallium/pool.hpp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    Private,
    SingleProdSingleCons,
    MultiProdSingleCons,
    SingleProdMultiCons,
    MultiProdMultiCons,
}

/// A boxed, type-erased unit of work. `Ult` variants may suspend
/// (`.await` inside); `Tasklet` variants run to completion synchronously.
pub(crate) enum Job {
    Ult(Pin<Box<dyn Future<Output = ()> + Send>>),
    Tasklet(Box<dyn FnOnce() + Send>),
}

/// Opaque id of a queued work unit, used by `Pool::remove` and migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(u64);

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

impl UnitId {
    pub(crate) fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct Entry {
    pub id: UnitId,
    pub job: Job,
    pub migratable: bool,
}

struct Inner {
    policy: AccessPolicy,
    queue: Mutex<VecDeque<Entry>>,
    notify: tokio::sync::Notify,
    in_flight: AtomicU64,
}

/// A ref-counted queue of runnable work units (spec §3, Pool).
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    #[must_use]
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                queue: Mutex::new(VecDeque::new()),
                notify: tokio::sync::Notify::new(),
                in_flight: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn access_policy(&self) -> AccessPolicy {
        self.inner.policy
    }

    pub(crate) fn push_entry(&self, entry: Entry) {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        self.inner.queue.lock().push_back(entry);
        self.inner.notify.notify_one();
    }

    pub(crate) fn pop_entry(&self) -> Option<Entry> {
        let entry = self.inner.queue.lock().pop_front();
        if entry.is_none() {
            // Nothing queued right now; in_flight keeps tracking jobs that
            // already left the queue but haven't finished running.
        }
        entry
    }

    pub(crate) async fn pop_entry_wait(&self) -> Entry {
        loop {
            if let Some(entry) = self.pop_entry() {
                return entry;
            }
            self.inner.notify.notified().await;
        }
    }

    pub(crate) fn mark_done(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Removes a still-queued unit by id. Returns `true` if it was found
    /// and removed before a scheduler popped it.
    pub fn remove(&self, id: UnitId) -> bool {
        let mut queue = self.inner.queue.lock();
        if let Some(pos) = queue.iter().position(|entry| entry.id == id) {
            queue.remove(pos);
            self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// Number of units currently queued (not yet popped by a scheduler).
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queued units plus units popped but not yet finished (spec §3:
    /// "includes blocked and migrating units").
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Moves a still-queued unit from this pool to `target`. Returns
    /// `false` (a no-op) if the unit already left the queue — "the request
    /// is posted and honored the next time a scheduler picks up the ULT"
    /// (spec §4.6) degenerates to "too late" once a scheduler already has.
    pub(crate) fn migrate_entry(&self, id: UnitId, target: &Self) -> bool {
        let mut queue = self.inner.queue.lock();
        let Some(pos) = queue.iter().position(|entry| entry.id == id) else {
            return false;
        };
        if !queue[pos].migratable {
            return false;
        }
        let entry = queue.remove(pos).expect("index just located");
        drop(queue);
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        target.push_entry(entry);
        true
    }
}
