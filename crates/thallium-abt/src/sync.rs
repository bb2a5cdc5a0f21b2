//! ULT-level synchronization primitives: these suspend the calling `Ult`
//! (or block a `Tasklet`'s OS thread, since tasklets may not suspend) but
//! never park the underlying OS thread of a cooperating `Ult` caller (spec
//! §4.8).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thallium_types::Deadline;
use tokio::sync::Notify;

/// Mutual-exclusion lock a ULT can `.await` on without blocking its OS
/// thread. Optionally recursive, mirroring `ABT_MUTEX_ATTR_RECURSIVE`.
pub struct Mutex {
    locked: tokio::sync::Mutex<LockState>,
    notify: Notify,
    recursive: bool,
}

struct LockState {
    held: bool,
    owner: Option<u64>,
    depth: u32,
}

thread_local! {
    static CURRENT_ULT: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

impl Mutex {
    #[must_use]
    pub fn new() -> Self {
        Self::with_recursive(false)
    }

    #[must_use]
    pub fn with_recursive(recursive: bool) -> Self {
        Self {
            locked: tokio::sync::Mutex::new(LockState {
                held: false,
                owner: None,
                depth: 0,
            }),
            notify: Notify::new(),
            recursive,
        }
    }

    /// Acquires the lock, suspending the caller while it is held elsewhere.
    pub async fn lock(&self) {
        loop {
            {
                let mut state = self.locked.lock().await;
                let caller = CURRENT_ULT.with(std::cell::Cell::get);
                if !state.held {
                    state.held = true;
                    state.owner = Some(caller);
                    state.depth = 1;
                    return;
                }
                if self.recursive && state.owner == Some(caller) {
                    state.depth += 1;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-suspending acquisition attempt.
    pub async fn try_lock(&self) -> bool {
        let mut state = self.locked.lock().await;
        let caller = CURRENT_ULT.with(std::cell::Cell::get);
        if !state.held {
            state.held = true;
            state.owner = Some(caller);
            state.depth = 1;
            true
        } else if self.recursive && state.owner == Some(caller) {
            state.depth += 1;
            true
        } else {
            false
        }
    }

    /// Yields repeatedly while attempting to acquire, rather than waiting on
    /// a wake notification (`ABT_mutex_spinlock`-equivalent). Useful when
    /// the expected hold time is a handful of instructions.
    pub async fn spin_lock(&self) {
        while !self.try_lock().await {
            tokio::task::yield_now().await;
        }
    }

    /// Releases the lock. Panics if the caller does not hold it, matching
    /// the original's undefined-behavior-on-misuse contract made explicit.
    pub async fn unlock(&self) {
        let mut state = self.locked.lock().await;
        assert!(state.held, "unlock on a mutex that is not held");
        state.depth -= 1;
        if state.depth == 0 {
            state.held = false;
            state.owner = None;
            self.notify.notify_one();
        }
    }

    /// Alias kept for callers migrating from the "low" (no ordering
    /// guarantee) and "se" (scalable, same semantics here) variants; this
    /// implementation has only one lock strategy, so both degenerate to
    /// `lock`/`unlock`.
    pub async fn lock_low(&self) {
        self.lock().await;
    }

    pub async fn unlock_se(&self) {
        self.unlock().await;
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Guards kept internal: callers hold a `Mutex` directly and pair
/// `lock()`/`unlock()` calls, matching the original API rather than RAII,
/// since `CondVar::wait` needs to reacquire the same mutex by reference
/// after suspending.
struct RwState {
    readers: u32,
    writer: bool,
}

/// Reader/writer lock with the same suspend-don't-block contract as
/// `Mutex`.
pub struct RwLock {
    state: tokio::sync::Mutex<RwState>,
    notify: Notify,
}

impl RwLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(RwState {
                readers: 0,
                writer: false,
            }),
            notify: Notify::new(),
        }
    }

    pub async fn rdlock(&self) {
        loop {
            {
                let mut state = self.state.lock().await;
                if !state.writer {
                    state.readers += 1;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn wrlock(&self) {
        loop {
            {
                let mut state = self.state.lock().await;
                if !state.writer && state.readers == 0 {
                    state.writer = true;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Releases either a read or a write hold; the caller is trusted to
    /// call this exactly once per successful `rdlock`/`wrlock`.
    pub async fn unlock(&self) {
        let mut state = self.state.lock().await;
        if state.writer {
            state.writer = false;
        } else if state.readers > 0 {
            state.readers -= 1;
        }
        if !state.writer && state.readers == 0 {
            self.notify.notify_waiters();
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Condition variable, paired with a caller-supplied `Mutex` at each wait
/// call rather than bound to one at construction (spec §4.8).
pub struct CondVar {
    notify: Notify,
}

impl CondVar {
    #[must_use]
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    /// Releases `mutex`, suspends until signalled, then reacquires it.
    pub async fn wait(&self, mutex: &Mutex) {
        let notified = self.notify.notified();
        mutex.unlock().await;
        notified.await;
        mutex.lock().await;
    }

    /// As `wait`, but also returns once `deadline` passes.
    pub async fn wait_until(&self, mutex: &Mutex, deadline: Deadline) -> bool {
        let notified = self.notify.notified();
        mutex.unlock().await;
        let timed_out = tokio::select! {
            () = notified => false,
            () = tokio::time::sleep(deadline.remaining()) => true,
        };
        mutex.lock().await;
        !timed_out
    }

    /// Waits until `predicate` holds, re-checking after every wake.
    pub async fn wait_while<F>(&self, mutex: &Mutex, mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        while predicate() {
            self.wait(mutex).await;
        }
    }

    pub fn notify_one(&self) {
        self.notify.notify_one();
    }

    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

/// Rendezvous point for a fixed number of ULTs; re-arms automatically once
/// the group is released (spec §4.8, `ABT_barrier`).
pub struct Barrier {
    n: AtomicUsize,
    count: AtomicUsize,
    generation: AtomicUsize,
    notify: Notify,
}

impl Barrier {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            n: AtomicUsize::new(n.max(1)),
            count: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Suspends until `n` callers have arrived, then releases all of them.
    pub async fn wait(&self) {
        let gen = self.generation.load(Ordering::Acquire);
        let arrived = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if arrived >= self.n.load(Ordering::Acquire) {
            self.count.store(0, Ordering::Release);
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.notify.notify_waiters();
            return;
        }
        while self.generation.load(Ordering::Acquire) == gen {
            self.notify.notified().await;
        }
    }

    /// Resets the number of waiters required, discarding any in-progress
    /// round (callers already waiting see a spurious release).
    pub fn reinit(&self, n: usize) {
        self.n.store(n.max(1), Ordering::Release);
        self.count.store(0, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }
}

/// Single-shot value cell: set once, read by any number of waiters (spec
/// §4.8, `ABT_eventual`).
pub struct Eventual<T: Clone> {
    value: tokio::sync::Mutex<Option<T>>,
    notify: Notify,
    ready: AtomicBool,
}

impl<T: Clone> Eventual<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: tokio::sync::Mutex::new(None),
            notify: Notify::new(),
            ready: AtomicBool::new(false),
        }
    }

    /// Sets the value, waking all current and future waiters. Calling this
    /// twice overwrites the previous value without error (the original does
    /// the same: a second `ABT_eventual_set` is legal, just unusual).
    pub async fn set(&self, value: T) {
        *self.value.lock().await = Some(value);
        self.ready.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Suspends until a value has been set, then returns a clone of it.
    pub async fn wait(&self) -> T {
        loop {
            if let Some(value) = self.value.lock().await.clone() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Non-suspending read.
    pub async fn test(&self) -> Option<T> {
        self.value.lock().await.clone()
    }

    /// Clears the value so the eventual can be reused for another round.
    pub async fn reset(&self) {
        *self.value.lock().await = None;
        self.ready.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl<T: Clone> Default for Eventual<T> {
    fn default() -> Self {
        Self::new()
    }
}

type FutureCallback<T> = Box<dyn FnOnce(&[T]) + Send>;

/// Multi-compartment completion signal: `n_compartments` independent
/// producers each call `set` once; waiters resolve only once every
/// compartment has fired (spec §4.8, `ABT_future`).
pub struct Future<T: Clone> {
    slots: tokio::sync::Mutex<Vec<Option<T>>>,
    notify: Notify,
    remaining: AtomicUsize,
    /// Run in the completing ULT's context, once, by the `set` call that
    /// drives `remaining` to zero (spec §3, §4.8: "optional callback invoked
    /// in the completing ULT's context with the full array of values").
    /// `Mutex`-wrapped so `set` can `take()` it out of a `&self` receiver.
    callback: tokio::sync::Mutex<Option<FutureCallback<T>>>,
}

impl<T: Clone> Future<T> {
    #[must_use]
    pub fn new(n_compartments: usize) -> Self {
        Self::with_callback(n_compartments, None)
    }

    /// As `new`, but invokes `callback` with every compartment's value, in
    /// order, from inside the `set` call that completes the last
    /// compartment.
    #[must_use]
    pub fn with_callback(n_compartments: usize, callback: Option<FutureCallback<T>>) -> Self {
        let n = n_compartments.max(1);
        Self {
            slots: tokio::sync::Mutex::new(vec![None; n]),
            notify: Notify::new(),
            remaining: AtomicUsize::new(n),
            callback: tokio::sync::Mutex::new(callback),
        }
    }

    /// Sets compartment `index`. Panics on out-of-range or double-set,
    /// mirroring `ABT_future_set`'s contract that each compartment is
    /// written exactly once.
    pub async fn set(&self, index: usize, value: T) {
        let mut slots = self.slots.lock().await;
        assert!(slots[index].is_none(), "future compartment set twice");
        slots[index] = Some(value);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let values: Vec<T> = slots.iter().cloned().map(Option::unwrap).collect();
            drop(slots);
            if let Some(callback) = self.callback.lock().await.take() {
                callback(&values);
            }
            self.notify.notify_waiters();
        }
    }

    /// Suspends until every compartment has been set, then returns the
    /// values in compartment order.
    pub async fn wait(&self) -> Vec<T> {
        loop {
            if self.remaining.load(Ordering::Acquire) == 0 {
                let slots = self.slots.lock().await;
                return slots.iter().cloned().map(Option::unwrap).collect();
            }
            self.notify.notified().await;
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}

/// Stopwatch measuring wall-clock time across suspend points (spec §4.8,
/// `ABT_timer`).
pub struct Timer {
    started_at: Option<std::time::Instant>,
    accumulated: Duration,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: None,
            accumulated: Duration::ZERO,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(std::time::Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(start) = self.started_at.take() {
            self.accumulated += start.elapsed();
        }
    }

    /// Elapsed time so far, including the current running interval if the
    /// timer has not been stopped.
    #[must_use]
    pub fn read(&self) -> Duration {
        match self.started_at {
            Some(start) => self.accumulated + start.elapsed(),
            None => self.accumulated,
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Free-standing wall-clock read, independent of any `Timer` instance
/// (`ABT_get_wtime`-equivalent).
#[must_use]
pub fn wtime() -> Duration {
    static EPOCH: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    EPOCH.get_or_init(std::time::Instant::now).elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn mutex_excludes_concurrent_holders() {
        let mutex = Arc::new(Mutex::new());
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                mutex.lock().await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(before, 0, "overlapping critical section");
                tokio::task::yield_now().await;
                counter.fetch_sub(1, Ordering::SeqCst);
                mutex.unlock().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn recursive_mutex_allows_reentry_from_same_task() {
        let mutex = Mutex::with_recursive(true);
        mutex.lock().await;
        assert!(mutex.try_lock().await);
        mutex.unlock().await;
        mutex.unlock().await;
    }

    #[tokio::test]
    async fn eventual_delivers_value_to_all_waiters() {
        let eventual = Arc::new(Eventual::new());
        let e1 = Arc::clone(&eventual);
        let waiter = tokio::spawn(async move { e1.wait().await });
        tokio::task::yield_now().await;
        eventual.set(42u32).await;
        assert_eq!(waiter.await.unwrap(), 42);
        assert_eq!(eventual.test().await, Some(42));
    }

    #[tokio::test]
    async fn future_waits_for_every_compartment() {
        let future = Arc::new(Future::new(3));
        let f1 = Arc::clone(&future);
        let waiter = tokio::spawn(async move { f1.wait().await });
        future.set(0, 1).await;
        future.set(1, 2).await;
        assert!(!future.is_ready());
        future.set(2, 3).await;
        assert_eq!(waiter.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn future_callback_runs_once_in_the_completing_set_call() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_cb = Arc::clone(&seen);
        let future = Future::with_callback(
            2,
            Some(Box::new(move |values: &[i32]| {
                *seen_cb.lock().unwrap() = Some(values.to_vec());
            })),
        );

        future.set(0, 10).await;
        assert!(seen.lock().unwrap().is_none(), "callback fires only once complete");
        future.set(1, 20).await;
        assert_eq!(*seen.lock().unwrap(), Some(vec![10, 20]));
    }

    #[tokio::test]
    async fn barrier_releases_once_all_arrive() {
        let barrier = Arc::new(Barrier::new(3));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move { barrier.wait().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[test]
    fn timer_reports_nonzero_elapsed_after_stop() {
        let mut timer = Timer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        assert!(timer.read() >= Duration::from_millis(1));
    }
}
