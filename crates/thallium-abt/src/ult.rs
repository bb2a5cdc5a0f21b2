//! ULT: a user-level thread with its own (virtual) stack — in this rewrite,
//! an independently scheduled `tokio` task, which gives every inbound RPC
//! handler genuine cooperative concurrency without blocking the OS thread
//! (spec §4.1, §4.6).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use thallium_types::ThalliumError;
use tokio::sync::oneshot;
use tokio_util_light::CancellationToken;

use crate::pool::{Entry, Job, Pool, UnitId};

mod tokio_util_light {
    //! A minimal cooperative cancellation token, grounded on the same idea
    //! as `tokio_util::sync::CancellationToken` (the teacher depends on
    //! `tokio-util` throughout `harpc-net`/`harpc-server`) without pulling
    //! in the whole crate for one primitive.
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    pub struct CancellationToken {
        notify: Arc<Notify>,
        cancelled: Arc<std::sync::atomic::AtomicBool>,
    }

    impl CancellationToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cancel(&self) {
            self.cancelled
                .store(true, std::sync::atomic::Ordering::Release);
            self.notify.notify_waiters();
        }

        pub fn is_cancelled(&self) -> bool {
            self.cancelled.load(std::sync::atomic::Ordering::Acquire)
        }

        pub async fn cancelled(&self) {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Handle to a spawned user-level thread. Move-only in spirit (the result
/// can only be observed once), `Clone`-free like the original's `managed`
/// handle.
pub struct Ult<T> {
    id: UnitId,
    origin: Pool,
    rx: oneshot::Receiver<Result<T, ThalliumError>>,
    cancel: CancellationToken,
    settled: Arc<AtomicBool>,
}

impl<T: Send + 'static> Ult<T> {
    /// Blocks the calling ULT (yields, never the OS thread) until this
    /// unit completes.
    pub async fn join(mut self) -> error_stack::Result<T, ThalliumError> {
        self.settled.store(true, Ordering::Release);
        match (&mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Report::new(err)),
            Err(_) => Err(Report::new(ThalliumError::Cancelled)),
        }
    }

    /// Explicitly releases a "named" unit without waiting for it (spec
    /// §4.6: named units "must be joined or explicitly released").
    pub fn release(self) {
        self.settled.store(true, Ordering::Release);
    }

    /// Best-effort cancellation, honored at the unit's next yield point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Attempts to move this unit to `target`, but only while it is still
    /// sitting unpopped in its origin pool's queue. Returns `false` once a
    /// scheduler has already picked it up.
    pub fn migrate_to(&self, target: &Pool) -> bool {
        self.origin.migrate_entry(self.id, target)
    }
}

impl<T> Drop for Ult<T> {
    fn drop(&mut self) {
        if !self.settled.load(Ordering::Acquire) {
            tracing::trace!(unit = ?self.id, "anonymous ULT dropped without join; self-reaping");
        }
    }
}

/// Spawns `fut` as a new ULT on `pool`, migratable by default.
pub fn spawn<F, T>(pool: &Pool, fut: F) -> Ult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    spawn_with_migratable(pool, fut, true)
}

pub fn spawn_with_migratable<F, T>(pool: &Pool, fut: F, migratable: bool) -> Ult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let id = UnitId::next();
    let (tx, rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    let cancel_for_job = cancel.clone();
    let pool_for_job = pool.clone();

    let job = Job::Ult(Box::pin(async move {
        let outcome = tokio::select! {
            biased;
            () = cancel_for_job.cancelled() => Err(ThalliumError::Cancelled),
            value = fut => Ok(value),
        };
        let _ = tx.send(outcome);
        pool_for_job.mark_done();
    }));

    pool.push_entry(Entry {
        id,
        job,
        migratable,
    });

    Ult {
        id,
        origin: pool.clone(),
        rx,
        cancel,
        settled: Arc::new(AtomicBool::new(false)),
    }
}

/// Cooperatively yields the calling ULT back to its scheduler.
pub async fn yield_now() {
    tokio::task::yield_now().await;
}

/// Yields the calling ULT and hints that `other` should run next. Hinting
/// is best-effort: the underlying executor does not guarantee immediate
/// handoff, only that it is a valid place for the scheduler to resume.
pub async fn yield_to<T>(other: &Ult<T>) {
    let _ = other.id;
    tokio::task::yield_now().await;
}

/// Cooperatively suspends the calling ULT for `duration`.
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
