//! Tasklet: a stackless work unit that runs straight through to completion
//! without suspending (spec §3, §4.6). Cheaper than a `Ult` precisely
//! because it never needs its own task/stack — the scheduler calls it
//! directly instead of handing it to the async executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use error_stack::Report;
use thallium_types::ThalliumError;
use tokio::sync::oneshot;

use crate::pool::{Entry, Job, Pool, UnitId};

pub struct Tasklet<T> {
    id: UnitId,
    origin: Pool,
    rx: oneshot::Receiver<Result<T, ThalliumError>>,
    settled: Arc<AtomicBool>,
}

impl<T: Send + 'static> Tasklet<T> {
    pub async fn join(mut self) -> error_stack::Result<T, ThalliumError> {
        self.settled.store(true, Ordering::Release);
        match (&mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Report::new(err)),
            Err(_) => Err(Report::new(ThalliumError::Cancelled)),
        }
    }

    pub fn release(self) {
        self.settled.store(true, Ordering::Release);
    }

    /// Cancels the tasklet. Only effective while it is still queued — once
    /// a scheduler starts running it, it runs to completion (spec §4.6:
    /// tasklets "may not suspend").
    pub fn cancel(&self) -> bool {
        self.origin.remove(self.id)
    }
}

impl<T> Drop for Tasklet<T> {
    fn drop(&mut self) {
        if !self.settled.load(Ordering::Acquire) {
            tracing::trace!(unit = ?self.id, "anonymous tasklet dropped without join; self-reaping");
        }
    }
}

/// Queues `f` as a tasklet on `pool`.
pub fn spawn<F, T>(pool: &Pool, f: F) -> Tasklet<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let id = UnitId::next();
    let (tx, rx) = oneshot::channel();
    let pool_for_job = pool.clone();

    // If this entry is removed from the pool before it runs (`cancel`),
    // dropping the job drops `tx` with it, which closes the channel and
    // turns the pending `join()` into `Err(Cancelled)`.
    let job = Job::Tasklet(Box::new(move || {
        let _ = tx.send(Ok(f()));
        pool_for_job.mark_done();
    }));

    pool.push_entry(Entry {
        id,
        job,
        migratable: false,
    });

    Tasklet {
        id,
        origin: pool.clone(),
        rx,
        settled: Arc::new(AtomicBool::new(false)),
    }
}
