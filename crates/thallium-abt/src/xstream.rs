//! Execution stream (xstream): an OS thread bound to one scheduler,
//! optionally pinned to CPUs (spec §3, §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use error_stack::Report;
use thallium_types::ThalliumError;

use crate::pool::{AccessPolicy, Pool};
use crate::scheduler::{default_scheduler, Scheduler, SchedulerContext};

/// An OS-backed execution stream hosting one scheduler (spec §4.6).
pub struct ExecutionStream {
    handle: Option<JoinHandle<()>>,
    ctx: SchedulerContext,
    joined: AtomicBool,
    /// The xstream's own private pool, used when work is submitted via
    /// `xstream.pool().push(..)` directly rather than through a shared
    /// pool.
    private_pool: Pool,
}

fn noop_check_events() {}

impl ExecutionStream {
    /// Creates an xstream with the default scheduler and a private pool.
    pub fn create() -> error_stack::Result<Self, ThalliumError> {
        Self::create_with_scheduler(default_scheduler())
    }

    /// Creates an xstream running `scheduler`.
    pub fn create_with_scheduler(
        scheduler: Arc<dyn Scheduler>,
    ) -> error_stack::Result<Self, ThalliumError> {
        Self::create_with_scheduler_pinned(scheduler, None)
    }

    /// Creates an xstream running `scheduler`, pinned to `core_id` if
    /// given. Affinity is best-effort: if the platform refuses, the
    /// xstream still runs, just unpinned.
    pub fn create_with_scheduler_pinned(
        scheduler: Arc<dyn Scheduler>,
        core_id: Option<usize>,
    ) -> error_stack::Result<Self, ThalliumError> {
        let private_pool = Pool::new(AccessPolicy::Private);
        Self::create_with_pools(scheduler, vec![private_pool.clone()], private_pool, core_id)
    }

    /// Creates an xstream whose scheduler drains `pools` (in order), e.g.
    /// the pools named in a JSON config's `argobots.xstreams[].scheduler`
    /// (spec §6). `reported_pool` is what `pool()` returns afterwards —
    /// callers that don't share a named pool can pass a fresh private one.
    pub fn create_with_pools(
        scheduler: Arc<dyn Scheduler>,
        pools: Vec<Pool>,
        reported_pool: Pool,
        core_id: Option<usize>,
    ) -> error_stack::Result<Self, ThalliumError> {
        let ctx = SchedulerContext::new(pools, Arc::new(noop_check_events));
        let ctx_for_thread = ctx.clone();

        let handle = std::thread::Builder::new()
            .name("thallium-xstream".to_owned())
            .spawn(move || {
                if let Some(id) = core_id {
                    let _ = core_affinity::set_for_current(core_affinity::CoreId { id });
                }
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build xstream runtime");
                runtime.block_on(scheduler.run(&ctx_for_thread));
            })
            .map_err(|err| {
                Report::new(ThalliumError::ThreadingFault {
                    code: err.to_string(),
                    op: "xstream::create",
                })
            })?;

        Ok(Self {
            handle: Some(handle),
            ctx,
            joined: AtomicBool::new(false),
            private_pool: reported_pool,
        })
    }

    /// The xstream's private pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.private_pool
    }

    /// Signals the scheduler loop to stop after its current iteration.
    pub fn request_stop(&self) {
        self.ctx.request_stop();
    }

    /// Blocks the caller until the xstream's scheduler terminates. Must be
    /// called (after `request_stop`) to avoid `MissingJoin`.
    pub fn join(mut self) -> error_stack::Result<(), ThalliumError> {
        self.joined.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| {
                Report::new(ThalliumError::ThreadingFault {
                    code: "thread panicked".to_owned(),
                    op: "xstream::join",
                })
            })?;
        }
        Ok(())
    }

    /// Best-effort CPU affinity read, for callers that want to report
    /// where an xstream landed.
    #[must_use]
    pub fn current_core_ids() -> Vec<usize> {
        core_affinity::get_core_ids()
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.id)
            .collect()
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        if self.handle.is_some() && !self.joined.load(Ordering::Acquire) {
            #[cfg(debug_assertions)]
            {
                panic!("ExecutionStream dropped before join() (MissingJoin)");
            }
            #[cfg(not(debug_assertions))]
            {
                tracing::error!("ExecutionStream dropped before join()");
            }
        }
    }
}
