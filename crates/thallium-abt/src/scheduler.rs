//! Scheduler: an ordered list of pools and a `run()` loop that pops work
//! units from them, executes them, periodically checks events, and exits
//! when asked (spec §3, §4.6).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::select_all;
use rand::Rng;

use crate::pool::{Job, Pool};

/// Shared state a `Scheduler::run` loop reads from: the pools it owns, the
/// stop flag, and the engine's event-check hook.
#[derive(Clone)]
pub struct SchedulerContext {
    pools: Vec<Pool>,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<tokio::sync::Notify>,
    check_events: Arc<dyn Fn() + Send + Sync>,
}

impl SchedulerContext {
    #[must_use]
    pub fn new(pools: Vec<Pool>, check_events: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            pools,
            stop: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(tokio::sync::Notify::new()),
            check_events,
        }
    }

    #[must_use]
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    #[must_use]
    pub fn has_to_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    pub fn check_events(&self) {
        (self.check_events)();
    }

    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Resolves once `request_stop` has been called.
    async fn stopped(&self) {
        while !self.has_to_stop() {
            self.stop_notify.notified().await;
        }
    }
}

fn dispatch(job: Job) {
    match job {
        Job::Ult(fut) => {
            tokio::spawn(fut);
        }
        Job::Tasklet(f) => f(),
    }
}

fn try_pop_any(pools: &[Pool]) -> Option<Job> {
    for pool in pools {
        if let Some(entry) = pool.pop_entry() {
            return Some(entry.job);
        }
    }
    None
}

async fn pop_any_wait(pools: &[Pool]) -> Job {
    let waits: Vec<_> = pools.iter().map(|p| Box::pin(p.pop_entry_wait())).collect();
    let (entry, _, _) = select_all(waits).await;
    entry.job
}

/// User schedulers override `run` and `get_migr_pool` (spec §4.6).
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    async fn run(&self, ctx: &SchedulerContext);

    fn get_migr_pool(&self, ctx: &SchedulerContext) -> Pool;
}

/// FIFO scheduler that spins and cooperatively yields between empty polls
/// (`ABT_SCHED_BASIC`-equivalent).
pub struct BasicScheduler;

#[async_trait::async_trait]
impl Scheduler for BasicScheduler {
    async fn run(&self, ctx: &SchedulerContext) {
        while !ctx.has_to_stop() {
            ctx.check_events();
            match try_pop_any(ctx.pools()) {
                Some(job) => dispatch(job),
                None => tokio::task::yield_now().await,
            }
        }
    }

    fn get_migr_pool(&self, ctx: &SchedulerContext) -> Pool {
        ctx.pools()[0].clone()
    }
}

/// FIFO scheduler that blocks (via the pool's notify) rather than spinning
/// when all pools are empty (`ABT_SCHED_BASIC_WAIT`-equivalent).
pub struct BasicWaitScheduler;

#[async_trait::async_trait]
impl Scheduler for BasicWaitScheduler {
    async fn run(&self, ctx: &SchedulerContext) {
        while !ctx.has_to_stop() {
            ctx.check_events();
            if ctx.pools().is_empty() {
                ctx.stopped().await;
                continue;
            }
            tokio::select! {
                biased;
                () = ctx.stopped() => {}
                job = pop_any_wait(ctx.pools()) => dispatch(job),
            }
        }
    }

    fn get_migr_pool(&self, ctx: &SchedulerContext) -> Pool {
        ctx.pools()[0].clone()
    }
}

/// Orders pools by priority: earlier entries in `ctx.pools()` are always
/// drained before later ones.
pub struct PriorityScheduler;

#[async_trait::async_trait]
impl Scheduler for PriorityScheduler {
    async fn run(&self, ctx: &SchedulerContext) {
        while !ctx.has_to_stop() {
            ctx.check_events();
            match try_pop_any(ctx.pools()) {
                Some(job) => dispatch(job),
                None => tokio::task::yield_now().await,
            }
        }
    }

    fn get_migr_pool(&self, ctx: &SchedulerContext) -> Pool {
        ctx.pools()[0].clone()
    }
}

/// Picks a pool at random on each iteration instead of always starting
/// from the first one, approximating work-stealing fairness across pools.
pub struct RandomWorkStealingScheduler {
    cursor: AtomicUsize,
}

impl Default for RandomWorkStealingScheduler {
    fn default() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Scheduler for RandomWorkStealingScheduler {
    async fn run(&self, ctx: &SchedulerContext) {
        while !ctx.has_to_stop() {
            ctx.check_events();
            let pools = ctx.pools();
            if pools.is_empty() {
                tokio::task::yield_now().await;
                continue;
            }
            let start = rand::thread_rng().gen_range(0..pools.len());
            self.cursor.store(start, Ordering::Relaxed);
            let mut found = None;
            for offset in 0..pools.len() {
                let idx = (start + offset) % pools.len();
                if let Some(entry) = pools[idx].pop_entry() {
                    found = Some(entry.job);
                    break;
                }
            }
            match found {
                Some(job) => dispatch(job),
                None => tokio::task::yield_now().await,
            }
        }
    }

    fn get_migr_pool(&self, ctx: &SchedulerContext) -> Pool {
        ctx.pools()[0].clone()
    }
}

/// The scheduler an `ExecutionStream` runs when none is specified.
#[must_use]
pub fn default_scheduler() -> Arc<dyn Scheduler> {
    Arc::new(BasicScheduler)
}
