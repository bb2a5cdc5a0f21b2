//! Argobots-flavored concurrency substrate: work units (`Ult`, `Tasklet`),
//! queues (`Pool`), drivers (`Scheduler`), OS-thread hosts
//! (`ExecutionStream`), and the ULT-aware synchronization primitives built
//! on top of them (spec §3, §4.6, §4.8).

mod pool;
mod scheduler;
mod sync;
mod tasklet;
mod ult;
mod xstream;

pub use pool::{AccessPolicy, Pool, UnitId};
pub use scheduler::{
    default_scheduler, BasicScheduler, BasicWaitScheduler, PriorityScheduler,
    RandomWorkStealingScheduler, Scheduler, SchedulerContext,
};
pub use sync::{wtime, Barrier, CondVar, Eventual, Future, Mutex, RwLock, Timer};
pub use tasklet::Tasklet;
pub use ult::{sleep, spawn_with_migratable, yield_now, yield_to, Ult};
pub use xstream::ExecutionStream;

/// Spawns a migratable ULT on `pool`; shorthand matching `ult::spawn`.
pub fn spawn_ult<F, T>(pool: &Pool, fut: F) -> Ult<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    ult::spawn(pool, fut)
}

/// Spawns a tasklet on `pool`; shorthand matching `tasklet::spawn`.
pub fn spawn_tasklet<F, T>(pool: &Pool, f: F) -> Tasklet<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tasklet::spawn(pool, f)
}
