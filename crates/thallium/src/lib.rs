//! Thallium: a high-performance RPC/RDMA runtime for distributed processes
//! (spec §1, §2). This crate is the facade: it re-exports the workspace's
//! component crates under one name and provides the ambient
//! logging-initialization helper every binary built on top of Thallium
//! needs.

pub mod telemetry;

pub use thallium_abt::{
    default_scheduler, spawn_tasklet, spawn_ult, wtime, AccessPolicy, Barrier, BasicScheduler,
    BasicWaitScheduler, CondVar, Eventual, ExecutionStream, Future, Mutex, Pool,
    PriorityScheduler, RandomWorkStealingScheduler, RwLock, Scheduler, SchedulerContext, Tasklet,
    Timer, Ult, UnitId,
};
pub use thallium_codec::{
    Archive, BufferDecodeArchive, BufferEncodeArchive, Decode, DecodeArchive, Encode,
    EncodeArchive, EngineHandle, NullEngineHandle,
};
pub use thallium_engine::{
    default_wiring, wire_from_config, wire_from_json, AsyncResponse, Callable, Engine,
    EngineConfig, PackedResponse, ProcedureHandle, Provider, Request, PRIMARY,
};
pub use thallium_net::{pull, push, BulkHandle, BulkMode, BulkSegment, Endpoint, RemoteBulk};
pub use thallium_types::{Deadline, ProcedureId, ProviderId, Result, ThalliumError};

/// Re-exports the surface most callers need in scope, the way
/// `apps/hash-graph`'s binaries pull in their API crate's prelude.
pub mod prelude {
    pub use crate::{
        Deadline, Encode, Decode, Endpoint, Engine, ProcedureId, Provider, ProviderId,
        ThalliumError,
    };
}
