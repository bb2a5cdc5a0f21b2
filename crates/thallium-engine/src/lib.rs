//! Engine: registration table, invocation dispatch, lifecycle, providers,
//! and JSON configuration (spec §3, §4.1, §4.2, §4.3, §6), grounded on
//! `harpc-server`/`harpc-client`/`harpc-system`.

mod config;
mod engine;
mod procedure;
mod provider;
mod request;

pub use config::{
    default_wiring, wire_from_config, wire_from_json, AccessKind, ArgobotsConfig, EngineConfig,
    PoolConfig, PoolKind, PoolRef, SchedulerConfig, SchedulerKind, Wiring, XstreamConfig, PRIMARY,
};
pub use engine::{Engine, ProcedureHandle};
pub use procedure::{AsyncResponse, Callable, PackedResponse};
pub use provider::Provider;
pub use request::Request;

pub use thallium_net::{pull, push, BulkHandle, BulkMode, BulkSegment, Endpoint, RemoteBulk};
pub use thallium_types::{Deadline, ProcedureId, ProviderId, ThalliumError};
