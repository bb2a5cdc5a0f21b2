//! JSON engine configuration (spec §6): declares named pools, xstreams, and
//! their scheduler assignments, superseding the simple `EngineOptions` when
//! present. Parsed with `serde`/`serde_json`, the pair `harpc-wire-protocol`'s
//! `cli` feature and `apps/hash-graph/bins/cli` use for their own
//! JSON-shaped config structs.

use std::collections::HashMap;
use std::sync::Arc;

use error_stack::Report;
use serde::Deserialize;
use thallium_abt::{
    default_scheduler, AccessPolicy, BasicScheduler, BasicWaitScheduler, ExecutionStream, Pool,
    PriorityScheduler, RandomWorkStealingScheduler, Scheduler,
};
use thallium_types::ThalliumError;

/// Name reserved for the primary pool and primary xstream (spec §6).
pub const PRIMARY: &str = "__primary__";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    #[serde(default)]
    pub use_progress_thread: bool,
    #[serde(default)]
    pub argobots: Option<ArgobotsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ArgobotsConfig {
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub xstreams: Vec<XstreamConfig>,
}

#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default = "default_pool_kind")]
    pub kind: PoolKind,
    #[serde(default = "default_access")]
    pub access: AccessKind,
}

fn default_pool_kind() -> PoolKind {
    PoolKind::Fifo
}

fn default_access() -> AccessKind {
    AccessKind::Mpmc
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Fifo,
    FifoWait,
    Prio,
    PrioWait,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Priv,
    Spsc,
    Mpsc,
    Spmc,
    Mpmc,
}

impl From<AccessKind> for AccessPolicy {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Priv => Self::Private,
            AccessKind::Spsc => Self::SingleProdSingleCons,
            AccessKind::Mpsc => Self::MultiProdSingleCons,
            AccessKind::Spmc => Self::SingleProdMultiCons,
            AccessKind::Mpmc => Self::MultiProdMultiCons,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct XstreamConfig {
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "type")]
    pub kind: SchedulerKind,
    #[serde(default)]
    pub pools: Vec<PoolRef>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Basic,
    BasicWait,
    Prio,
    Randws,
}

impl SchedulerKind {
    fn build(self) -> Arc<dyn Scheduler> {
        match self {
            Self::Basic => Arc::new(BasicScheduler),
            Self::BasicWait => Arc::new(BasicWaitScheduler),
            Self::Prio => Arc::new(PriorityScheduler),
            Self::Randws => Arc::new(RandomWorkStealingScheduler::default()),
        }
    }
}

/// A pool reference inside a scheduler entry: an integer index into the
/// `pools` array, or a string name (spec §6).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PoolRef {
    Index(usize),
    Name(String),
}

/// The result of wiring up a parsed (or default) configuration: named pools
/// ready for `Engine::define`'s `pool` argument, plus the running execution
/// streams that drain them.
pub struct Wiring {
    pub pools: HashMap<String, Pool>,
    pub xstreams: Vec<ExecutionStream>,
}

/// Builds the default single-pool, single-xstream wiring used when no
/// `config` is supplied (spec §4.1: construction without a full config).
pub fn default_wiring() -> error_stack::Result<Wiring, ThalliumError> {
    let primary = Pool::new(AccessPolicy::MultiProdMultiCons);
    let xstream = ExecutionStream::create_with_pools(
        default_scheduler(),
        vec![primary.clone()],
        primary.clone(),
        None,
    )?;
    let mut pools = HashMap::new();
    pools.insert(PRIMARY.to_owned(), primary);
    Ok(Wiring {
        pools,
        xstreams: vec![xstream],
    })
}

/// Parses `text` as an `EngineConfig` and wires up the declared pools and
/// xstreams (spec §6).
pub fn wire_from_json(text: &str) -> error_stack::Result<Wiring, ThalliumError> {
    let config: EngineConfig = serde_json::from_str(text).map_err(|err| {
        Report::new(ThalliumError::ConfigInvalid {
            path: "$".to_owned(),
            reason: err.to_string(),
        })
    })?;
    wire_from_config(&config)
}

pub fn wire_from_config(config: &EngineConfig) -> error_stack::Result<Wiring, ThalliumError> {
    let Some(argobots) = &config.argobots else {
        return default_wiring();
    };

    let mut pools = HashMap::new();
    let mut pool_by_index = Vec::with_capacity(argobots.pools.len());
    for pool_cfg in &argobots.pools {
        let policy: AccessPolicy = pool_cfg.access.into();
        let pool = Pool::new(policy);
        pool_by_index.push(pool.clone());
        pools.insert(pool_cfg.name.clone(), pool);
    }
    if !pools.contains_key(PRIMARY) {
        pools.insert(PRIMARY.to_owned(), Pool::new(AccessPolicy::MultiProdMultiCons));
    }

    let resolve = |pool_ref: &PoolRef| -> error_stack::Result<Pool, ThalliumError> {
        match pool_ref {
            PoolRef::Index(idx) => pool_by_index.get(*idx).cloned().ok_or_else(|| {
                Report::new(ThalliumError::ConfigInvalid {
                    path: format!("argobots.xstreams[].scheduler.pools[{idx}]"),
                    reason: "pool index out of range".to_owned(),
                })
            }),
            PoolRef::Name(name) => pools.get(name).cloned().ok_or_else(|| {
                Report::new(ThalliumError::ConfigInvalid {
                    path: "argobots.xstreams[].scheduler.pools[]".to_owned(),
                    reason: format!("unknown pool name `{name}`"),
                })
            }),
        }
    };

    let mut xstreams = Vec::with_capacity(argobots.xstreams.len().max(1));
    if argobots.xstreams.is_empty() {
        let primary = pools[PRIMARY].clone();
        xstreams.push(ExecutionStream::create_with_pools(
            default_scheduler(),
            vec![primary.clone()],
            primary,
            None,
        )?);
    }
    for xstream_cfg in &argobots.xstreams {
        let scheduler = xstream_cfg.scheduler.kind.build();
        let mut assigned = Vec::with_capacity(xstream_cfg.scheduler.pools.len());
        for pool_ref in &xstream_cfg.scheduler.pools {
            assigned.push(resolve(pool_ref)?);
        }
        let reported = assigned
            .first()
            .cloned()
            .unwrap_or_else(|| Pool::new(AccessPolicy::Private));
        if assigned.is_empty() {
            assigned.push(reported.clone());
        }
        xstreams.push(ExecutionStream::create_with_pools(scheduler, assigned, reported, None)?);
    }

    Ok(Wiring { pools, xstreams })
}
