//! The engine: registration table, invocation dispatch, and lifecycle
//! (spec §3, §4.1). Construction uses `Arc::new_cyclic` so the transport can
//! be handed a back-reference to the engine it belongs to before the
//! engine's own `Arc` exists (spec §3: "the engine owns the transport... the
//! transport calls back into the engine").

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use error_stack::Report;
use thallium_abt::{ExecutionStream, Pool};
use thallium_codec::{decode_tagged, encode_tagged, BufferDecodeArchive, BufferEncodeArchive, Decode, Encode};
use thallium_net::{Endpoint, InboundCall, InboundDispatcher, LoopbackTransport, Transport};
use thallium_types::{ProcedureId, ProviderId, ThalliumError};

use crate::config::{self, EngineConfig};
use crate::request::Request;

/// Name reserved for the engine-level remote-shutdown procedure (spec §4.1).
const SHUTDOWN_PROCEDURE: &str = "__thallium_shutdown__";

/// Id reserved for the remote-shutdown procedure, outside the range handed
/// out by `next_procedure_id` (which starts at 1), so every engine that
/// calls `enable_remote_shutdown` agrees on it without a name lookup.
const SHUTDOWN_PROCEDURE_ID: ProcedureId = ProcedureId::new(0);

pub(crate) struct ProcedureEntry {
    pub id: ProcedureId,
    pub name: String,
    pub provider_id: ProviderId,
    pub response_expected: bool,
    pub handler: Arc<dyn Fn(Request) + Send + Sync>,
}

struct CallbackEntry {
    owner: Option<ProviderId>,
    callback: Box<dyn FnOnce() + Send>,
}

pub(crate) struct EngineState {
    pub transport: Arc<dyn Transport>,
    pub pools: HashMap<String, Pool>,
    xstreams: parking_lot::Mutex<Vec<ExecutionStream>>,
    by_name: scc::HashMap<String, ProcedureId>,
    by_id: scc::HashMap<u64, Arc<ProcedureEntry>>,
    next_procedure_id: AtomicU64,
    prefinalize: parking_lot::Mutex<Vec<CallbackEntry>>,
    finalize: parking_lot::Mutex<Vec<CallbackEntry>>,
    finalized: AtomicBool,
    finalize_notify: tokio::sync::Notify,
}

impl EngineState {
    pub(crate) fn primary_pool(&self) -> Pool {
        self.pools
            .get(config::PRIMARY)
            .cloned()
            .expect("wiring always registers the primary pool")
    }

    pub(crate) fn pool(&self, name: &str) -> error_stack::Result<Pool, ThalliumError> {
        self.pools.get(name).cloned().ok_or_else(|| {
            Report::new(ThalliumError::ConfigInvalid {
                path: format!("pools.{name}"),
                reason: "no such pool".to_owned(),
            })
        })
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.finalized.load(Ordering::Acquire)
    }
}

/// `EngineState`'s weak back-reference, handed to everything below this
/// crate (archives, endpoints, bulk handles) that needs to know whether the
/// engine is still alive without creating a strong reference cycle back
/// into it (spec §3, §9).
#[derive(Clone)]
pub(crate) struct EngineStateHandle(Weak<EngineState>);

impl fmt::Debug for EngineStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EngineStateHandle").field(&self.0.upgrade().is_some()).finish()
    }
}

impl thallium_codec::EngineHandle for EngineStateHandle {
    fn is_valid(&self) -> bool {
        self.0.upgrade().is_some_and(|state| state.is_valid())
    }
}

struct EngineDispatcher(Weak<EngineState>);

#[async_trait]
impl InboundDispatcher for EngineDispatcher {
    async fn dispatch(&self, call: InboundCall) {
        let Some(state) = self.0.upgrade() else {
            tracing::trace!("dropping inbound call: engine already finalized");
            return;
        };
        let entry = state.by_id.get(&call.procedure_id.as_u64()).map(|e| Arc::clone(e.get()));
        let Some(entry) = entry else {
            tracing::warn!(procedure_id = ?call.procedure_id, "no handler registered for inbound procedure id");
            return;
        };
        let pool = state.primary_pool();
        let request = Request::new(call, Arc::new(EngineStateHandle(self.0.clone())));
        let handler = entry.handler.clone();
        thallium_abt::spawn_ult(&pool, async move { handler(request); }).release();
    }
}

/// A ref-counted handle to a running engine (spec §3). Cloning an `Engine`
/// shares the same registration table, transport, and xstreams; the engine
/// stays alive as long as any clone (or anything it handed an
/// `EngineStateHandle` to) exists.
#[derive(Clone)]
pub struct Engine {
    state: Arc<EngineState>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("self_endpoint", &self.self_endpoint().to_string())
            .finish()
    }
}

impl Engine {
    /// Creates an engine bound to `uri`, wired from `config_json` if given
    /// or a single default pool/xstream otherwise (spec §4.1, §6).
    pub fn new(uri: impl Into<String>, config_json: Option<&str>) -> error_stack::Result<Self, ThalliumError> {
        let wiring = match config_json {
            Some(text) => config::wire_from_json(text)?,
            None => config::default_wiring()?,
        };
        Self::from_wiring(uri, wiring)
    }

    /// Creates an engine from an already-parsed configuration, for callers
    /// that built one programmatically rather than from JSON text.
    pub fn with_config(uri: impl Into<String>, config: &EngineConfig) -> error_stack::Result<Self, ThalliumError> {
        Self::from_wiring(uri, config::wire_from_config(config)?)
    }

    fn from_wiring(uri: impl Into<String>, wiring: config::Wiring) -> error_stack::Result<Self, ThalliumError> {
        let uri = uri.into();
        let state = Arc::new_cyclic(|weak: &Weak<EngineState>| {
            let handle: Arc<dyn thallium_codec::EngineHandle> =
                Arc::new(EngineStateHandle(weak.clone()));
            EngineState {
                transport: LoopbackTransport::new(uri, handle),
                pools: wiring.pools,
                xstreams: parking_lot::Mutex::new(wiring.xstreams),
                by_name: scc::HashMap::new(),
                by_id: scc::HashMap::new(),
                next_procedure_id: AtomicU64::new(1),
                prefinalize: parking_lot::Mutex::new(Vec::new()),
                finalize: parking_lot::Mutex::new(Vec::new()),
                finalized: AtomicBool::new(false),
                finalize_notify: tokio::sync::Notify::new(),
            }
        });
        state
            .transport
            .bind_dispatcher(Arc::new(EngineDispatcher(Arc::downgrade(&state))));
        Ok(Self { state })
    }

    #[must_use]
    pub fn self_endpoint(&self) -> Endpoint {
        self.state.transport.self_endpoint()
    }

    pub fn lookup(&self, uri: &str) -> error_stack::Result<Endpoint, ThalliumError> {
        self.state.transport.lookup(uri)
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.state.transport
    }

    pub(crate) fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    /// Exposes `chunks` as a bulk handle the transport can serialize (spec
    /// §4.1 `engine.expose`, §4.5).
    #[must_use]
    pub fn expose(
        chunks: Vec<Arc<parking_lot::RwLock<Vec<u8>>>>,
        mode: thallium_net::BulkMode,
        eager: bool,
    ) -> thallium_net::BulkHandle {
        thallium_net::BulkHandle::expose(chunks, mode, eager)
    }

    /// Raw request handler registration (spec §4.1): the handler receives
    /// the `Request` directly and is responsible for calling `respond` or
    /// `release` itself.
    pub fn define_raw<F>(
        &self,
        name: impl Into<String>,
        provider_id: ProviderId,
        response_expected: bool,
        handler: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        F: Fn(Request) + Send + Sync + 'static,
    {
        self.register(name.into(), provider_id, response_expected, Arc::new(handler))
    }

    /// Typed handler registration (spec §4.1): arguments are decoded
    /// automatically from the request payload, but the handler still
    /// receives the `Request` to respond on its own schedule (needed for
    /// handlers that finish asynchronously, or that must inspect the bulk
    /// wire-form bytes directly).
    pub fn define_with_request<Args, F>(
        &self,
        name: impl Into<String>,
        provider_id: ProviderId,
        response_expected: bool,
        f: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        Args: Decode + Send + 'static,
        F: Fn(Args, Request) + Send + Sync + 'static,
    {
        self.define_raw(name, provider_id, response_expected, move |request| {
            match decode_payload::<Args>(&request) {
                Ok(args) => f(args, request),
                Err(err) => {
                    tracing::warn!(?err, "failed to decode request arguments");
                    request.release();
                }
            }
        })
    }

    /// Pure-function handler registration (spec §4.1, §9): arguments are
    /// decoded and the result encoded and sent back automatically, the way
    /// the original used template metaprogramming to generate a dispatcher
    /// per handler signature.
    pub fn define<Args, R, F>(
        &self,
        name: impl Into<String>,
        provider_id: ProviderId,
        f: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        Args: Decode + Send + 'static,
        R: Encode + Send + 'static,
        F: Fn(Args) -> R + Send + Sync + 'static,
    {
        self.define_with_request(name, provider_id, true, move |args, request| {
            let result = f(args);
            if let Err(err) = request.respond(result) {
                tracing::warn!(?err, "failed to encode response");
            }
        })
    }

    /// Pure-function handler registration for non-responding procedures
    /// (spec §4.1, §8 scenario 2): the return value, if any, is discarded.
    pub fn define_ignoring_result<Args, F>(
        &self,
        name: impl Into<String>,
        provider_id: ProviderId,
        f: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        Args: Decode + Send + 'static,
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.define_with_request(name, provider_id, false, move |args, request| {
            f(args);
            request.release();
        })
    }

    /// Idempotent on `(name, provider_id)` (spec §3: "within one engine,
    /// (name, provider-id) → procedure-id is a bijection"; §4.1: "second
    /// call returns the existing procedure-id"). A repeat `define` for an
    /// already-registered name returns a handle for the existing id rather
    /// than allocating a new one and repointing `by_name` at it.
    fn register(
        &self,
        name: String,
        provider_id: ProviderId,
        response_expected: bool,
        handler: Arc<dyn Fn(Request) + Send + Sync>,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError> {
        let qualified = qualified_name(&name, provider_id);
        if let Some(existing_id) = self.state.by_name.get(&qualified).map(|e| *e.get()) {
            let existing_response_expected = self
                .state
                .by_id
                .get(&existing_id.as_u64())
                .map(|e| e.get().response_expected)
                .unwrap_or(response_expected);
            return Ok(ProcedureHandle {
                id: existing_id,
                provider_id,
                response_expected: existing_response_expected,
                state: Arc::downgrade(&self.state),
            });
        }

        let raw_id = self.state.next_procedure_id.fetch_add(1, Ordering::Relaxed);
        let id = ProcedureId::new(raw_id);
        let entry = Arc::new(ProcedureEntry {
            id,
            name: name.clone(),
            provider_id,
            response_expected,
            handler,
        });
        let _ = self.state.by_id.insert(id.as_u64(), entry);
        let _ = self.state.by_name.insert(qualified, id);
        Ok(ProcedureHandle {
            id,
            provider_id,
            response_expected,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Looks up a procedure previously registered (possibly by a peer
    /// engine sharing the same binary) by its qualified name, for clients
    /// that only know a name and a provider id rather than holding the
    /// `ProcedureHandle` the define call returned (spec §4.2).
    pub fn lookup_procedure(
        &self,
        name: &str,
        provider_id: ProviderId,
        response_expected: bool,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError> {
        let id = self
            .state
            .by_name
            .get(&qualified_name(name, provider_id))
            .map(|e| *e.get())
            .ok_or_else(|| Report::new(ThalliumError::ConfigInvalid {
                path: format!("procedures.{name}"),
                reason: "no procedure registered under that name".to_owned(),
            }))?;
        Ok(ProcedureHandle {
            id,
            provider_id,
            response_expected,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Deregisters a procedure (spec §4.1: providers clean up their own
    /// procedures on drop).
    pub(crate) fn deregister(&self, name: &str, provider_id: ProviderId, id: ProcedureId) {
        let _ = self.state.by_id.remove(&id.as_u64());
        let _ = self.state.by_name.remove(&qualified_name(name, provider_id));
    }

    /// Pushes a prefinalize callback, run (LIFO) before the engine's
    /// xstreams are stopped (spec §4.1, §4.3).
    pub fn push_prefinalize_callback(&self, owner: Option<ProviderId>, callback: impl FnOnce() + Send + 'static) {
        self.state.prefinalize.lock().push(CallbackEntry { owner, callback: Box::new(callback) });
    }

    /// Pushes a finalize callback, run (LIFO) after the engine's xstreams
    /// have stopped and joined (spec §4.1, §4.3).
    pub fn push_finalize_callback(&self, owner: Option<ProviderId>, callback: impl FnOnce() + Send + 'static) {
        self.state.finalize.lock().push(CallbackEntry { owner, callback: Box::new(callback) });
    }

    /// Pops and runs the most recently pushed prefinalize callback. Returns
    /// `false` if the stack was empty.
    pub fn pop_prefinalize_callback(&self) -> bool {
        pop_and_run(&self.state.prefinalize)
    }

    /// Pops and runs the most recently pushed finalize callback. Returns
    /// `false` if the stack was empty.
    pub fn pop_finalize_callback(&self) -> bool {
        pop_and_run(&self.state.finalize)
    }

    #[must_use]
    pub fn top_prefinalize_callback_owner(&self) -> Option<ProviderId> {
        self.state.prefinalize.lock().last().and_then(|entry| entry.owner)
    }

    #[must_use]
    pub fn top_finalize_callback_owner(&self) -> Option<ProviderId> {
        self.state.finalize.lock().last().and_then(|entry| entry.owner)
    }

    /// Runs prefinalize callbacks, stops and joins every xstream, then runs
    /// finalize callbacks, in that order (spec §4.1, §4.3, §8 scenario 6).
    /// Idempotent: a second call is a no-op.
    pub fn finalize(&self) -> error_stack::Result<(), ThalliumError> {
        if self.state.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        while pop_and_run(&self.state.prefinalize) {}

        let xstreams = std::mem::take(&mut *self.state.xstreams.lock());
        for xstream in &xstreams {
            xstream.request_stop();
        }
        for xstream in xstreams {
            xstream.join()?;
        }

        while pop_and_run(&self.state.finalize) {}

        self.state.finalize_notify.notify_waiters();
        Ok(())
    }

    /// Suspends the calling ULT until `finalize` has run to completion,
    /// from any clone of this engine (spec §4.1 `wait_for_finalize`).
    pub async fn wait_for_finalize(&self) {
        while self.state.is_valid() {
            self.state.finalize_notify.notified().await;
        }
    }

    /// Installs the engine-level shutdown procedure: a peer calling it
    /// triggers `finalize` on this side (spec §4.1 `enable_remote_shutdown`).
    /// The handler closure captures a `Weak<EngineState>`, never a strong
    /// `Engine`, so the registration table does not keep the engine alive
    /// past its last external reference.
    pub fn enable_remote_shutdown(&self) -> error_stack::Result<(), ThalliumError> {
        let weak = Arc::downgrade(&self.state);
        let handler: Arc<dyn Fn(Request) + Send + Sync> = Arc::new(move |request: Request| {
            request.release();
            if let Some(state) = weak.upgrade() {
                let engine = Engine { state };
                if let Err(err) = engine.finalize() {
                    tracing::warn!(?err, "remote shutdown triggered a failing finalize");
                }
            }
        });
        let entry = Arc::new(ProcedureEntry {
            id: SHUTDOWN_PROCEDURE_ID,
            name: SHUTDOWN_PROCEDURE.to_owned(),
            provider_id: ProviderId::ENGINE,
            response_expected: false,
            handler,
        });
        let _ = self.state.by_id.insert(SHUTDOWN_PROCEDURE_ID.as_u64(), entry);
        Ok(())
    }

    /// Asks `endpoint`'s engine to shut itself down via the procedure
    /// `enable_remote_shutdown` installed there (spec §4.1
    /// `shutdown_remote_engine`). Fire-and-forget: does not wait for the
    /// peer to actually finish finalizing.
    pub async fn shutdown_remote_engine(&self, endpoint: &Endpoint) -> error_stack::Result<(), ThalliumError> {
        self.state
            .transport
            .forward(endpoint, SHUTDOWN_PROCEDURE_ID, ProviderId::ENGINE, Bytes::new(), false, None)
            .await?;
        Ok(())
    }
}

fn qualified_name(name: &str, provider_id: ProviderId) -> String {
    format!("{}:{name}", provider_id.as_u16())
}

fn pop_and_run(stack: &parking_lot::Mutex<Vec<CallbackEntry>>) -> bool {
    let Some(entry) = stack.lock().pop() else {
        return false;
    };
    (entry.callback)();
    true
}

fn decode_payload<T: Decode>(request: &Request) -> error_stack::Result<T, ThalliumError> {
    let mut archive = BufferDecodeArchive::<()>::new(request.payload().clone(), ());
    decode_tagged(&mut archive)
}

/// A registered procedure (spec §3, Procedure Handle). Clone-able,
/// `'static`: holding one past engine finalization is safe, just useless
/// (`.on(..).call(..)` then fails with `EngineInvalid`).
#[derive(Clone)]
pub struct ProcedureHandle {
    pub(crate) id: ProcedureId,
    pub(crate) provider_id: ProviderId,
    pub(crate) response_expected: bool,
    pub(crate) state: Weak<EngineState>,
}

impl ProcedureHandle {
    #[must_use]
    pub fn id(&self) -> ProcedureId {
        self.id
    }

    #[must_use]
    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    #[must_use]
    pub fn response_expected(&self) -> bool {
        self.response_expected
    }

    pub(crate) fn upgrade(&self) -> error_stack::Result<Arc<EngineState>, ThalliumError> {
        self.state.upgrade().ok_or_else(|| Report::new(ThalliumError::EngineInvalid))
    }
}

pub(crate) fn encode_args<Args: Encode>(args: &Args) -> error_stack::Result<Bytes, ThalliumError> {
    let mut archive = BufferEncodeArchive::<()>::new(());
    encode_tagged(args, &mut archive)?;
    Ok(archive.into_bytes())
}
