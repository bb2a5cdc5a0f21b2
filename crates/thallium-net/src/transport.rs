//! The `Transport` contract (spec §1, "explicitly out of scope... treated as
//! an external collaborator whose interface we specify only where the core
//! touches it") plus `LoopbackTransport`, an in-process implementation used
//! by the facade crate's end-to-end tests and by single-process
//! deployments (spec §4.1, "the transport calls back into the engine with a
//! transport handle").
//!
//! Grounded on `harpc-net`'s separation between its `libp2p`-backed swarm
//! and the `harpc-server`/`harpc-client` layers that only see an abstract
//! session: real backends (tcp, verbs, na+sm...) would implement this same
//! trait against an actual wire protocol.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use error_stack::Report;
use thallium_types::{Deadline, ProcedureId, ProviderId, ThalliumError};
use tokio::sync::oneshot;

use crate::address::Endpoint;
use crate::bulk::BulkRegistry;

/// An inbound call handed from the transport to the engine (spec §4.1 step
/// 1-3: "the transport calls back into the engine with a transport
/// handle").
pub struct InboundCall {
    pub procedure_id: ProcedureId,
    pub provider_id: ProviderId,
    pub payload: Bytes,
    pub origin: Endpoint,
    pub response_expected: bool,
    responder: Option<oneshot::Sender<Bytes>>,
}

impl InboundCall {
    /// Ships `payload` back to the caller. No-op (but logged) if this call
    /// was not expecting a response.
    pub fn respond(&mut self, payload: Bytes) {
        match self.responder.take() {
            Some(tx) => {
                let _ = tx.send(payload);
            }
            None => {
                tracing::trace!("respond() called with no responder (non-responding or already answered)");
            }
        }
    }
}

/// What the engine registers with the transport so inbound messages reach
/// the dispatch table (spec §4.1).
#[async_trait]
pub trait InboundDispatcher: Send + Sync {
    async fn dispatch(&self, call: InboundCall);
}

/// The transport's collaborator contract (spec §1, §4.1, §4.5, §6): address
/// resolution, message forwarding, and the bulk wire-form round-trip. Every
/// method that can block the calling ULT is `async` so it suspends rather
/// than blocking the OS thread (spec §5).
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Resolves a URI to an `Endpoint` (spec §6: `protocol[+variant]://host:port`).
    fn lookup(&self, uri: &str) -> error_stack::Result<Endpoint, ThalliumError>;

    /// This transport's own address, used to address calls to `self`
    /// (looping a client and server through one engine, spec §8 scenario
    /// 1's "`sum.on(self)`").
    fn self_endpoint(&self) -> Endpoint;

    /// Installs the dispatcher the transport invokes for inbound calls.
    fn bind_dispatcher(&self, dispatcher: Arc<dyn InboundDispatcher>);

    /// Forwards a call to `endpoint` (spec §4.2 step 4). Returns `None` if
    /// the procedure was marked non-responding (send completion returns
    /// immediately after the wire write); otherwise blocks the calling ULT
    /// until the reply arrives or `deadline` passes.
    async fn forward(
        &self,
        endpoint: &Endpoint,
        procedure_id: ProcedureId,
        provider_id: ProviderId,
        payload: Bytes,
        response_expected: bool,
        deadline: Option<Deadline>,
    ) -> error_stack::Result<Option<Bytes>, ThalliumError>;

    /// Registers a bulk handle and returns its wire form (spec §4.5:
    /// "ask the transport how many bytes the wire form needs... serialize
    /// through the transport").
    fn encode_bulk(&self, bulk: &crate::bulk::BulkHandle) -> Bytes;

    /// Materializes a remote bulk handle from a wire form produced by
    /// `encode_bulk` on the peer (spec §4.5).
    fn decode_bulk(&self, bytes: &Bytes) -> error_stack::Result<crate::bulk::BulkHandle, ThalliumError>;

    /// Count of calls this transport has forwarded, for tests that assert
    /// "no reply wire traffic" (spec §8 scenario 2).
    fn request_count(&self) -> u64;
}

/// In-process transport: `forward` calls straight into the bound
/// dispatcher on a spawned ULT-equivalent task rather than going over a
/// socket. Exactly one `LoopbackTransport` backs one `Engine` (spec §3:
/// "the engine is the sole owner of the transport instance").
pub struct LoopbackTransport {
    uri: parking_lot::Mutex<String>,
    dispatcher: parking_lot::Mutex<Option<Arc<dyn InboundDispatcher>>>,
    bulk_registry: BulkRegistry,
    request_count: std::sync::atomic::AtomicU64,
    engine: Arc<dyn thallium_codec::EngineHandle>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new(uri: impl Into<String>, engine: Arc<dyn thallium_codec::EngineHandle>) -> Arc<Self> {
        Arc::new(Self {
            uri: parking_lot::Mutex::new(uri.into()),
            dispatcher: parking_lot::Mutex::new(None),
            bulk_registry: BulkRegistry::new(),
            request_count: std::sync::atomic::AtomicU64::new(0),
            engine,
        })
    }
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("uri", &*self.uri.lock())
            .finish()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn lookup(&self, uri: &str) -> error_stack::Result<Endpoint, ThalliumError> {
        if uri.is_empty() {
            return Ok(Endpoint::null());
        }
        Ok(Endpoint::new(uri.to_owned(), self.engine.clone()))
    }

    fn self_endpoint(&self) -> Endpoint {
        Endpoint::new(self.uri.lock().clone(), self.engine.clone())
    }

    fn bind_dispatcher(&self, dispatcher: Arc<dyn InboundDispatcher>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    async fn forward(
        &self,
        endpoint: &Endpoint,
        procedure_id: ProcedureId,
        provider_id: ProviderId,
        payload: Bytes,
        response_expected: bool,
        deadline: Option<Deadline>,
    ) -> error_stack::Result<Option<Bytes>, ThalliumError> {
        self.request_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let dispatcher = self
            .dispatcher
            .lock()
            .clone()
            .ok_or_else(|| Report::new(ThalliumError::TransportFault {
                code: "no dispatcher bound".to_owned(),
                op: "forward",
            }))?;

        let origin = self.self_endpoint();
        let (tx, rx) = oneshot::channel();
        let call = InboundCall {
            procedure_id,
            provider_id,
            payload,
            origin,
            response_expected,
            responder: response_expected.then_some(tx),
        };
        let _ = endpoint;

        // The dispatcher spawns the handler ULT itself (spec §4.1 step 2);
        // we just need the handler's eventual `respond` to reach `rx`.
        tokio::spawn(async move {
            dispatcher.dispatch(call).await;
        });

        if !response_expected {
            return Ok(None);
        }

        match deadline {
            Some(deadline) => tokio::select! {
                result = rx => result.map(Some).map_err(|_| Report::new(ThalliumError::Cancelled)),
                () = tokio::time::sleep(deadline.remaining()) => Err(Report::new(ThalliumError::Timeout)),
            },
            None => rx.await.map(Some).map_err(|_| Report::new(ThalliumError::Cancelled)),
        }
    }

    fn encode_bulk(&self, bulk: &crate::bulk::BulkHandle) -> Bytes {
        let id = self.bulk_registry.register(bulk.clone());
        Bytes::from(id.to_ne_bytes().to_vec())
    }

    fn decode_bulk(&self, bytes: &Bytes) -> error_stack::Result<crate::bulk::BulkHandle, ThalliumError> {
        let id = u64::from_ne_bytes(bytes.as_ref().try_into().map_err(|_| {
            Report::new(ThalliumError::DecodeError {
                expected: "8-byte bulk id".to_owned(),
                got: format!("{} bytes", bytes.len()),
            })
        })?);
        self.bulk_registry
            .materialize_remote(id)
            .ok_or_else(|| Report::new(ThalliumError::DecodeError {
                expected: "registered bulk id".to_owned(),
                got: id.to_string(),
            }))
    }

    fn request_count(&self) -> u64 {
        self.request_count.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thallium_codec::NullEngineHandle;

    struct EchoDispatcher;

    #[async_trait]
    impl InboundDispatcher for EchoDispatcher {
        async fn dispatch(&self, mut call: InboundCall) {
            let payload = call.payload.clone();
            call.respond(payload);
        }
    }

    #[tokio::test]
    async fn forward_round_trips_through_bound_dispatcher() {
        let transport = LoopbackTransport::new("tcp://127.0.0.1:0", Arc::new(NullEngineHandle));
        transport.bind_dispatcher(Arc::new(EchoDispatcher));

        let endpoint = transport.self_endpoint();
        let reply = transport
            .forward(
                &endpoint,
                ProcedureId::new(1),
                ProviderId::ENGINE,
                Bytes::from_static(b"ping"),
                true,
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, Some(Bytes::from_static(b"ping")));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn non_responding_forward_returns_none_without_blocking() {
        let transport = LoopbackTransport::new("tcp://127.0.0.1:0", Arc::new(NullEngineHandle));
        transport.bind_dispatcher(Arc::new(EchoDispatcher));
        let endpoint = transport.self_endpoint();

        let reply = transport
            .forward(
                &endpoint,
                ProcedureId::new(2),
                ProviderId::ENGINE,
                Bytes::from_static(b"hello"),
                false,
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, None);
    }
}
