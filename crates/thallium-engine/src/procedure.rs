//! The outbound (caller) side of an RPC (spec §3, §4.2): binding a
//! `ProcedureHandle` to an `Endpoint` and invoking it. `Callable`'s
//! C++-style call-operator syntax (`proc.on(endpoint)(args...)`) becomes
//! explicit `.call()`/`.call_async()`/`.call_no_response()` methods —
//! stable Rust has no way to implement the `Fn` family of traits for a
//! user-defined type (spec §9).

use std::sync::Arc;

use bytes::Bytes;
use error_stack::Report;
use thallium_codec::{decode_tagged, BufferDecodeArchive, Decode, Encode};
use thallium_net::Endpoint;
use thallium_types::{Deadline, ThalliumError};

use crate::engine::{encode_args, ProcedureHandle};

impl ProcedureHandle {
    /// Binds this procedure to a target endpoint, producing a `Callable`
    /// (spec §4.2: "binding a procedure to a target produces a callable").
    #[must_use]
    pub fn on(&self, endpoint: Endpoint) -> Callable {
        Callable {
            handle: self.clone(),
            endpoint,
            deadline: None,
        }
    }
}

/// A procedure bound to a target endpoint (spec §3, §4.2). Reusable:
/// calling it multiple times issues independent invocations.
#[derive(Clone)]
pub struct Callable {
    handle: ProcedureHandle,
    endpoint: Endpoint,
    deadline: Option<Deadline>,
}

impl Callable {
    /// Bounds how long `call`/`call_async` block waiting for a reply (spec
    /// §4.2, §5). Without one, calls wait indefinitely.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sends `args` and suspends the calling ULT until the reply arrives
    /// (or `with_deadline`'s timeout elapses). Spec §4.2 "synchronous"
    /// call: synchronous w.r.t. the calling ULT, not the OS thread.
    pub async fn call<Args: Encode>(&self, args: Args) -> error_stack::Result<PackedResponse, ThalliumError> {
        let state = self.handle.upgrade()?;
        let payload = encode_args(&args)?;
        let reply = state
            .transport
            .forward(&self.endpoint, self.handle.id, self.handle.provider_id, payload, true, self.deadline)
            .await?;
        let bytes = reply.ok_or_else(|| Report::new(ThalliumError::EmptyResponse))?;
        Ok(PackedResponse::new(bytes))
    }

    /// Sends an already-encoded payload and waits for the reply (spec
    /// §4.5): bulk handles can't implement the generic `Encode`/`Decode`
    /// traits (their wire form depends on the transport, which no archive
    /// context can be assumed to carry), so bulk-carrying RPCs build their
    /// payload through `Transport::encode_bulk` and send it through here
    /// rather than through `call`.
    pub async fn call_raw(&self, payload: Bytes) -> error_stack::Result<PackedResponse, ThalliumError> {
        let state = self.handle.upgrade()?;
        let reply = state
            .transport
            .forward(&self.endpoint, self.handle.id, self.handle.provider_id, payload, true, self.deadline)
            .await?;
        let bytes = reply.ok_or_else(|| Report::new(ThalliumError::EmptyResponse))?;
        Ok(PackedResponse::new(bytes))
    }

    /// Sends `args` without waiting for (or expecting) a reply (spec §4.2,
    /// §8 scenario 2).
    pub async fn call_no_response<Args: Encode>(&self, args: Args) -> error_stack::Result<(), ThalliumError> {
        let state = self.handle.upgrade()?;
        let payload = encode_args(&args)?;
        state
            .transport
            .forward(&self.endpoint, self.handle.id, self.handle.provider_id, payload, false, None)
            .await?;
        Ok(())
    }

    /// Sends `args` on a background task and returns immediately (spec
    /// §4.2 `AsyncResponse`, §8 scenario 3).
    pub fn call_async<Args>(&self, args: Args) -> AsyncResponse
    where
        Args: Encode + Send + 'static,
    {
        let handle = self.handle.clone();
        let endpoint = self.endpoint.clone();
        let deadline = self.deadline;
        let join = tokio::spawn(async move {
            let state = handle.upgrade()?;
            let payload = encode_args(&args)?;
            let reply = state
                .transport
                .forward(&endpoint, handle.id, handle.provider_id, payload, true, deadline)
                .await?;
            let bytes = reply.ok_or_else(|| Report::new(ThalliumError::EmptyResponse))?;
            Ok(PackedResponse::new(bytes))
        });
        AsyncResponse { join: Some(join) }
    }
}

/// A pending asynchronous call (spec §3, §4.2). Dropping one that was
/// never waited on aborts the background task rather than leaking it.
pub struct AsyncResponse {
    join: Option<tokio::task::JoinHandle<error_stack::Result<PackedResponse, ThalliumError>>>,
}

impl AsyncResponse {
    /// Whether the reply has already arrived, without consuming `self`
    /// (spec §4.2 `AsyncResponse::received`).
    #[must_use]
    pub fn received(&self) -> bool {
        match &self.join {
            Some(join) => join.is_finished(),
            None => true,
        }
    }

    /// Suspends the calling ULT until the reply arrives.
    pub async fn wait(mut self) -> error_stack::Result<PackedResponse, ThalliumError> {
        match self.join.take() {
            Some(join) => join.await.map_err(|_| Report::new(ThalliumError::Cancelled))?,
            None => Err(Report::new(ThalliumError::Cancelled)),
        }
    }
}

impl Drop for AsyncResponse {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

/// A reply payload, not yet decoded into a concrete type (spec §3, §4.2).
/// One generic `as_type` serves every arity: a multi-value response is just
/// `as_type::<(T1, T2)>()`, reusing the tuple `Decode` impls rather than
/// generating a family of `as1`/`as2`/`as3` overloads (spec §9).
pub struct PackedResponse {
    bytes: Bytes,
}

impl PackedResponse {
    fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    pub fn as_type<T: Decode>(&self) -> error_stack::Result<T, ThalliumError> {
        let mut archive = BufferDecodeArchive::<()>::new(self.bytes.clone(), ());
        decode_tagged(&mut archive)
    }

    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.bytes
    }
}
