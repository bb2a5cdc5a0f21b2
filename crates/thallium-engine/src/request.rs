//! The inbound side of an RPC (spec §3, §4.1): what a registered handler
//! receives and uses to answer the caller.

use std::sync::Arc;

use bytes::Bytes;
use thallium_codec::{encode_tagged, BufferEncodeArchive, Encode, EngineHandle};
use thallium_net::{Endpoint, InboundCall};
use thallium_types::{ProcedureId, ProviderId, ThalliumError};

/// One inbound call, handed to a registered handler (spec §4.1 step 2).
/// Must be answered with `respond` (if `response_expected()`) or explicitly
/// `release`d; dropping one that still owes a response is a programming
/// error, flagged the same way an unjoined `ExecutionStream` is.
pub struct Request {
    call: InboundCall,
    engine: Arc<dyn EngineHandle>,
    responded: bool,
}

impl Request {
    pub(crate) fn new(call: InboundCall, engine: Arc<dyn EngineHandle>) -> Self {
        Self {
            call,
            engine,
            responded: false,
        }
    }

    #[must_use]
    pub fn origin(&self) -> &Endpoint {
        &self.call.origin
    }

    #[must_use]
    pub fn response_expected(&self) -> bool {
        self.call.response_expected
    }

    #[must_use]
    pub fn provider_id(&self) -> ProviderId {
        self.call.provider_id
    }

    #[must_use]
    pub fn procedure_id(&self) -> ProcedureId {
        self.call.procedure_id
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.call.payload
    }

    #[must_use]
    pub fn engine_handle(&self) -> &Arc<dyn EngineHandle> {
        &self.engine
    }

    /// Encodes `value` and ships it back to the caller. A no-op (but
    /// logged) if this request was marked non-responding.
    pub fn respond<T: Encode>(mut self, value: T) -> error_stack::Result<(), ThalliumError> {
        if !self.call.response_expected {
            tracing::trace!("respond() called on a non-responding request; ignoring");
            self.responded = true;
            return Ok(());
        }
        let mut archive = BufferEncodeArchive::<()>::new(());
        encode_tagged(&value, &mut archive)?;
        self.call.respond(archive.into_bytes());
        self.responded = true;
        Ok(())
    }

    /// Explicitly marks this request as answered without sending a reply
    /// (spec §4.1: non-responding handlers still need to release their
    /// `Request`).
    pub fn release(mut self) {
        self.responded = true;
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.call.response_expected && !self.responded {
            #[cfg(debug_assertions)]
            {
                panic!("Request dropped without a response (response_expected was true)");
            }
            #[cfg(not(debug_assertions))]
            {
                tracing::error!("Request dropped without a response");
            }
        }
    }
}
