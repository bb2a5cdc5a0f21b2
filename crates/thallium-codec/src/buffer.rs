//! Concrete archives backed by an in-memory byte buffer. This is the archive
//! implementation `thallium-net` hands to encode/decode calls: the
//! transport's byte proc is, for every backend this workspace ships, just a
//! contiguous buffer.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use error_stack::Report;
use thallium_types::ThalliumError;

use crate::archive::{Archive, DecodeArchive, EncodeArchive, EngineHandle, NullEngineHandle};

/// Encode archive over a growable byte buffer.
pub struct BufferEncodeArchive<Ctx> {
    buf: BytesMut,
    context: Ctx,
    engine: Arc<dyn EngineHandle>,
}

impl<Ctx> BufferEncodeArchive<Ctx> {
    #[must_use]
    pub fn new(context: Ctx) -> Self {
        Self {
            buf: BytesMut::new(),
            context,
            engine: Arc::new(NullEngineHandle),
        }
    }

    #[must_use]
    pub fn with_engine(context: Ctx, engine: Arc<dyn EngineHandle>) -> Self {
        Self {
            buf: BytesMut::new(),
            context,
            engine,
        }
    }

    /// Consume the archive, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl<Ctx> Archive for BufferEncodeArchive<Ctx> {
    type Context = Ctx;

    fn context(&self) -> &Ctx {
        &self.context
    }

    fn engine_handle(&self) -> &dyn EngineHandle {
        self.engine.as_ref()
    }
}

impl<Ctx> EncodeArchive for BufferEncodeArchive<Ctx> {
    fn write(&mut self, bytes: &[u8]) -> error_stack::Result<(), ThalliumError> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

/// Decode archive over a `Bytes` view produced by the transport.
pub struct BufferDecodeArchive<Ctx> {
    buf: Bytes,
    cursor: usize,
    context: Ctx,
    engine: Arc<dyn EngineHandle>,
}

impl<Ctx> BufferDecodeArchive<Ctx> {
    #[must_use]
    pub fn new(buf: Bytes, context: Ctx) -> Self {
        Self {
            buf,
            cursor: 0,
            context,
            engine: Arc::new(NullEngineHandle),
        }
    }

    #[must_use]
    pub fn with_engine(buf: Bytes, context: Ctx, engine: Arc<dyn EngineHandle>) -> Self {
        Self {
            buf,
            cursor: 0,
            context,
            engine,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.cursor)
    }
}

impl<Ctx> Archive for BufferDecodeArchive<Ctx> {
    type Context = Ctx;

    fn context(&self) -> &Ctx {
        &self.context
    }

    fn engine_handle(&self) -> &dyn EngineHandle {
        self.engine.as_ref()
    }
}

impl<Ctx> DecodeArchive for BufferDecodeArchive<Ctx> {
    fn read(&mut self, out: &mut [u8]) -> error_stack::Result<(), ThalliumError> {
        if self.remaining() < out.len() {
            return Err(Report::new(ThalliumError::DecodeError {
                expected: format!("{} bytes", out.len()),
                got: format!("{} remaining", self.remaining()),
            }));
        }
        let start = self.cursor;
        let end = start + out.len();
        out.copy_from_slice(&self.buf[start..end]);
        self.cursor = end;
        Ok(())
    }

    fn restore_ptr(&mut self, len: usize) -> error_stack::Result<Bytes, ThalliumError> {
        if self.remaining() < len {
            return Err(Report::new(ThalliumError::DecodeError {
                expected: format!("{len} bytes"),
                got: format!("{} remaining", self.remaining()),
            }));
        }
        let start = self.cursor;
        let end = start + len;
        self.cursor = end;
        Ok(self.buf.slice(start..end))
    }
}
