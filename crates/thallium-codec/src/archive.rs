//! The archive interface (spec §4.4): every archive exposes byte-wise
//! `write`/`read`, zero-copy `save_ptr`/`restore_ptr`, a handle to the
//! per-call serialization context, and a back-reference to the owning
//! engine.

use error_stack::Report;
use thallium_types::ThalliumError;

/// What an archive needs from "the engine" without depending on
/// `thallium-engine` directly (the codec crate sits below the engine in the
/// component dependency order, spec §2; the engine implements this trait for
/// its internal weak back-reference wrapper).
pub trait EngineHandle: Send + Sync + core::fmt::Debug {
    /// Strong-upgrade check: `false` once the engine has been finalized.
    fn is_valid(&self) -> bool;
}

/// An `EngineHandle` that is always valid, for archives constructed outside
/// of any engine (unit tests, standalone archive round-trips).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEngineHandle;

impl EngineHandle for NullEngineHandle {
    fn is_valid(&self) -> bool {
        true
    }
}

/// Common surface shared by encode and decode archives.
pub trait Archive {
    /// The per-call serialization context type, known statically at the
    /// call site (spec §4.4: "a heterogeneous tuple... In languages with
    /// generics, this is a type parameter on the archive").
    type Context;

    fn context(&self) -> &Self::Context;

    /// Strong-upgrade the engine back-reference; fails with `EngineInvalid`
    /// after the engine has been finalized.
    fn engine(&self) -> error_stack::Result<(), ThalliumError> {
        if self.engine_handle().is_valid() {
            Ok(())
        } else {
            Err(Report::new(ThalliumError::EngineInvalid))
        }
    }

    fn engine_handle(&self) -> &dyn EngineHandle;
}

/// Encode direction (server reply or client send, spec §4.4).
pub trait EncodeArchive: Archive {
    /// Byte-wise copy of a trivially-copyable value's representation.
    fn write(&mut self, bytes: &[u8]) -> error_stack::Result<(), ThalliumError>;

    /// Zero-copy borrow of caller memory appended to the wire buffer without
    /// an intermediate copy (spec §4.4: `save_ptr(n)`).
    fn save_ptr(&mut self, bytes: &[u8]) -> error_stack::Result<(), ThalliumError> {
        self.write(bytes)
    }
}

/// Decode direction (server receive or client response, spec §4.4).
pub trait DecodeArchive: Archive {
    /// Byte-wise copy out of the underlying byte proc.
    fn read(&mut self, out: &mut [u8]) -> error_stack::Result<(), ThalliumError>;

    /// Zero-copy borrow of `n` bytes from the underlying buffer (spec §4.4:
    /// `restore_ptr(ptr, n)`). Returns an owned `Bytes` that shares the
    /// backing allocation rather than copying it.
    fn restore_ptr(&mut self, len: usize) -> error_stack::Result<bytes::Bytes, ThalliumError>;
}
