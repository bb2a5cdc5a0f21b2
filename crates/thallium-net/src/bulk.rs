//! Bulk handle + segment algebra (spec §3, §4.5): exposed memory, made
//! serializable and transferable without the transport ever copying the
//! caller's buffer.
//!
//! The original ties a bulk handle's lifetime to caller-owned raw memory,
//! "enforced at the type-system level by the ownership discipline of the
//! target language" (spec §9). Rust's discipline for shared, possibly
//! concurrently-accessed memory is `Arc`, not a raw borrow with a lifetime
//! parameter threaded through every handle and RPC future — so exposed
//! memory here is `Arc<parking_lot::RwLock<Vec<u8>>>`: the caller keeps a
//! clone and can still see writes the transport makes into it, and the
//! handle cannot dangle because the `Arc` keeps the backing allocation
//! alive for as long as any handle (local or remote) references it.

use std::fmt;
use std::sync::Arc;

use error_stack::Report;
use parking_lot::RwLock;
use thallium_types::ThalliumError;

use crate::address::Endpoint;

/// Access mode a bulk handle was exposed with (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    Read,
    Write,
    ReadWrite,
}

impl BulkMode {
    #[must_use]
    pub fn allows_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub fn allows_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

type Chunk = Arc<RwLock<Vec<u8>>>;

struct BulkInner {
    /// An exposed sequence of memory segments (spec §3). Each element is an
    /// independently-owned buffer; the bulk handle's total size is their
    /// concatenation.
    chunks: Vec<Chunk>,
    offsets: Vec<usize>,
    total_size: usize,
    mode: BulkMode,
    /// Serialization hint: inline small payloads with the handle instead of
    /// requiring a later transfer (spec §4.5, "eager mode").
    eager: bool,
    /// True once this handle was produced by decoding a wire form rather
    /// than by a local `expose` call — it refers to a peer's memory and may
    /// only be touched through an `Endpoint` (spec §4.5: "the resulting
    /// handle is non-local").
    remote: bool,
}

/// An exposed sequence of memory segments (spec §3, §4.5). Cloning shares
/// the same underlying chunks (ref-counted); dropping the last clone frees
/// the handle, not the memory it points at (the caller's own `Arc` clones
/// keep that alive independently).
#[derive(Clone)]
pub struct BulkHandle {
    inner: Arc<BulkInner>,
}

impl BulkHandle {
    /// Exposes `chunks` under `mode` (spec §4.1 `engine.expose`, §4.5
    /// construction). The caller retains its own `Arc` clones of each
    /// chunk; this handle does not copy their contents.
    #[must_use]
    pub fn expose(chunks: Vec<Chunk>, mode: BulkMode, eager: bool) -> Self {
        let mut offsets = Vec::with_capacity(chunks.len());
        let mut total = 0usize;
        for chunk in &chunks {
            offsets.push(total);
            total += chunk.read().len();
        }
        Self {
            inner: Arc::new(BulkInner {
                chunks,
                offsets,
                total_size: total,
                mode,
                eager,
                remote: false,
            }),
        }
    }

    fn remote_from_parts(chunks: Vec<Chunk>, offsets: Vec<usize>, total_size: usize, mode: BulkMode, eager: bool) -> Self {
        Self {
            inner: Arc::new(BulkInner {
                chunks,
                offsets,
                total_size,
                mode,
                eager,
                remote: true,
            }),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.total_size
    }

    #[must_use]
    pub fn mode(&self) -> BulkMode {
        self.inner.mode
    }

    #[must_use]
    pub fn is_eager(&self) -> bool {
        self.inner.eager
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.inner.remote
    }

    /// A segment covering the whole handle (spec §8: `b.select(0, N) == b`).
    #[must_use]
    pub fn segment(&self) -> BulkSegment {
        BulkSegment {
            bulk: self.clone(),
            offset: 0,
            size: self.inner.total_size,
        }
    }

    /// Copies `len` bytes starting at `offset` out of the concatenated
    /// chunks. Panics if the mode forbids reads; callers are expected to
    /// check `mode()` before transferring (mirrors the original's
    /// debug-mode assertion discipline, spec §7).
    fn read_range(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(self.inner.mode.allows_read(), "bulk handle is not readable");
        let mut out = Vec::with_capacity(len);
        let mut remaining = len;
        let mut pos = offset;
        for (chunk, &base) in self.inner.chunks.iter().zip(&self.inner.offsets) {
            if remaining == 0 {
                break;
            }
            let chunk_len = chunk.read().len();
            let chunk_end = base + chunk_len;
            if pos >= chunk_end {
                continue;
            }
            let local_off = pos.saturating_sub(base);
            let take = remaining.min(chunk_len - local_off);
            out.extend_from_slice(&chunk.read()[local_off..local_off + take]);
            pos += take;
            remaining -= take;
        }
        out
    }

    /// Writes `data` starting at `offset` across the concatenated chunks.
    fn write_range(&self, offset: usize, data: &[u8]) {
        assert!(self.inner.mode.allows_write(), "bulk handle is not writable");
        let mut remaining = data.len();
        let mut src = 0usize;
        let mut pos = offset;
        for (chunk, &base) in self.inner.chunks.iter().zip(&self.inner.offsets) {
            if remaining == 0 {
                break;
            }
            let mut guard = chunk.write();
            let chunk_len = guard.len();
            let chunk_end = base + chunk_len;
            if pos >= chunk_end {
                continue;
            }
            let local_off = pos.saturating_sub(base);
            let take = remaining.min(chunk_len - local_off);
            guard[local_off..local_off + take].copy_from_slice(&data[src..src + take]);
            pos += take;
            src += take;
            remaining -= take;
        }
    }
}

impl fmt::Debug for BulkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkHandle")
            .field("size", &self.inner.total_size)
            .field("mode", &self.inner.mode)
            .field("remote", &self.inner.remote)
            .finish()
    }
}

/// A `(bulk, offset, size)` sub-view (spec §3, §4.5).
#[derive(Clone)]
pub struct BulkSegment {
    bulk: BulkHandle,
    offset: usize,
    size: usize,
}

impl BulkSegment {
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn bulk(&self) -> &BulkHandle {
        &self.bulk
    }

    /// Produces a sub-segment, clamping `size` to what remains (spec §4.5,
    /// §8).
    #[must_use]
    pub fn select(&self, offset: usize, size: usize) -> Self {
        let avail = self.size.saturating_sub(offset);
        Self {
            bulk: self.bulk.clone(),
            offset: self.offset + offset.min(self.size),
            size: size.min(avail),
        }
    }

    fn read_bytes(&self) -> Vec<u8> {
        self.bulk.read_range(self.offset, self.size)
    }

    fn write_bytes(&self, data: &[u8]) {
        self.bulk.write_range(self.offset, data);
    }
}

impl PartialEq for BulkSegment {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bulk.inner, &other.bulk.inner)
            && self.offset == other.offset
            && self.size == other.size
    }
}

impl Eq for BulkSegment {}

/// A `BulkSegment` plus an `Endpoint` (spec §4.5): the only shape that may
/// appear on the right of `>>` or the left of `<<`.
#[derive(Clone)]
pub struct RemoteBulk {
    segment: BulkSegment,
    endpoint: Endpoint,
}

impl RemoteBulk {
    #[must_use]
    pub fn new(segment: BulkSegment, endpoint: Endpoint) -> Self {
        Self { segment, endpoint }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.segment.size
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn select(&self, offset: usize, size: usize) -> Self {
        Self {
            segment: self.segment.select(offset, size),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// `local_segment >> remote` issues a PUSH: local → remote (spec §4.5).
/// Transfer size is `min(left.size, right.size)`; blocks the calling ULT
/// until complete, which for this in-process transport means "runs to
/// completion synchronously" — real transports would `.await` network I/O
/// here instead.
pub fn push(local: &BulkSegment, remote: &RemoteBulk) -> error_stack::Result<usize, ThalliumError> {
    transfer(local, &remote.segment, Direction::Push)
}

/// `local_segment << remote` issues a PULL: remote → local (spec §4.5).
pub fn pull(local: &BulkSegment, remote: &RemoteBulk) -> error_stack::Result<usize, ThalliumError> {
    transfer(local, &remote.segment, Direction::Pull)
}

enum Direction {
    Push,
    Pull,
}

fn transfer(
    local: &BulkSegment,
    remote: &BulkSegment,
    direction: Direction,
) -> error_stack::Result<usize, ThalliumError> {
    let size = local.size.min(remote.size);
    match direction {
        Direction::Push => {
            if !local.bulk.inner.mode.allows_read() || !remote.bulk.inner.mode.allows_write() {
                return Err(Report::new(ThalliumError::TransportFault {
                    code: "incompatible bulk access mode".to_owned(),
                    op: "bulk::push",
                }));
            }
            let data = local.bulk.read_range(local.offset, size);
            remote.bulk.write_range(remote.offset, &data);
        }
        Direction::Pull => {
            if !remote.bulk.inner.mode.allows_read() || !local.bulk.inner.mode.allows_write() {
                return Err(Report::new(ThalliumError::TransportFault {
                    code: "incompatible bulk access mode".to_owned(),
                    op: "bulk::pull",
                }));
            }
            let data = remote.bulk.read_range(remote.offset, size);
            local.bulk.write_range(local.offset, &data);
        }
    }
    Ok(size)
}

impl std::ops::Shr<&RemoteBulk> for &BulkSegment {
    type Output = error_stack::Result<usize, ThalliumError>;

    fn shr(self, remote: &RemoteBulk) -> Self::Output {
        push(self, remote)
    }
}

impl std::ops::Shl<&RemoteBulk> for &BulkSegment {
    type Output = error_stack::Result<usize, ThalliumError>;

    fn shl(self, remote: &RemoteBulk) -> Self::Output {
        pull(self, remote)
    }
}

/// Registry keyed by an opaque id, standing in for the transport-defined
/// wire representation of a bulk handle (spec §4.5: "the on-wire
/// representation of a bulk handle is transport-defined and opaque").
/// Grounded on `harpc-net`'s use of `scc` for its connection/session tables.
pub struct BulkRegistry {
    table: scc::HashMap<u64, BulkHandle>,
    next_id: std::sync::atomic::AtomicU64,
}

impl BulkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: scc::HashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Registers `bulk` and returns the id its wire form will carry.
    pub fn register(&self, bulk: BulkHandle) -> u64 {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let _ = self.table.insert(id, bulk);
        id
    }

    /// Materializes a "remote" handle for `id` (spec §4.5: "ask the
    /// transport to materialize a remote bulk handle from those bytes").
    /// Since this transport is in-process, the remote handle really does
    /// share the original chunks — real backends would instead allocate a
    /// registered-memory-region stand-in.
    #[must_use]
    pub fn materialize_remote(&self, id: u64) -> Option<BulkHandle> {
        self.table.get(&id).map(|entry| {
            let bulk = entry.get();
            BulkHandle::remote_from_parts(
                bulk.inner.chunks.clone(),
                bulk.inner.offsets.clone(),
                bulk.inner.total_size,
                bulk.inner.mode,
                bulk.inner.eager,
            )
        })
    }
}

impl Default for BulkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(bytes: &[u8]) -> Chunk {
        Arc::new(RwLock::new(bytes.to_vec()))
    }

    #[test]
    fn select_clamps_to_remaining_size() {
        let bulk = BulkHandle::expose(vec![chunk(b"0123456789")], BulkMode::ReadWrite, false);
        let whole = bulk.segment();
        assert_eq!(whole, bulk.segment());
        assert_eq!(whole.size(), 10);

        let clamped = whole.select(8, 100);
        assert_eq!(clamped.size(), 2);

        let sub = whole.select(2, 3);
        assert_eq!(sub.size(), 3);
    }

    #[test]
    fn push_then_pull_restores_original_bytes() {
        let client_buf = chunk(b"Matthieu\0");
        let client_bulk = BulkHandle::expose(vec![client_buf.clone()], BulkMode::Read, false);

        let server_buf = chunk(&[0u8; 6]);
        let server_bulk = BulkHandle::expose(vec![server_buf.clone()], BulkMode::Write, false);

        let endpoint = Endpoint::null();
        let remote = RemoteBulk::new(server_bulk.segment(), endpoint);
        let local = client_bulk.segment();

        let n = push(&local, &remote).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&server_buf.read()[..], b"Matthi");
    }

    #[test]
    fn registry_materializes_remote_sharing_same_memory() {
        let registry = BulkRegistry::new();
        let buf = chunk(b"hello!");
        let bulk = BulkHandle::expose(vec![buf.clone()], BulkMode::ReadWrite, false);
        let id = registry.register(bulk);

        let remote = registry.materialize_remote(id).unwrap();
        assert!(remote.is_remote());
        assert_eq!(remote.size(), 6);
    }
}
