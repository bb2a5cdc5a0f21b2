//! Address/endpoint identity, the `Transport` collaborator contract, and
//! the bulk/RDMA segment algebra (spec §3, §4.5, §6), grounded on
//! `harpc-net`/`harpc-wire-protocol`.

mod address;
mod bulk;
mod transport;

pub use address::Endpoint;
pub use bulk::{pull, push, BulkHandle, BulkMode, BulkRegistry, BulkSegment, RemoteBulk};
pub use transport::{InboundCall, InboundDispatcher, LoopbackTransport, Transport};
