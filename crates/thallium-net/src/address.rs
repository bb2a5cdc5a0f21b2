//! Address / Endpoint: opaque peer identity produced by the transport from a
//! URI string (spec §3, §6). Ref-counted, equality by transport-level
//! address rather than handle identity.

use std::fmt;
use std::sync::Arc;

use thallium_codec::EngineHandle;

struct EndpointInner {
    /// Empty for the null/default endpoint (spec §3: "Null endpoints ...
    /// stringify to empty").
    uri: String,
    engine: Arc<dyn EngineHandle>,
}

/// An opaque peer identity (spec §3, Address/Endpoint). Cloning increments
/// the ref-count on the underlying identity rather than producing a new
/// peer.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    #[must_use]
    pub fn new(uri: impl Into<String>, engine: Arc<dyn EngineHandle>) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                uri: uri.into(),
                engine,
            }),
        }
    }

    /// The null endpoint: default-constructed, stringifies to empty (spec
    /// §3).
    #[must_use]
    pub fn null() -> Self {
        Self::new(String::new(), Arc::new(thallium_codec::NullEngineHandle))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.inner.uri.is_empty()
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    #[must_use]
    pub fn engine_handle(&self) -> &Arc<dyn EngineHandle> {
        &self.inner.engine
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.engine.is_valid()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.uri)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("uri", &self.inner.uri).finish()
    }
}

/// Equality is by transport-level address, *not* handle identity (spec §3):
/// two endpoints looked up from the same URI compare equal even though they
/// are distinct `Arc` allocations.
impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.inner.uri == other.inner.uri
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.uri.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_endpoint_stringifies_to_empty() {
        assert_eq!(Endpoint::null().to_string(), "");
        assert!(Endpoint::null().is_null());
    }

    #[test]
    fn equality_is_by_address_not_identity() {
        let engine = Arc::new(thallium_codec::NullEngineHandle);
        let a = Endpoint::new("tcp://127.0.0.1:9000", engine.clone());
        let b = Endpoint::new("tcp://127.0.0.1:9000", engine);
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a.inner, &b.inner));
    }
}
