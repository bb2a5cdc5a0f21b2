//! Provider: a namespace of procedures sharing one `ProviderId`, scoped to a
//! single engine (spec §3, §4.3, §8 scenario 5 "provider multiplexing").
//! Dropping a `Provider` deregisters everything it defined rather than
//! leaving stale entries in the engine's dispatch table.

use std::sync::{Arc, Mutex, Weak};

use thallium_codec::{Decode, Encode};
use thallium_types::{ProviderId, ThalliumError};

use crate::engine::{Engine, ProcedureHandle};
use crate::request::Request;

struct Registered {
    name: String,
    id: thallium_types::ProcedureId,
}

/// A provider-scoped registration namespace (spec §3, §4.3). Multiple
/// providers can share one engine, each with its own `ProviderId`, without
/// their procedure names colliding (spec §8 scenario 5).
pub struct Provider {
    engine: Engine,
    provider_id: ProviderId,
    registered: Mutex<Vec<Registered>>,
}

impl Provider {
    /// Registers `self` under `provider_id` on `engine`. Installs a
    /// finalize callback that deregisters this provider's procedures when
    /// the engine shuts down, ahead of the provider itself being dropped
    /// (spec §4.1, §4.3).
    #[must_use]
    pub fn new(engine: &Engine, provider_id: ProviderId) -> Arc<Self> {
        let provider = Arc::new(Self {
            engine: engine.clone(),
            provider_id,
            registered: Mutex::new(Vec::new()),
        });

        // The finalize callback captures a `Weak` to the provider, not a
        // strong `Arc`, so the engine's callback stack does not keep the
        // provider (and transitively, via `engine`, the engine itself)
        // alive past its last external reference.
        let weak: Weak<Self> = Arc::downgrade(&provider);
        engine.push_finalize_callback(Some(provider_id), move || {
            if let Some(provider) = weak.upgrade() {
                provider.deregister_all();
            }
        });

        provider
    }

    #[must_use]
    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn define_raw<F>(
        &self,
        name: impl Into<String>,
        response_expected: bool,
        handler: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        F: Fn(Request) + Send + Sync + 'static,
    {
        let name = name.into();
        let handle = self.engine.define_raw(name.clone(), self.provider_id, response_expected, handler)?;
        self.track(name, handle.id());
        Ok(handle)
    }

    pub fn define<Args, R, F>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        Args: Decode + Send + 'static,
        R: Encode + Send + 'static,
        F: Fn(Args) -> R + Send + Sync + 'static,
    {
        let name = name.into();
        let handle = self.engine.define(name.clone(), self.provider_id, f)?;
        self.track(name, handle.id());
        Ok(handle)
    }

    pub fn define_ignoring_result<Args, F>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> error_stack::Result<ProcedureHandle, ThalliumError>
    where
        Args: Decode + Send + 'static,
        F: Fn(Args) + Send + Sync + 'static,
    {
        let name = name.into();
        let handle = self.engine.define_ignoring_result(name.clone(), self.provider_id, f)?;
        self.track(name, handle.id());
        Ok(handle)
    }

    fn track(&self, name: String, id: thallium_types::ProcedureId) {
        self.registered.lock().expect("provider registry mutex poisoned").push(Registered { name, id });
    }

    fn deregister_all(&self) {
        for entry in self.registered.lock().expect("provider registry mutex poisoned").drain(..) {
            self.engine.deregister(&entry.name, self.provider_id, entry.id);
        }
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.deregister_all();
    }
}
