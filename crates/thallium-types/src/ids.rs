//! Small copyable identifier newtypes. Kept dependency-free the way the
//! teacher's `harpc-types` crate keeps wire-level ids free of behavior.

use core::fmt;

/// Unique integer id bound to (engine, name) (spec §3, Procedure Handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcedureId(u64);

impl ProcedureId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}

/// Provider-id namespace on top of procedure names (spec §3, Provider).
/// `0` is reserved for engine-level (non-provider) procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProviderId(u16);

impl ProviderId {
    /// Provider-id reserved for engine-level procedures.
    pub const ENGINE: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_engine(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider#{}", self.0)
    }
}
