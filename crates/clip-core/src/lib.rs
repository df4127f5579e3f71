//! clip-core: Shared types for the clip session manager
//!
//! Session identities, the error taxonomy, prefetch status and the
//! volume/pan conversions used between the API and the output devices.

mod error;
mod params;

pub use error::*;
pub use params::*;

use std::fmt;

/// Process-unique session handle.
///
/// Handles start at 1 and only ever grow; a value is never handed out twice
/// by the same registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// First handle a registry hands out
    pub const FIRST: Self = Self(1);

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Handles are strictly positive; zero is the "no handle" marker in proxy slots.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Buffer fill status reported by an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrefetchStatus {
    /// Device has not reported anything yet
    Unknown,
    /// Not enough data buffered to play without glitches
    Underflow,
    /// Enough data buffered for stable playback
    SufficientData,
    /// Buffer full
    Overflow,
}

impl PrefetchStatus {
    #[inline]
    pub fn is_sufficient(self) -> bool {
        matches!(self, Self::SufficientData)
    }
}

impl Default for PrefetchStatus {
    fn default() -> Self {
        Self::Unknown
    }
}
