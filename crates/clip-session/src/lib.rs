//! clip-session: Concurrent playback-session manager
//!
//! Tracks many short-lived sound sessions whose real playback state lives on
//! device threads:
//! - Session registry with process-unique handles
//! - Background reaper that frees finished sessions
//! - Device signal re-entry (prefetch fill, head at end)
//! - Caller-side proxy with a handle slot cleared on stop
//! - Simulated engine backend for tests and the stress harness

mod asset;
mod config;
mod device;
mod engine;
mod host;
mod proxy;
mod reaper;
mod registry;
mod session;
pub mod sim;

pub use asset::{AssetSource, ClipLocator, ClipStream, DirAssetSource};
pub use config::{DEFAULT_REAP_INTERVAL_MS, RegistryConfig};
pub use device::{DeviceCallback, DeviceEvent, DeviceSpec, PlaybackDevice};
pub use engine::{Engine, EngineFactory};
pub use host::Host;
pub use proxy::{ClipPlayer, HandleSlot};
pub use registry::{SessionRegistry, SweepOutcome};
pub use session::{SessionInfo, SessionState, reap_eligible};

pub use clip_core::{
    ClipError, ClipResult, Millibels, Pan, Permille, PrefetchStatus, SessionId, SetupStep, Volume,
};
