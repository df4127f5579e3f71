//! Output device capability
//!
//! A [`PlaybackDevice`] is one hardware/OS audio output bound to one clip.
//! Devices are internally synchronized: controls take `&self` and may be
//! called from any thread. Asynchronous signals come back through the
//! [`DeviceCallback`] registered when the device was created.

use std::sync::Arc;

use clip_core::{ClipResult, Millibels, Permille, PrefetchStatus, SessionId};

use crate::asset::ClipStream;

/// Asynchronous signals a device can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Buffer fill level moved; query [`PlaybackDevice::prefetch_status`]
    PrefetchFillChanged,
    /// Play head reached the end of the clip
    HeadAtEnd,
}

/// Typed callback context. The registry builds one per session, capturing
/// only the session identity.
pub type DeviceCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Everything an engine needs to build a device
pub struct DeviceSpec<'a> {
    pub id: SessionId,
    pub stream: &'a ClipStream,
    pub looping: bool,
    pub volume: Millibels,
    pub callback: DeviceCallback,
}

/// Primitive controls of one output
pub trait PlaybackDevice: Send + Sync {
    fn play(&self) -> ClipResult<()>;

    fn pause(&self) -> ClipResult<()>;

    /// Resuming is a plain transition back to playing on most drivers
    fn resume(&self) -> ClipResult<()> {
        self.play()
    }

    fn stop(&self) -> ClipResult<()>;

    fn set_volume_level(&self, level: Millibels) -> ClipResult<()>;

    fn set_stereo_position(&self, position: Permille) -> ClipResult<()>;

    fn prefetch_status(&self) -> ClipResult<PrefetchStatus>;
}
