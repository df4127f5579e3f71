//! Session: one logical sound in progress
//!
//! ```text
//! Prefetching ─▶ Ready/Playing ⇄ Paused
//!      │               │            │
//!      └───────────────┴────────────┴──▶ Stopped (terminal)
//! ```
//!
//! `head_at_end` and `prefetch_sufficient` are written from callback threads
//! without any lock; everything that drives the device goes through the
//! session's control lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;

use clip_core::{ClipError, ClipResult, Pan, SessionId, Volume};

use crate::asset::ClipStream;
use crate::device::PlaybackDevice;
use crate::proxy::HandleSlot;

/// Reaper predicate. `prefetch_sufficient` is a stability heuristic, not a
/// hardware guarantee that the device finished draining.
#[inline]
pub fn reap_eligible(head_at_end: bool, prefetch_sufficient: bool, looping: bool) -> bool {
    head_at_end && prefetch_sufficient && !looping
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for enough buffered data
    Prefetching,
    /// Buffered, not started
    Ready,
    Playing,
    Paused,
    /// Terminal
    Stopped,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Idle,
    Playing,
    Paused,
}

struct Control {
    transport: Transport,
    volume: Volume,
    pan: Pan,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub looping: bool,
    pub head_at_end: bool,
    pub prefetch_sufficient: bool,
    pub volume: Volume,
    pub pan: Pan,
}

pub(crate) struct Session {
    id: SessionId,
    looping: bool,
    head_at_end: AtomicBool,
    prefetch_sufficient: AtomicBool,
    control: Mutex<Control>,
    proxy: Option<Weak<HandleSlot>>,
    // Field order matters: the device is dropped before the stream it reads.
    device: Box<dyn PlaybackDevice>,
    stream: ClipStream,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        looping: bool,
        volume: Volume,
        device: Box<dyn PlaybackDevice>,
        stream: ClipStream,
        proxy: Option<Weak<HandleSlot>>,
    ) -> Self {
        Self {
            id,
            looping,
            head_at_end: AtomicBool::new(false),
            prefetch_sufficient: AtomicBool::new(false),
            control: Mutex::new(Control {
                transport: Transport::Idle,
                volume,
                pan: Pan::CENTER,
            }),
            proxy,
            device,
            stream,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn path(&self) -> &str {
        self.stream.path()
    }

    pub(crate) fn is_head_at_end(&self) -> bool {
        self.head_at_end.load(Ordering::Acquire)
    }

    pub(crate) fn is_prefetch_sufficient(&self) -> bool {
        self.prefetch_sufficient.load(Ordering::Acquire)
    }

    pub(crate) fn is_reapable(&self) -> bool {
        reap_eligible(
            self.is_head_at_end(),
            self.is_prefetch_sufficient(),
            self.looping,
        )
    }

    fn ensure_live(&self) -> ClipResult<()> {
        if self.is_head_at_end() {
            Err(ClipError::Stopped(self.id))
        } else {
            Ok(())
        }
    }

    pub(crate) fn play(&self) -> ClipResult<()> {
        let mut control = self.control.lock();
        self.ensure_live()?;
        self.device.play()?;
        control.transport = Transport::Playing;
        Ok(())
    }

    pub(crate) fn pause(&self) -> ClipResult<()> {
        let mut control = self.control.lock();
        self.ensure_live()?;
        self.device.pause()?;
        control.transport = Transport::Paused;
        Ok(())
    }

    pub(crate) fn resume(&self) -> ClipResult<()> {
        let mut control = self.control.lock();
        self.ensure_live()?;
        self.device.resume()?;
        control.transport = Transport::Playing;
        Ok(())
    }

    /// Stops the device, marks the session terminal and clears the proxy's
    /// cached handle. A second stop fails with `Stopped`.
    pub(crate) fn stop(&self) -> ClipResult<()> {
        let mut control = self.control.lock();
        self.ensure_live()?;
        self.device.stop()?;
        control.transport = Transport::Idle;
        self.head_at_end.store(true, Ordering::Release);
        self.clear_proxy();
        Ok(())
    }

    pub(crate) fn set_volume(&self, volume: Volume) -> ClipResult<()> {
        let mut control = self.control.lock();
        self.ensure_live()?;
        self.device.set_volume_level(volume.to_millibels())?;
        control.volume = volume;
        Ok(())
    }

    /// Pitch is accepted for API compatibility; devices have no rate control.
    pub(crate) fn set_params(&self, pitch: f32, pan: Pan, volume: Volume) -> ClipResult<()> {
        let mut control = self.control.lock();
        self.ensure_live()?;
        log::trace!("[Session] {} ignoring pitch {}", self.id, pitch);
        self.device.set_volume_level(volume.to_millibels())?;
        control.volume = volume;
        self.device.set_stereo_position(pan.to_permille())?;
        control.pan = pan;
        Ok(())
    }

    /// Head-at-end signal. Returns true the first time.
    pub(crate) fn mark_head_at_end(&self) -> bool {
        !self.head_at_end.swap(true, Ordering::AcqRel)
    }

    /// Prefetch signal: query the device and latch sufficient-data. Never clears.
    pub(crate) fn refresh_prefetch(&self) -> ClipResult<bool> {
        if self.is_prefetch_sufficient() {
            return Ok(true);
        }
        let status = self.device.prefetch_status()?;
        if status.is_sufficient() {
            self.prefetch_sufficient.store(true, Ordering::Release);
        }
        Ok(status.is_sufficient())
    }

    /// Final stop before the session is dropped; errors are only logged.
    pub(crate) fn halt(&self) {
        let _control = self.control.lock();
        if let Err(e) = self.device.stop() {
            log::warn!("[Session] {} stop before release failed: {}", self.id, e);
        }
        self.head_at_end.store(true, Ordering::Release);
    }

    fn clear_proxy(&self) {
        if let Some(slot) = self.proxy.as_ref().and_then(Weak::upgrade) {
            slot.clear_if(self.id);
        }
    }

    #[cfg(test)]
    fn state(&self) -> SessionState {
        let transport = self.control.lock().transport;
        self.state_with(transport)
    }

    fn state_with(&self, transport: Transport) -> SessionState {
        if self.is_head_at_end() {
            return SessionState::Stopped;
        }
        match (transport, self.is_prefetch_sufficient()) {
            (Transport::Paused, _) => SessionState::Paused,
            (_, false) => SessionState::Prefetching,
            (Transport::Idle, true) => SessionState::Ready,
            (Transport::Playing, true) => SessionState::Playing,
        }
    }

    pub(crate) fn info(&self) -> SessionInfo {
        let control = self.control.lock();
        SessionInfo {
            id: self.id,
            state: self.state_with(control.transport),
            looping: self.looping,
            head_at_end: self.is_head_at_end(),
            prefetch_sufficient: self.is_prefetch_sufficient(),
            volume: control.volume,
            pan: control.pan,
        }
    }
}
