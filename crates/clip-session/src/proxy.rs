//! Caller-side proxy
//!
//! [`ClipPlayer`] is what application code holds: it caches the session handle
//! in a shared [`HandleSlot`]. The session keeps only a `Weak` to that slot and
//! clears it on stop, so a stopped sound can't be driven again through a stale
//! proxy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clip_core::{ClipResult, SessionId};

use crate::registry::SessionRegistry;

/// Cached handle shared between a proxy and its session (0 = none)
#[derive(Debug, Default)]
pub struct HandleSlot(AtomicU64);

impl HandleSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> Option<SessionId> {
        SessionId::from_raw(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn publish(&self, id: SessionId) {
        self.0.store(id.get(), Ordering::Release);
    }

    /// Clears the slot only while it still names `id`; a newer handle stays.
    pub(crate) fn clear_if(&self, id: SessionId) -> bool {
        self.0
            .compare_exchange(id.get(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Application-facing handle object; every call reports plain success/failure
pub struct ClipPlayer {
    registry: Arc<SessionRegistry>,
    slot: Arc<HandleSlot>,
}

impl ClipPlayer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            slot: HandleSlot::new(),
        }
    }

    /// Starts a session for this proxy. Refused while a handle is cached.
    pub fn init(&self, path: &str, volume: f32, looping: bool) -> bool {
        if self.slot.get().is_some() {
            return false;
        }
        match self
            .registry
            .create_bound_session(path, volume, looping, &self.slot)
        {
            Ok(_) => true,
            Err(e) => {
                log::debug!("[ClipPlayer] init {} failed: {}", path, e);
                false
            }
        }
    }

    pub fn handle(&self) -> Option<SessionId> {
        self.slot.get()
    }

    pub fn play(&self) -> bool {
        self.forward(|r, id| r.play(id))
    }

    pub fn pause(&self) -> bool {
        self.forward(|r, id| r.pause(id))
    }

    pub fn resume(&self) -> bool {
        self.forward(|r, id| r.resume(id))
    }

    pub fn stop(&self) -> bool {
        self.forward(|r, id| r.stop(id))
    }

    pub fn set_volume(&self, volume: f32) -> bool {
        self.forward(|r, id| r.set_volume(id, volume))
    }

    pub fn set_params(&self, pitch: f32, pan: f32, volume: f32) -> bool {
        self.forward(|r, id| r.set_params(id, pitch, pan, volume))
    }

    fn forward(&self, op: impl FnOnce(&SessionRegistry, SessionId) -> ClipResult<()>) -> bool {
        match self.slot.get() {
            Some(id) => op(&self.registry, id).is_ok(),
            None => false,
        }
    }
}
