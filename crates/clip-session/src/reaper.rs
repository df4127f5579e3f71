//! Reaper: background sweep of finished sessions
//!
//! Loop: sweep → if the map is empty, park until a session is created or
//! shutdown is requested → otherwise wait the reap interval → repeat.
//!
//! The wake lock/condvar pair is separate from the map lock. A `pending`
//! flag keeps a creation that lands between "sweep saw empty" and "park"
//! from being lost.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use clip_core::{ClipError, ClipResult};

use crate::registry::RegistryInner;

#[derive(Debug, Default)]
struct WakeState {
    pending: bool,
    shutdown: bool,
}

/// Idle/wake signalling for the reaper thread
#[derive(Debug, Default)]
pub(crate) struct ReaperSignal {
    state: Mutex<WakeState>,
    cond: Condvar,
}

impl ReaperSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn notify_created(&self) {
        self.state.lock().pending = true;
        self.cond.notify_one();
    }

    pub(crate) fn request_shutdown(&self) {
        self.state.lock().shutdown = true;
        self.cond.notify_all();
    }

    /// Park until there is work. Returns false on shutdown.
    pub(crate) fn wait_for_work(&self) -> bool {
        let mut state = self.state.lock();
        while !state.pending && !state.shutdown {
            self.cond.wait(&mut state);
        }
        state.pending = false;
        !state.shutdown
    }

    /// Sleep up to `interval`; a shutdown request cuts it short. Returns false
    /// on shutdown.
    pub(crate) fn wait_interval(&self, interval: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.shutdown {
            self.cond.wait_for(&mut state, interval);
        }
        !state.shutdown
    }
}

/// Handle to the running reaper thread
pub(crate) struct Reaper {
    inner: Arc<RegistryInner>,
    handle: thread::JoinHandle<()>,
}

impl Reaper {
    pub(crate) fn spawn(inner: Arc<RegistryInner>) -> ClipResult<Self> {
        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(inner.config.reaper_thread_name.clone())
            .spawn(move || run(worker))
            .map_err(|e| {
                log::error!("[Reaper] failed to spawn: {}", e);
                ClipError::Io(e)
            })?;
        Ok(Self { inner, handle })
    }

    /// Signal, wake and join. Does not return while the thread can still
    /// touch the map.
    pub(crate) fn shutdown(self) {
        self.inner.signal.request_shutdown();
        if self.handle.join().is_err() {
            log::error!("[Reaper] thread panicked");
        }
    }
}

fn run(inner: Arc<RegistryInner>) {
    let interval = inner.config.reap_interval();
    log::info!("[Reaper] started (interval {:?})", interval);

    loop {
        let outcome = inner.sweep();
        if outcome.reaped > 0 {
            log::debug!(
                "[Reaper] reaped {}, {} remaining",
                outcome.reaped,
                outcome.remaining
            );
        }

        let keep_running = if outcome.remaining == 0 {
            inner.signal.wait_for_work()
        } else {
            inner.signal.wait_interval(interval)
        };
        if !keep_running {
            break;
        }
    }

    log::info!("[Reaper] stopped");
}
