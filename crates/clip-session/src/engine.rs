//! Engine capability and its lazy, retryable initialization

use std::sync::Arc;

use parking_lot::Mutex;

use clip_core::{ClipError, ClipResult};

use crate::device::{DeviceSpec, PlaybackDevice};

/// Opaque audio engine: creates devices attached to clips
pub trait Engine: Send + Sync {
    fn create_device(&self, spec: DeviceSpec<'_>) -> ClipResult<Box<dyn PlaybackDevice>>;
}

/// Builds the engine on first use.
///
/// Implementations must release whatever they created before returning an
/// error, so a failed attempt leaves nothing behind and can be retried.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> ClipResult<Arc<dyn Engine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> ClipResult<Arc<dyn Engine>> + Send + Sync,
{
    fn create(&self) -> ClipResult<Arc<dyn Engine>> {
        self()
    }
}

#[derive(Default)]
struct SlotState {
    engine: Option<Arc<dyn Engine>>,
    closed: bool,
}

/// Holds the engine once created. Closing is final.
pub(crate) struct EngineSlot {
    factory: Arc<dyn EngineFactory>,
    state: Mutex<SlotState>,
}

impl EngineSlot {
    pub(crate) fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Concurrent first callers serialize on the slot lock, so the factory
    /// runs at most once per successful initialization. Fails with
    /// `ShutDown` once the slot is closed.
    pub(crate) fn get_or_init(&self) -> ClipResult<Arc<dyn Engine>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClipError::ShutDown);
        }
        if let Some(engine) = state.engine.as_ref() {
            return Ok(Arc::clone(engine));
        }

        match self.factory.create() {
            Ok(engine) => {
                log::info!("[Engine] initialized");
                state.engine = Some(Arc::clone(&engine));
                Ok(engine)
            }
            Err(e) => {
                log::warn!("[Engine] initialization failed: {}", e);
                Err(e)
            }
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state.lock().engine.is_some()
    }

    /// Take the engine out and refuse every later initialization
    pub(crate) fn close(&self) -> Option<Arc<dyn Engine>> {
        let mut state = self.state.lock();
        state.closed = true;
        state.engine.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullEngine;

    impl Engine for NullEngine {
        fn create_device(&self, _spec: DeviceSpec<'_>) -> ClipResult<Box<dyn PlaybackDevice>> {
            Err(ClipError::Device("null engine".into()))
        }
    }

    #[test]
    fn test_init_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = EngineSlot::new(Arc::new(move || -> ClipResult<Arc<dyn Engine>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullEngine))
        }));

        assert!(!slot.is_initialized());
        slot.get_or_init().unwrap();
        slot.get_or_init().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.is_initialized());
    }

    #[test]
    fn test_failed_init_can_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = EngineSlot::new(Arc::new(move || -> ClipResult<Arc<dyn Engine>> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClipError::EngineInit("first attempt".into()))
            } else {
                Ok(Arc::new(NullEngine))
            }
        }));

        assert!(slot.get_or_init().is_err());
        assert!(!slot.is_initialized());
        assert!(slot.get_or_init().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_empties_slot() {
        let slot = EngineSlot::new(Arc::new(|| -> ClipResult<Arc<dyn Engine>> {
            Ok(Arc::new(NullEngine))
        }));
        slot.get_or_init().unwrap();
        assert!(slot.close().is_some());
        assert!(!slot.is_initialized());
        assert!(slot.close().is_none());
    }

    #[test]
    fn test_closed_slot_never_initializes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = EngineSlot::new(Arc::new(move || -> ClipResult<Arc<dyn Engine>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullEngine))
        }));

        assert!(slot.close().is_none());
        assert!(matches!(slot.get_or_init(), Err(ClipError::ShutDown)));
        assert!(!slot.is_initialized());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
