//! Session registry
//!
//! Owns the handle → session map, the lazily created engine, the bound asset
//! source and the reaper thread. Caller threads, the reaper and device
//! callback threads all serialize on the single map lock; device calls are
//! made after that lock has been released.
//!
//! Sessions are only ever removed by the reaper (or by an explicit
//! `destroy_all`/`shutdown`). `stop` marks a session terminal and leaves the
//! reclaiming to the next sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use clip_core::{ClipError, ClipResult, Pan, SessionId, Volume};

use crate::asset::AssetSource;
use crate::config::RegistryConfig;
use crate::device::{DeviceCallback, DeviceEvent, DeviceSpec};
use crate::engine::{EngineFactory, EngineSlot};
use crate::proxy::HandleSlot;
use crate::reaper::{Reaper, ReaperSignal};
use crate::session::{Session, SessionInfo};

// ═══════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of one reaper sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub reaped: usize,
    pub remaining: usize,
}

/// State shared with the reaper thread and device callbacks
pub(crate) struct RegistryInner {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    engine: EngineSlot,
    assets: RwLock<Option<Arc<dyn AssetSource>>>,
    next_id: AtomicU64,
    reaped_total: AtomicU64,
    shut_down: AtomicBool,
    pub(crate) signal: ReaperSignal,
    pub(crate) config: RegistryConfig,
}

impl RegistryInner {
    fn lookup(&self, id: SessionId) -> ClipResult<Arc<Session>> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ClipError::NotFound(id))
    }

    /// Callback handed to the device: carries only the session id and a weak
    /// path back to the registry.
    fn device_callback(self: &Arc<Self>, id: SessionId) -> DeviceCallback {
        let registry = Arc::downgrade(self);
        Arc::new(move |event| {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            match event {
                DeviceEvent::PrefetchFillChanged => inner.on_prefetch_changed(id),
                DeviceEvent::HeadAtEnd => inner.on_head_at_end(id),
            }
        })
    }

    pub(crate) fn on_prefetch_changed(&self, id: SessionId) {
        let Ok(session) = self.lookup(id) else {
            return;
        };
        match session.refresh_prefetch() {
            Ok(true) => log::trace!("[SessionRegistry] {} prefetch sufficient", id),
            Ok(false) => {}
            Err(e) => log::warn!("[SessionRegistry] {} prefetch query failed: {}", id, e),
        }
    }

    pub(crate) fn on_head_at_end(&self, id: SessionId) {
        if let Ok(session) = self.lookup(id) {
            if session.mark_head_at_end() {
                log::debug!("[SessionRegistry] {} reached end", id);
            }
        }
    }

    /// Remove every reapable session, then stop and drop them off the lock.
    pub(crate) fn sweep(&self) -> SweepOutcome {
        let mut victims = Vec::new();
        let remaining = {
            let mut sessions = self.sessions.lock();
            sessions.retain(|_, session| {
                if session.is_reapable() {
                    victims.push(Arc::clone(session));
                    false
                } else {
                    true
                }
            });
            sessions.len()
        };

        for session in &victims {
            session.halt();
            log::debug!("[Reaper] released {} ({})", session.id(), session.path());
        }
        self.reaped_total
            .fetch_add(victims.len() as u64, Ordering::Relaxed);

        SweepOutcome {
            reaped: victims.len(),
            remaining,
        }
    }

    fn destroy_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.halt();
        }
        drained.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Registry of live playback sessions
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    reaper: Mutex<Option<Reaper>>,
}

impl SessionRegistry {
    /// Build a registry. The engine is not created until the first session.
    pub fn new(config: RegistryConfig, factory: Arc<dyn EngineFactory>) -> ClipResult<Self> {
        config.validate()?;
        let autostart = config.autostart_reaper;

        let registry = Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                engine: EngineSlot::new(factory),
                assets: RwLock::new(None),
                next_id: AtomicU64::new(SessionId::FIRST.get()),
                reaped_total: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                signal: ReaperSignal::new(),
                config,
            }),
            reaper: Mutex::new(None),
        };

        if autostart {
            registry.start_reaper()?;
        }
        Ok(registry)
    }

    /// Start the background reaper if it is not running yet
    pub fn start_reaper(&self) -> ClipResult<()> {
        if self.is_shut_down() {
            return Err(ClipError::ShutDown);
        }
        let mut reaper = self.reaper.lock();
        if reaper.is_none() {
            *reaper = Some(Reaper::spawn(Arc::clone(&self.inner))?);
        }
        Ok(())
    }

    pub fn reaper_running(&self) -> bool {
        self.reaper.lock().is_some()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Bind the asset provider; a previous provider is released.
    pub fn bind_asset_source(&self, source: Arc<dyn AssetSource>) {
        let previous = self.inner.assets.write().replace(source);
        if previous.is_some() {
            log::debug!("[SessionRegistry] asset source replaced");
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Creation
    // ───────────────────────────────────────────────────────────────────────

    /// Create a session for `path`. Volume is clamped into 0..=1.
    pub fn create_session(&self, path: &str, volume: f32, looping: bool) -> ClipResult<SessionId> {
        self.build_session(path, volume, looping, None)
    }

    /// Like [`create_session`](Self::create_session), also publishing the
    /// handle into `slot` and clearing it again when the session stops.
    pub fn create_bound_session(
        &self,
        path: &str,
        volume: f32,
        looping: bool,
        slot: &Arc<HandleSlot>,
    ) -> ClipResult<SessionId> {
        self.build_session(path, volume, looping, Some(slot))
    }

    fn build_session(
        &self,
        path: &str,
        volume: f32,
        looping: bool,
        slot: Option<&Arc<HandleSlot>>,
    ) -> ClipResult<SessionId> {
        if self.is_shut_down() {
            return Err(ClipError::ShutDown);
        }

        let engine = self.inner.engine.get_or_init()?;
        let assets = self
            .inner
            .assets
            .read()
            .clone()
            .ok_or(ClipError::AssetUnbound)?;
        let stream = assets.open(path)?;

        // Ids burnt by failed setups are never exposed
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let volume = Volume::new(volume);
        let device = engine
            .create_device(DeviceSpec {
                id,
                stream: &stream,
                looping,
                volume: volume.to_millibels(),
                callback: self.inner.device_callback(id),
            })
            .inspect_err(|e| log::warn!("[SessionRegistry] {} setup for {} failed: {}", id, path, e))?;

        let session = Arc::new(Session::new(
            id,
            looping,
            volume,
            device,
            stream,
            slot.map(Arc::downgrade),
        ));

        {
            let mut sessions = self.inner.sessions.lock();
            if self.is_shut_down() {
                drop(sessions);
                session.halt();
                return Err(ClipError::ShutDown);
            }
            // The slot holds the handle before any stop can reach the session
            if let Some(slot) = slot {
                slot.publish(id);
            }
            sessions.insert(id, session);
        }

        // A fill event raised before the insert found nothing to update
        self.inner.on_prefetch_changed(id);
        self.inner.signal.notify_created();

        log::debug!("[SessionRegistry] created {} for {} (loop={})", id, path, looping);
        Ok(id)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Per-session controls
    // ───────────────────────────────────────────────────────────────────────

    pub fn play(&self, id: SessionId) -> ClipResult<()> {
        self.inner.lookup(id)?.play()
    }

    pub fn pause(&self, id: SessionId) -> ClipResult<()> {
        self.inner.lookup(id)?.pause()
    }

    pub fn resume(&self, id: SessionId) -> ClipResult<()> {
        self.inner.lookup(id)?.resume()
    }

    /// Stop and mark terminal. The session stays registered until reaped.
    pub fn stop(&self, id: SessionId) -> ClipResult<()> {
        self.inner.lookup(id)?.stop()
    }

    pub fn set_volume(&self, id: SessionId, volume: f32) -> ClipResult<()> {
        self.inner.lookup(id)?.set_volume(Volume::new(volume))
    }

    pub fn set_params(&self, id: SessionId, pitch: f32, pan: f32, volume: f32) -> ClipResult<()> {
        self.inner
            .lookup(id)?
            .set_params(pitch, Pan::new(pan), Volume::new(volume))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Aggregate controls
    // ───────────────────────────────────────────────────────────────────────

    pub fn play_all(&self) -> bool {
        self.for_each_active("play", Session::play)
    }

    pub fn pause_all(&self) -> bool {
        self.for_each_active("pause", Session::pause)
    }

    pub fn resume_all(&self) -> bool {
        self.for_each_active("resume", Session::resume)
    }

    pub fn stop_all(&self) -> bool {
        self.for_each_active("stop", Session::stop)
    }

    /// AND over every non-terminal session in a snapshot of the map. Sessions
    /// that turn terminal mid-iteration are skipped, not counted as failures.
    fn for_each_active(&self, what: &str, op: impl Fn(&Session) -> ClipResult<()>) -> bool {
        let snapshot: Vec<Arc<Session>> = self.inner.sessions.lock().values().cloned().collect();

        let mut ok = true;
        for session in snapshot
            .iter()
            .map(Arc::as_ref)
            .filter(|s| !s.is_head_at_end())
        {
            match op(session) {
                Ok(()) | Err(ClipError::Stopped(_)) => {}
                Err(e) => {
                    log::warn!("[SessionRegistry] {} {} failed: {}", what, session.id(), e);
                    ok = false;
                }
            }
        }
        ok
    }

    // ───────────────────────────────────────────────────────────────────────
    // Device signal re-entry
    // ───────────────────────────────────────────────────────────────────────

    /// Fill level changed: latch `prefetch_sufficient` if the device says so.
    /// Unknown handles are ignored.
    pub fn on_prefetch_changed(&self, id: SessionId) {
        self.inner.on_prefetch_changed(id);
    }

    /// Play head reached the end. Unknown handles are ignored.
    pub fn on_head_at_end(&self, id: SessionId) {
        self.inner.on_head_at_end(id);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Reclaiming
    // ───────────────────────────────────────────────────────────────────────

    /// Run one reaper sweep on the calling thread
    pub fn reap_now(&self) -> SweepOutcome {
        self.inner.sweep()
    }

    /// Stop and drop every session. The engine stays initialized.
    pub fn destroy_all(&self) -> usize {
        let count = self.inner.destroy_all();
        if count > 0 {
            log::info!("[SessionRegistry] destroyed {} sessions", count);
        }
        count
    }

    /// Stop the reaper, destroy every session, release the engine.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(reaper) = self.reaper.lock().take() {
            reaper.shutdown();
        }
        let destroyed = self.inner.destroy_all();
        let engine = self.inner.engine.close();
        drop(engine);

        log::info!(
            "[SessionRegistry] shut down ({} sessions destroyed, {} reaped over lifetime)",
            destroyed,
            self.reaped_total()
        );
    }

    // ───────────────────────────────────────────────────────────────────────
    // Introspection
    // ───────────────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.sessions.lock().contains_key(&id)
    }

    pub fn session_info(&self, id: SessionId) -> Option<SessionInfo> {
        self.inner.lookup(id).ok().map(|s| s.info())
    }

    pub fn handles(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.sessions.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn engine_initialized(&self) -> bool {
        self.inner.engine.is_initialized()
    }

    pub fn reaped_total(&self) -> u64 {
        self.inner.reaped_total.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::DirAssetSource;
    use crate::session::SessionState;
    use crate::sim::{SimConfig, SimEngineFactory};
    use clip_core::{Millibels, PrefetchStatus};

    struct Fixture {
        _dir: tempfile::TempDir,
        factory: Arc<SimEngineFactory>,
        registry: SessionRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.ogg", "b.ogg"] {
            std::fs::write(dir.path().join(name), b"clip").unwrap();
        }
        let factory = Arc::new(SimEngineFactory::new(SimConfig::manual()));
        let registry = SessionRegistry::new(RegistryConfig::manual(), factory.clone()).unwrap();
        registry.bind_asset_source(Arc::new(DirAssetSource::new(dir.path()).unwrap()));
        Fixture {
            _dir: dir,
            factory,
            registry,
        }
    }

    #[test]
    fn test_handles_are_monotonic() {
        let fx = fixture();
        let a = fx.registry.create_session("a.ogg", 1.0, false).unwrap();
        let b = fx.registry.create_session("b.ogg", 1.0, false).unwrap();
        assert_eq!(a, SessionId::FIRST);
        assert!(b > a);
        assert_eq!(fx.registry.handles(), vec![a, b]);
    }

    #[test]
    fn test_create_without_assets_fails() {
        let factory = Arc::new(SimEngineFactory::new(SimConfig::manual()));
        let registry = SessionRegistry::new(RegistryConfig::manual(), factory).unwrap();
        assert!(matches!(
            registry.create_session("a.ogg", 1.0, false),
            Err(ClipError::AssetUnbound)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_initial_volume_reaches_device() {
        let fx = fixture();
        let id = fx.registry.create_session("a.ogg", 0.1, false).unwrap();
        let channel = fx.factory.backend().channel(id).unwrap();
        assert_eq!(channel.volume(), Millibels(-2000));
    }

    #[test]
    fn test_early_fill_is_picked_up_on_insert() {
        let fx = fixture();
        fx.factory
            .backend()
            .set_initial_prefetch(PrefetchStatus::SufficientData);
        let id = fx.registry.create_session("a.ogg", 1.0, false).unwrap();
        assert_eq!(
            fx.registry.session_info(id).unwrap().state,
            SessionState::Ready
        );
    }

    #[test]
    fn test_stop_does_not_remove() {
        let fx = fixture();
        let id = fx.registry.create_session("a.ogg", 1.0, false).unwrap();
        fx.registry.stop(id).unwrap();
        assert!(fx.registry.contains(id));
        // never prefetched, so not yet eligible
        assert_eq!(fx.registry.reap_now().reaped, 0);
    }

    #[test]
    fn test_aggregates_skip_stopped_sessions() {
        let fx = fixture();
        let a = fx.registry.create_session("a.ogg", 1.0, false).unwrap();
        let b = fx.registry.create_session("b.ogg", 1.0, false).unwrap();
        fx.registry.stop(a).unwrap();

        assert!(fx.registry.play_all());
        assert!(fx.registry.pause_all());
        assert!(fx.registry.resume_all());
        assert!(fx.registry.stop_all());
        assert_eq!(
            fx.registry.session_info(b).unwrap().state,
            SessionState::Stopped
        );
    }

    #[test]
    fn test_aggregate_reports_device_failure() {
        let fx = fixture();
        let a = fx.registry.create_session("a.ogg", 1.0, false).unwrap();
        let _b = fx.registry.create_session("b.ogg", 1.0, false).unwrap();
        fx.factory.backend().channel(a).unwrap().fail_controls(true);
        assert!(!fx.registry.pause_all());
    }

    #[test]
    fn test_aggregates_on_empty_registry() {
        let fx = fixture();
        assert!(fx.registry.play_all());
        assert!(fx.registry.stop_all());
    }

    #[test]
    fn test_destroy_all_keeps_engine() {
        let fx = fixture();
        fx.registry.create_session("a.ogg", 1.0, true).unwrap();
        fx.registry.create_session("b.ogg", 1.0, false).unwrap();
        assert_eq!(fx.registry.destroy_all(), 2);
        assert!(fx.registry.is_empty());
        assert!(fx.registry.engine_initialized());
        assert_eq!(fx.factory.backend().live_devices(), 0);
    }

    #[test]
    fn test_shutdown_is_final() {
        let fx = fixture();
        fx.registry.create_session("a.ogg", 1.0, false).unwrap();
        fx.registry.shutdown();
        fx.registry.shutdown();
        assert!(fx.registry.is_empty());
        assert!(!fx.registry.engine_initialized());
        assert_eq!(fx.factory.backend().live_devices(), 0);
        assert!(matches!(
            fx.registry.create_session("a.ogg", 1.0, false),
            Err(ClipError::ShutDown)
        ));
        assert!(fx.registry.start_reaper().is_err());
    }

    #[test]
    fn test_rebinding_releases_previous_source() {
        let fx = fixture();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("c.ogg"), b"clip").unwrap();
        let first = Arc::new(DirAssetSource::new(other.path()).unwrap());
        fx.registry.bind_asset_source(first.clone());
        assert_eq!(Arc::strong_count(&first), 2);

        fx.registry
            .bind_asset_source(Arc::new(DirAssetSource::new(other.path()).unwrap()));
        assert_eq!(Arc::strong_count(&first), 1);
        assert!(fx.registry.create_session("c.ogg", 1.0, false).is_ok());
    }
}
