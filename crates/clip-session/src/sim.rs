//! Simulated engine
//!
//! A software stand-in for the platform audio engine. It models what the
//! registry can observe of real hardware: staged engine bring-up, per-device
//! setup steps, play-state controls, buffer fill and end-of-clip signals.
//!
//! - [`SimEngineFactory`] builds engines in stages and rolls back on failure
//! - [`SimBackend`] is shared state: live-resource counters, fault injection,
//!   and a [`SimChannel`] probe per device
//! - an optional driver thread advances playing clips on its own thread and
//!   raises the signals from there, like a real audio callback would

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use clip_core::{
    ClipError, ClipResult, Millibels, Permille, PrefetchStatus, SessionId, SetupStep,
};

use crate::asset::ClipLocator;
use crate::device::{DeviceCallback, DeviceEvent, DeviceSpec, PlaybackDevice};
use crate::engine::{Engine, EngineFactory};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Simulated engine timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Driver tick period
    pub tick_ms: u64,
    /// Length of every simulated clip
    pub clip_length_ms: u64,
    /// Time after creation until the buffer reports sufficient data
    pub prefetch_delay_ms: u64,
    /// Run the driver thread. Without it, signals only come from probes.
    pub driver: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            clip_length_ms: 500,
            prefetch_delay_ms: 20,
            driver: true,
        }
    }
}

impl SimConfig {
    /// No driver thread: tests raise every signal by hand
    pub fn manual() -> Self {
        Self {
            driver: false,
            ..Self::default()
        }
    }

    fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Engine bring-up stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    CreateEngine,
    RealizeEngine,
    CreateOutputMix,
    RealizeOutputMix,
    StartDriver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPlayState {
    Stopped,
    Paused,
    Playing,
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND (shared by factory, engines, devices and the driver)
// ═══════════════════════════════════════════════════════════════════════════

pub struct SimBackend {
    config: SimConfig,
    channels: Mutex<HashMap<SessionId, Arc<SimChannel>>>,
    live_objects: AtomicUsize,
    live_devices: AtomicUsize,
    devices_created: AtomicUsize,
    setup_fault: Mutex<Option<SetupStep>>,
    initial_prefetch: Mutex<PrefetchStatus>,
}

impl SimBackend {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
            live_objects: AtomicUsize::new(0),
            live_devices: AtomicUsize::new(0),
            devices_created: AtomicUsize::new(0),
            setup_fault: Mutex::new(None),
            initial_prefetch: Mutex::new(PrefetchStatus::Unknown),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Probe for the device bound to `id`, while that device exists
    pub fn channel(&self, id: SessionId) -> Option<Arc<SimChannel>> {
        self.channels.lock().get(&id).cloned()
    }

    pub fn channels(&self) -> Vec<Arc<SimChannel>> {
        self.channels.lock().values().cloned().collect()
    }

    pub fn live_devices(&self) -> usize {
        self.live_devices.load(Ordering::SeqCst)
    }

    pub fn devices_created(&self) -> usize {
        self.devices_created.load(Ordering::SeqCst)
    }

    /// Engine-level objects (engine, output mix) currently alive
    pub fn live_engine_objects(&self) -> usize {
        self.live_objects.load(Ordering::SeqCst)
    }

    /// Make the next device setup fail at `step`
    pub fn fail_next_device(&self, step: SetupStep) {
        *self.setup_fault.lock() = Some(step);
    }

    /// Fill status new devices start with
    pub fn set_initial_prefetch(&self, status: PrefetchStatus) {
        *self.initial_prefetch.lock() = status;
    }

    fn check_setup(&self, step: SetupStep) -> ClipResult<()> {
        let mut fault = self.setup_fault.lock();
        if *fault == Some(step) {
            *fault = None;
            return Err(ClipError::DeviceSetup {
                step,
                reason: "injected fault".into(),
            });
        }
        Ok(())
    }

    fn advance(&self, dt: Duration) {
        for channel in self.channels() {
            channel.tick(dt, &self.config);
        }
    }
}

/// Engine-level object; counted while alive
struct SimObject {
    backend: Arc<SimBackend>,
    kind: &'static str,
}

impl SimObject {
    fn create(backend: &Arc<SimBackend>, kind: &'static str) -> Self {
        backend.live_objects.fetch_add(1, Ordering::SeqCst);
        Self {
            backend: Arc::clone(backend),
            kind,
        }
    }
}

impl Drop for SimObject {
    fn drop(&mut self) {
        self.backend.live_objects.fetch_sub(1, Ordering::SeqCst);
        log::trace!("[SimEngine] destroyed {}", self.kind);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHANNEL (per-device state + probe)
// ═══════════════════════════════════════════════════════════════════════════

struct ChannelState {
    play: SimPlayState,
    volume: Millibels,
    pan: Option<Permille>,
    prefetch: PrefetchStatus,
    position: Duration,
    age: Duration,
    fail_controls: bool,
}

/// State of one simulated output, shared between its device and test probes
pub struct SimChannel {
    id: SessionId,
    looping: bool,
    length: Duration,
    callback: DeviceCallback,
    released: AtomicBool,
    state: Mutex<ChannelState>,
}

impl SimChannel {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn play_state(&self) -> SimPlayState {
        self.state.lock().play
    }

    pub fn volume(&self) -> Millibels {
        self.state.lock().volume
    }

    pub fn pan(&self) -> Option<Permille> {
        self.state.lock().pan
    }

    pub fn position(&self) -> Duration {
        self.state.lock().position
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Set the fill status and raise the fill-changed signal
    pub fn fill(&self, status: PrefetchStatus) {
        self.state.lock().prefetch = status;
        self.emit(DeviceEvent::PrefetchFillChanged);
    }

    /// Jump to the end of the clip. Looping clips wrap silently.
    pub fn reach_end(&self) {
        {
            let mut state = self.state.lock();
            if self.looping {
                state.position = Duration::ZERO;
                return;
            }
            state.position = self.length;
            state.play = SimPlayState::Stopped;
        }
        self.emit(DeviceEvent::HeadAtEnd);
    }

    /// Make every control call (and prefetch queries) fail
    pub fn fail_controls(&self, fail: bool) {
        self.state.lock().fail_controls = fail;
    }

    fn emit(&self, event: DeviceEvent) {
        if !self.is_released() {
            (self.callback)(event);
        }
    }

    fn control(&self, apply: impl FnOnce(&mut ChannelState)) -> ClipResult<()> {
        let mut state = self.state.lock();
        if self.is_released() {
            return Err(ClipError::Device(format!("{} released", self.id)));
        }
        if state.fail_controls {
            return Err(ClipError::Device(format!("{} control rejected", self.id)));
        }
        apply(&mut state);
        Ok(())
    }

    fn tick(&self, dt: Duration, config: &SimConfig) {
        let mut events = Vec::with_capacity(2);
        {
            let mut state = self.state.lock();
            if self.is_released() {
                return;
            }
            state.age += dt;

            if !state.prefetch.is_sufficient()
                && state.age >= Duration::from_millis(config.prefetch_delay_ms)
            {
                state.prefetch = PrefetchStatus::SufficientData;
                events.push(DeviceEvent::PrefetchFillChanged);
            }

            if state.play == SimPlayState::Playing && state.prefetch.is_sufficient() {
                state.position += dt;
                if state.position >= self.length {
                    if self.looping {
                        state.position = Duration::ZERO;
                    } else {
                        state.position = self.length;
                        state.play = SimPlayState::Stopped;
                        events.push(DeviceEvent::HeadAtEnd);
                    }
                }
            }
        }
        // signals go out with no channel lock held
        for event in events {
            self.emit(event);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE
// ═══════════════════════════════════════════════════════════════════════════

pub struct SimDevice {
    channel: Arc<SimChannel>,
    backend: Arc<SimBackend>,
}

impl SimDevice {
    fn new(channel: Arc<SimChannel>, backend: Arc<SimBackend>) -> Self {
        backend.live_devices.fetch_add(1, Ordering::SeqCst);
        backend.devices_created.fetch_add(1, Ordering::SeqCst);
        Self { channel, backend }
    }
}

impl PlaybackDevice for SimDevice {
    fn play(&self) -> ClipResult<()> {
        self.channel.control(|s| s.play = SimPlayState::Playing)
    }

    fn pause(&self) -> ClipResult<()> {
        self.channel.control(|s| s.play = SimPlayState::Paused)
    }

    fn stop(&self) -> ClipResult<()> {
        self.channel.control(|s| {
            s.play = SimPlayState::Stopped;
            s.position = Duration::ZERO;
        })
    }

    fn set_volume_level(&self, level: Millibels) -> ClipResult<()> {
        self.channel.control(|s| s.volume = level)
    }

    fn set_stereo_position(&self, position: Permille) -> ClipResult<()> {
        self.channel.control(|s| s.pan = Some(position))
    }

    fn prefetch_status(&self) -> ClipResult<PrefetchStatus> {
        let state = self.channel.state.lock();
        if state.fail_controls {
            return Err(ClipError::Device(format!("{} query rejected", self.channel.id)));
        }
        Ok(state.prefetch)
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.channel.released.store(true, Ordering::Release);
        let mut channels = self.backend.channels.lock();
        if channels
            .get(&self.channel.id)
            .is_some_and(|c| Arc::ptr_eq(c, &self.channel))
        {
            channels.remove(&self.channel.id);
        }
        drop(channels);
        self.backend.live_devices.fetch_sub(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Driver thread; stopped and joined on drop
struct Driver {
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Driver {
    fn start(backend: Arc<SimBackend>) -> ClipResult<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let tick = backend.config.tick();

        let handle = thread::Builder::new()
            .name("clip-sim-driver".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(tick);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => backend.advance(tick),
                    }
                }
                log::debug!("[SimEngine] driver stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        // disconnecting the channel ends the loop
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[SimEngine] driver thread panicked");
            }
        }
    }
}

/// Simulated engine. Fields drop in order: driver, output mix, engine object.
pub struct SimEngine {
    driver: Option<Driver>,
    _output_mix: SimObject,
    _engine_object: SimObject,
    backend: Arc<SimBackend>,
}

impl SimEngine {
    pub fn backend(&self) -> &Arc<SimBackend> {
        &self.backend
    }

    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }
}

impl Engine for SimEngine {
    fn create_device(&self, spec: DeviceSpec<'_>) -> ClipResult<Box<dyn PlaybackDevice>> {
        let backend = &self.backend;

        backend.check_setup(SetupStep::CreatePlayer)?;
        if let ClipLocator::Uri(path) = spec.stream.locator() {
            if !path.is_file() {
                return Err(ClipError::DeviceSetup {
                    step: SetupStep::CreatePlayer,
                    reason: format!("{} not found", path.display()),
                });
            }
        }

        let channel = Arc::new(SimChannel {
            id: spec.id,
            looping: spec.looping,
            length: Duration::from_millis(backend.config.clip_length_ms),
            callback: spec.callback,
            released: AtomicBool::new(false),
            state: Mutex::new(ChannelState {
                play: SimPlayState::Stopped,
                volume: spec.volume,
                pan: None,
                prefetch: *backend.initial_prefetch.lock(),
                position: Duration::ZERO,
                age: Duration::ZERO,
                fail_controls: false,
            }),
        });
        // From here on an early return drops the device and undoes everything
        let device = SimDevice::new(Arc::clone(&channel), Arc::clone(backend));

        backend.check_setup(SetupStep::Realize)?;
        backend.check_setup(SetupStep::PrefetchInterface)?;
        backend.check_setup(SetupStep::RegisterCallbacks)?;
        backend.channels.lock().insert(spec.id, channel);
        backend.check_setup(SetupStep::PlayInterface)?;
        backend.check_setup(SetupStep::VolumeInterface)?;
        if spec.looping {
            backend.check_setup(SetupStep::SetLoop)?;
        }
        backend.check_setup(SetupStep::InitialVolume)?;

        log::trace!("[SimEngine] device ready for {}", spec.id);
        Ok(Box::new(device))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FACTORY
// ═══════════════════════════════════════════════════════════════════════════

pub struct SimEngineFactory {
    backend: Arc<SimBackend>,
    init_fault: Mutex<Option<InitStage>>,
    attempts: AtomicUsize,
}

impl SimEngineFactory {
    pub fn new(config: SimConfig) -> Self {
        Self {
            backend: Arc::new(SimBackend::new(config)),
            init_fault: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<SimBackend> {
        &self.backend
    }

    /// Make the next engine bring-up fail at `stage`
    pub fn fail_next_init(&self, stage: InitStage) {
        *self.init_fault.lock() = Some(stage);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn build(&self) -> ClipResult<SimEngine> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fault = self.init_fault.lock().take();
        let reach = |stage: InitStage| -> ClipResult<()> {
            if fault == Some(stage) {
                Err(ClipError::EngineInit(format!("{:?} failed", stage)))
            } else {
                Ok(())
            }
        };
        let backend = &self.backend;

        // Each created object is dropped again if a later stage bails out
        reach(InitStage::CreateEngine)?;
        let engine_object = SimObject::create(backend, "engine");
        reach(InitStage::RealizeEngine)?;
        reach(InitStage::CreateOutputMix)?;
        let output_mix = SimObject::create(backend, "output mix");
        reach(InitStage::RealizeOutputMix)?;
        reach(InitStage::StartDriver)?;
        let driver = if backend.config.driver {
            Some(Driver::start(Arc::clone(backend))?)
        } else {
            None
        };

        Ok(SimEngine {
            driver,
            _output_mix: output_mix,
            _engine_object: engine_object,
            backend: Arc::clone(backend),
        })
    }
}

impl EngineFactory for SimEngineFactory {
    fn create(&self) -> ClipResult<Arc<dyn Engine>> {
        Ok(Arc::new(self.build()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::ClipStream;
    use std::path::PathBuf;

    fn noop_callback() -> DeviceCallback {
        Arc::new(|_| {})
    }

    fn uri_stream(dir: &tempfile::TempDir) -> ClipStream {
        let path = dir.path().join("a.ogg");
        std::fs::write(&path, b"clip").unwrap();
        ClipStream::from_uri("a.ogg", path)
    }

    fn spec<'a>(id: u64, stream: &'a ClipStream, looping: bool, callback: DeviceCallback) -> DeviceSpec<'a> {
        DeviceSpec {
            id: SessionId(id),
            stream,
            looping,
            volume: Millibels::MAX,
            callback,
        }
    }

    #[test]
    fn test_every_init_stage_rolls_back() {
        let factory = SimEngineFactory::new(SimConfig::manual());
        for stage in [
            InitStage::CreateEngine,
            InitStage::RealizeEngine,
            InitStage::CreateOutputMix,
            InitStage::RealizeOutputMix,
            InitStage::StartDriver,
        ] {
            factory.fail_next_init(stage);
            assert!(matches!(factory.build(), Err(ClipError::EngineInit(_))));
            assert_eq!(factory.backend().live_engine_objects(), 0, "{:?}", stage);
        }

        let engine = factory.build().unwrap();
        assert_eq!(factory.backend().live_engine_objects(), 2);
        assert!(!engine.has_driver());
        drop(engine);
        assert_eq!(factory.backend().live_engine_objects(), 0);
        assert_eq!(factory.attempts(), 6);
    }

    #[test]
    fn test_every_setup_step_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let stream = uri_stream(&dir);
        let engine = SimEngineFactory::new(SimConfig::manual()).build().unwrap();
        let backend = Arc::clone(engine.backend());

        for step in [
            SetupStep::CreatePlayer,
            SetupStep::Realize,
            SetupStep::PrefetchInterface,
            SetupStep::RegisterCallbacks,
            SetupStep::PlayInterface,
            SetupStep::VolumeInterface,
            SetupStep::SetLoop,
            SetupStep::InitialVolume,
        ] {
            backend.fail_next_device(step);
            let result = engine.create_device(spec(1, &stream, true, noop_callback()));
            assert!(
                matches!(result, Err(ClipError::DeviceSetup { step: s, .. }) if s == step),
                "{:?}",
                step
            );
            assert_eq!(backend.live_devices(), 0);
            assert!(backend.channel(SessionId(1)).is_none());
        }
    }

    #[test]
    fn test_missing_uri_fails_setup() {
        let engine = SimEngineFactory::new(SimConfig::manual()).build().unwrap();
        let stream = ClipStream::from_uri("/nope.ogg", PathBuf::from("/nope/nope.ogg"));
        let result = engine.create_device(spec(1, &stream, false, noop_callback()));
        assert!(matches!(
            result,
            Err(ClipError::DeviceSetup { step: SetupStep::CreatePlayer, .. })
        ));
    }

    #[test]
    fn test_controls_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let stream = uri_stream(&dir);
        let engine = SimEngineFactory::new(SimConfig::manual()).build().unwrap();
        let device = engine
            .create_device(spec(4, &stream, false, noop_callback()))
            .unwrap();
        let channel = engine.backend().channel(SessionId(4)).unwrap();

        device.play().unwrap();
        assert_eq!(channel.play_state(), SimPlayState::Playing);
        device.pause().unwrap();
        assert_eq!(channel.play_state(), SimPlayState::Paused);
        device.resume().unwrap();
        assert_eq!(channel.play_state(), SimPlayState::Playing);
        device.set_stereo_position(Permille(-250)).unwrap();
        assert_eq!(channel.pan(), Some(Permille(-250)));

        channel.fail_controls(true);
        assert!(device.stop().is_err());
        assert!(device.prefetch_status().is_err());
        channel.fail_controls(false);

        drop(device);
        assert!(channel.is_released());
        assert_eq!(engine.backend().live_devices(), 0);
        assert!(engine.backend().channel(SessionId(4)).is_none());
    }

    #[test]
    fn test_signals_reach_callback() {
        let dir = tempfile::tempdir().unwrap();
        let stream = uri_stream(&dir);
        let engine = SimEngineFactory::new(SimConfig::manual()).build().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DeviceCallback = Arc::new(move |event| sink.lock().push(event));

        let _device = engine.create_device(spec(9, &stream, false, callback)).unwrap();
        let channel = engine.backend().channel(SessionId(9)).unwrap();
        channel.fill(PrefetchStatus::SufficientData);
        channel.reach_end();

        assert_eq!(
            *seen.lock(),
            vec![DeviceEvent::PrefetchFillChanged, DeviceEvent::HeadAtEnd]
        );
    }

    #[test]
    fn test_looping_clip_wraps_without_signal() {
        let dir = tempfile::tempdir().unwrap();
        let stream = uri_stream(&dir);
        let engine = SimEngineFactory::new(SimConfig::manual()).build().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let callback: DeviceCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let _device = engine.create_device(spec(2, &stream, true, callback)).unwrap();
        let channel = engine.backend().channel(SessionId(2)).unwrap();
        channel.reach_end();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(channel.position(), Duration::ZERO);
    }

    #[test]
    fn test_tick_fills_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let stream = uri_stream(&dir);
        let config = SimConfig {
            clip_length_ms: 30,
            prefetch_delay_ms: 10,
            ..SimConfig::manual()
        };
        let engine = SimEngineFactory::new(config).build().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DeviceCallback = Arc::new(move |event| sink.lock().push(event));

        let device = engine.create_device(spec(5, &stream, false, callback)).unwrap();
        device.play().unwrap();
        let backend = engine.backend();
        for _ in 0..5 {
            backend.advance(Duration::from_millis(10));
        }

        assert_eq!(
            *seen.lock(),
            vec![DeviceEvent::PrefetchFillChanged, DeviceEvent::HeadAtEnd]
        );
        assert_eq!(
            backend.channel(SessionId(5)).unwrap().play_state(),
            SimPlayState::Stopped
        );
    }
}
