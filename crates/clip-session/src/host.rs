//! Host lifecycle: the composition root that owns the registry
//!
//! `on_load` builds the registry the first time the host library is loaded,
//! `on_unload` tears it down deterministically. The asset source may be bound
//! before or after load; it is applied to whichever registry is live.

use std::sync::Arc;

use parking_lot::RwLock;

use clip_core::{ClipError, ClipResult};

use crate::asset::AssetSource;
use crate::config::RegistryConfig;
use crate::engine::EngineFactory;
use crate::registry::SessionRegistry;

pub struct Host {
    factory: Arc<dyn EngineFactory>,
    assets: RwLock<Option<Arc<dyn AssetSource>>>,
    registry: RwLock<Option<Arc<SessionRegistry>>>,
}

impl Host {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            assets: RwLock::new(None),
            registry: RwLock::new(None),
        }
    }

    /// Build the registry. A second call returns the live one.
    pub fn on_load(&self, config: RegistryConfig) -> ClipResult<Arc<SessionRegistry>> {
        let mut slot = self.registry.write();
        if let Some(registry) = slot.as_ref() {
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new(SessionRegistry::new(config, Arc::clone(&self.factory))?);
        if let Some(source) = self.assets.read().clone() {
            registry.bind_asset_source(source);
        }
        *slot = Some(Arc::clone(&registry));
        log::info!("[Host] loaded");
        Ok(registry)
    }

    /// Shut the registry down. Proxies still holding it see `ShutDown`.
    pub fn on_unload(&self) {
        let registry = self.registry.write().take();
        if let Some(registry) = registry {
            registry.shutdown();
            log::info!("[Host] unloaded");
        }
    }

    pub fn registry(&self) -> ClipResult<Arc<SessionRegistry>> {
        self.registry.read().clone().ok_or(ClipError::ShutDown)
    }

    pub fn is_loaded(&self) -> bool {
        self.registry.read().is_some()
    }

    /// Remember the provider and hand it to the live registry, if any.
    pub fn bind_asset_source(&self, source: Arc<dyn AssetSource>) {
        *self.assets.write() = Some(Arc::clone(&source));
        if let Some(registry) = self.registry.read().as_ref() {
            registry.bind_asset_source(source);
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.on_unload();
    }
}
