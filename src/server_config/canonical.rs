//! Canonical configuration: the adopted Endpoints/Settings generations and
//! their persisted copies.
//!
//! Swaps are lock-free. Writes to storage go through one mutex and always
//! serialize the snapshot current at write time, so the last write carries
//! the newest state whatever order the writers arrive in.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::endpoints::directory::ModuleListener;
use crate::endpoints::model::{Endpoints, Module, Settings};
use crate::storage::{KeyValueStore, ENDPOINTS_KEY, SETTINGS_KEY};

pub struct CanonicalConfig {
    endpoints: ArcSwapOption<Endpoints>,
    settings: ArcSwapOption<Settings>,
    generation: AtomicU64,
    store: Arc<dyn KeyValueStore>,
    persisting: Mutex<()>,
}

impl CanonicalConfig {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            endpoints: ArcSwapOption::empty(),
            settings: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            store,
            persisting: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn endpoints(&self) -> Option<Arc<Endpoints>> {
        self.endpoints.load_full()
    }

    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.settings.load_full()
    }

    /// Both payloads are in memory.
    pub fn is_loaded(&self) -> bool {
        self.endpoints.load().is_some() && self.settings.load().is_some()
    }

    /// Current Endpoints generation number; bumps on every adoption.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace the Endpoints generation wholesale. In memory only; see
    /// [`CanonicalConfig::persist_endpoints`].
    pub fn adopt_endpoints(&self, endpoints: Endpoints) -> (Arc<Endpoints>, u64) {
        let endpoints = Arc::new(endpoints);
        self.endpoints.store(Some(endpoints.clone()));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (endpoints, generation)
    }

    pub fn adopt_settings(&self, settings: Settings, persist: bool) -> Arc<Settings> {
        let settings = Arc::new(settings);
        self.settings.store(Some(settings.clone()));
        if persist {
            self.persist_settings();
        }
        settings
    }

    /// Listener bound to generation `generation`; stale generations are
    /// ignored.
    pub fn listener(self: &Arc<Self>, generation: u64) -> Arc<dyn ModuleListener> {
        Arc::new(GenerationListener {
            config: Arc::clone(self),
            generation,
        })
    }

    fn lock_persisting(&self) -> MutexGuard<'_, ()> {
        self.persisting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the current Endpoints through to storage.
    pub fn persist_endpoints(&self) {
        let _persisting = self.lock_persisting();
        let Some(endpoints) = self.endpoints.load_full() else {
            return;
        };
        match endpoints.to_json() {
            Ok(json) => self.write(ENDPOINTS_KEY, &json),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize endpoints"),
        }
    }

    /// Write the current Settings through to storage.
    pub fn persist_settings(&self) {
        let _persisting = self.lock_persisting();
        let Some(settings) = self.settings.load_full() else {
            return;
        };
        match settings.to_json() {
            Ok(json) => self.write(SETTINGS_KEY, &json),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize settings"),
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!(key, error = %e, "Failed to persist configuration");
        }
    }
}

struct GenerationListener {
    config: Arc<CanonicalConfig>,
    generation: u64,
}

impl GenerationListener {
    fn is_current(&self) -> bool {
        self.config.generation() == self.generation
    }
}

impl ModuleListener for GenerationListener {
    fn canonical_module(&self, name: &str) -> Option<Module> {
        if !self.is_current() {
            return None;
        }
        self.config
            .endpoints
            .load()
            .as_ref()
            .and_then(|e| e.module(name).cloned())
    }

    fn module_changed(&self, module: &Module) {
        if !self.is_current() {
            tracing::debug!(module = %module.name, "Ignoring change from a replaced generation");
            return;
        }

        self.config.endpoints.rcu(|current| {
            current.as_ref().map(|endpoints| {
                let mut next = Endpoints::clone(endpoints);
                next.replace_module(module);
                Arc::new(next)
            })
        });
    }

    fn flush(&self) {
        if self.is_current() {
            self.config.persist_endpoints();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::directory::EndpointDirectory;
    use crate::storage::{MemoryStore, StorageError};
    use std::time::{Duration, Instant};

    /// Sleeps inside `set`, like a slow disk.
    struct SlowSetStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl KeyValueStore for SlowSetStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            std::thread::sleep(self.delay);
            self.inner.set(key, value)
        }
    }

    fn sample() -> Endpoints {
        Endpoints {
            app_urls: vec!["{0}://a.test/".into(), "{0}://b.test/".into()],
            modules: vec![Module {
                name: "videos".into(),
                uri: "videos".into(),
                version: "v1".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_module_change_is_mirrored_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(CanonicalConfig::new(store.clone()));
        let (_, generation) = config.adopt_endpoints(sample());
        assert!(store.get(ENDPOINTS_KEY).is_none());

        let listener = config.listener(generation);
        let changed = Module {
            in_use: 1,
            max_fails: 2,
            ..sample().modules[0].clone()
        };
        listener.module_changed(&changed);
        assert_eq!(config.endpoints().unwrap().module("videos"), Some(&changed));
        assert!(store.get(ENDPOINTS_KEY).is_none());

        listener.flush();
        let persisted = Endpoints::from_json(&store.get(ENDPOINTS_KEY).unwrap()).unwrap();
        assert_eq!(persisted.module("videos"), Some(&changed));
        assert_eq!(listener.canonical_module("videos"), Some(changed));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(CanonicalConfig::new(store.clone()));
        let (_, old) = config.adopt_endpoints(sample());
        let stale = config.listener(old);
        config.adopt_endpoints(sample());

        stale.module_changed(&Module {
            in_use: 1,
            ..sample().modules[0].clone()
        });
        stale.flush();
        assert_eq!(config.endpoints().unwrap().module("videos").unwrap().in_use, 0);
        assert_eq!(stale.canonical_module("videos"), None);
        assert!(store.get(ENDPOINTS_KEY).is_none());
    }

    #[test]
    fn test_slow_persistence_does_not_block_resolution() {
        let store = Arc::new(SlowSetStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(300),
        });
        let config = Arc::new(CanonicalConfig::new(store.clone()));
        let (endpoints, generation) = config.adopt_endpoints(sample());
        let dir = Arc::new(
            EndpointDirectory::from_endpoints(&endpoints, "https").with_listener(config.listener(generation)),
        );

        let rotating = {
            let dir = dir.clone();
            std::thread::spawn(move || dir.rotate_if_needed("videos", "a.test"))
        };
        std::thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        assert_eq!(dir.resolve("videos").as_deref(), Some("https://b.test/videos/v1"));
        assert!(start.elapsed() < Duration::from_millis(100), "resolve waited {:?}", start.elapsed());

        assert!(rotating.join().unwrap());
        let persisted = Endpoints::from_json(&store.get(ENDPOINTS_KEY).unwrap()).unwrap();
        assert_eq!(persisted.module("videos").unwrap().in_use, 1);
    }

    #[test]
    fn test_overlapping_flushes_persist_latest_state() {
        let store = Arc::new(SlowSetStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(100),
        });
        let config = Arc::new(CanonicalConfig::new(store.clone()));
        let (endpoints, generation) = config.adopt_endpoints(Endpoints {
            app_urls: vec!["{0}://a.test/".into(), "{0}://b.test/".into(), "{0}://c.test/".into()],
            ..sample()
        });
        let dir = Arc::new(
            EndpointDirectory::from_endpoints(&endpoints, "https").with_listener(config.listener(generation)),
        );

        let first = {
            let dir = dir.clone();
            std::thread::spawn(move || dir.rotate_if_needed("videos", "a.test"))
        };
        std::thread::sleep(Duration::from_millis(20));
        let second = {
            let dir = dir.clone();
            std::thread::spawn(move || dir.rotate_if_needed("videos", "b.test"))
        };
        assert!(first.join().unwrap());
        assert!(second.join().unwrap());

        assert_eq!(config.endpoints().unwrap().module("videos").unwrap().in_use, 2);
        let persisted = Endpoints::from_json(&store.get(ENDPOINTS_KEY).unwrap()).unwrap();
        assert_eq!(persisted.module("videos").unwrap().in_use, 2);
    }

    #[test]
    fn test_is_loaded_needs_both() {
        let config = CanonicalConfig::new(Arc::new(MemoryStore::new()));
        config.adopt_endpoints(sample());
        assert!(!config.is_loaded());
        config.adopt_settings(Settings::default(), true);
        assert!(config.is_loaded());
        assert!(config.store().get(SETTINGS_KEY).is_some());
    }
}
