//! Endpoint directory: module → host resolution and host failover.
//!
//! # Rotation policy
//! ```text
//! rotate_if_needed(module, previous_host):
//!     remaining == 0         → mirror canonical budget, notify, false
//!     active == previous     → in_use += 1 (mod hosts); wrap ⇒ remaining -= 1
//!                              notify, true
//!     active != previous     → true (someone else already rotated)
//! ```
//!
//! Notification is split in two: the in-memory mirror runs under the
//! module lock, persistence (`ModuleListener::flush`) runs after it is
//! released.
//!
//! # Design Decisions
//! - One directory per Endpoints generation; a new generation replaces it
//! - Hosts and image templates are immutable per generation; only module
//!   state sits behind the mutex
//! - Hosts are compared by authority (`host[:port]`), never by substring

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::endpoints::model::{Endpoints, Module};
use crate::endpoints::url::{authority, expand_scheme, join_url};
use crate::observability::metrics;

/// Failure budget seeded when a payload leaves `maxFails` unset.
pub const DEFAULT_MAX_FAILS: u32 = 2;

/// Receives module mutations so the canonical configuration stays in sync.
pub trait ModuleListener: Send + Sync {
    /// Freshest canonical copy of `name` in the current generation.
    fn canonical_module(&self, name: &str) -> Option<Module>;

    /// Called under the directory lock after a module's state changed.
    /// Must not block on I/O.
    fn module_changed(&self, module: &Module);

    /// Called once the directory lock is released; persists mirrored state.
    fn flush(&self) {}
}

/// In-memory view of one Endpoints generation.
pub struct EndpointDirectory {
    scheme: String,
    hosts: Vec<String>,
    images: HashMap<String, String>,
    modules: Mutex<HashMap<String, Module>>,
    listener: Option<Arc<dyn ModuleListener>>,
}

impl std::fmt::Debug for EndpointDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointDirectory")
            .field("scheme", &self.scheme)
            .field("hosts", &self.hosts)
            .field("modules", &self.lock_modules().len())
            .finish()
    }
}

impl EndpointDirectory {
    /// Build a directory from a freshly adopted generation.
    pub fn from_endpoints(endpoints: &Endpoints, scheme: &str) -> Self {
        let host_count = endpoints.app_urls.len() as u32;

        let modules = endpoints
            .modules
            .iter()
            .map(|m| {
                let mut module = m.clone();
                if module.in_use >= host_count {
                    module.in_use = 0;
                }
                if module.max_fails == 0 {
                    module.max_fails = DEFAULT_MAX_FAILS;
                }
                (module.name.clone(), module)
            })
            .collect();

        let images = endpoints
            .img_path
            .iter()
            .map(|f| (f.id.clone(), f.value.clone()))
            .collect();

        Self {
            scheme: scheme.to_string(),
            hosts: endpoints.app_urls.clone(),
            images,
            modules: Mutex::new(modules),
            listener: None,
        }
    }

    /// Attach the canonical-config listener.
    pub fn with_listener(mut self, listener: Arc<dyn ModuleListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn lock_modules(&self) -> MutexGuard<'_, HashMap<String, Module>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Snapshot of a module's current state.
    pub fn module(&self, name: &str) -> Option<Module> {
        self.lock_modules().get(name).cloned()
    }

    /// Base URL for a module: active host + uri + version.
    pub fn resolve(&self, name: &str) -> Option<String> {
        let modules = self.lock_modules();
        let module = modules.get(name)?;
        let host = self.hosts.get(module.in_use as usize)?;
        let host = expand_scheme(host, &self.scheme);
        Some(join_url(&[&host, &module.uri, &module.version]))
    }

    /// `uri/version` for a module, without host.
    pub fn module_path(&self, name: &str) -> Option<String> {
        let modules = self.lock_modules();
        let module = modules.get(name)?;
        Some(join_url(&[&module.uri, &module.version]))
    }

    /// Expanded image URL template for an image route id.
    pub fn image_url(&self, route_id: &str) -> Option<String> {
        self.images
            .get(route_id)
            .map(|template| expand_scheme(template, &self.scheme))
    }

    /// Identity of a host entry or URL: its authority, or the trimmed text.
    fn host_key(&self, host: &str) -> String {
        let expanded = expand_scheme(host, &self.scheme);
        authority(&expanded).unwrap_or_else(|| expanded.trim_end_matches('/').to_string())
    }

    /// Decide whether a failed attempt against `previous_host` should move
    /// `name` to its next host. Returns true if the caller may retry.
    ///
    /// An exhausted module (`max_fails == 0`) takes the canonical budget
    /// for the current generation. The canonical copy mirrors every change,
    /// so that budget is also 0 and the module stays on its host until a new
    /// generation replaces this directory. The call still re-publishes the
    /// module so the canonical and persisted copies match.
    pub fn rotate_if_needed(&self, name: &str, previous_host: &str) -> bool {
        let (retry, changed) = self.rotate_locked(name, previous_host);
        if changed {
            if let Some(listener) = &self.listener {
                listener.flush();
            }
        }
        retry
    }

    /// Decision and mutation under the module lock. Returns whether the
    /// caller may retry and whether the listener was notified.
    fn rotate_locked(&self, name: &str, previous_host: &str) -> (bool, bool) {
        let mut modules = self.lock_modules();
        let Some(module) = modules.get_mut(name) else {
            tracing::debug!(module = %name, "Rotation requested for unknown module");
            return (false, false);
        };

        if module.max_fails == 0 {
            if let Some(canonical) = self
                .listener
                .as_ref()
                .and_then(|l| l.canonical_module(name))
            {
                module.max_fails = canonical.max_fails;
            }
            tracing::warn!(
                module = %name,
                remaining_failures = module.max_fails,
                "Module exhausted its rotation budget"
            );
            return (false, self.notify(module));
        }

        let host_count = self.hosts.len() as u32;
        if host_count == 0 {
            return (false, false);
        }

        let active = &self.hosts[module.in_use as usize];
        if self.host_key(active) != self.host_key(previous_host) {
            tracing::debug!(
                module = %name,
                previous_host = %previous_host,
                "Host already rotated by a concurrent request"
            );
            return (true, false);
        }

        let from = module.in_use;
        module.in_use = (module.in_use + 1) % host_count;
        if module.in_use == 0 {
            module.max_fails = module.max_fails.saturating_sub(1);
        }

        tracing::info!(
            module = %name,
            from_index = from,
            to_index = module.in_use,
            remaining_failures = module.max_fails,
            "Rotated module to next host"
        );
        metrics::record_rotation(name);
        (true, self.notify(module))
    }

    fn notify(&self, module: &Module) -> bool {
        match &self.listener {
            Some(listener) => {
                listener.module_changed(module);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::model::FormatMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn endpoints(hosts: usize) -> Endpoints {
        Endpoints {
            app_urls: (0..hosts).map(|i| format!("{{0}}://h{i}.test/")).collect(),
            modules: vec![
                Module {
                    name: "videos".into(),
                    uri: "videos".into(),
                    version: "v1".into(),
                    ..Default::default()
                },
                Module {
                    name: "iam".into(),
                    uri: "/iam/".into(),
                    version: "v2".into(),
                    in_use: 7,
                    max_fails: 1,
                },
            ],
            img_path: vec![FormatMap {
                id: "player".into(),
                value: "{0}://img.test/player".into(),
            }],
            ..Default::default()
        }
    }

    fn host_of(dir: &EndpointDirectory, name: &str) -> String {
        let module = dir.module(name).unwrap();
        format!("h{}.test", module.in_use)
    }

    #[derive(Default)]
    struct Recorder {
        changes: AtomicUsize,
        flushes: AtomicUsize,
        flush_delay: Option<Duration>,
        canonical: Mutex<Option<Module>>,
    }

    impl ModuleListener for Recorder {
        fn canonical_module(&self, _name: &str) -> Option<Module> {
            self.canonical.lock().unwrap().clone()
        }

        fn module_changed(&self, module: &Module) {
            self.changes.fetch_add(1, Ordering::SeqCst);
            *self.canonical.lock().unwrap() = Some(module.clone());
        }

        fn flush(&self) {
            if let Some(delay) = self.flush_delay {
                std::thread::sleep(delay);
            }
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_seeding_normalizes_state() {
        let dir = EndpointDirectory::from_endpoints(&endpoints(3), "https");
        let videos = dir.module("videos").unwrap();
        assert_eq!(videos.max_fails, DEFAULT_MAX_FAILS);
        assert_eq!(videos.in_use, 0);

        let iam = dir.module("iam").unwrap();
        assert_eq!(iam.in_use, 0, "out-of-range index resets to 0");
        assert_eq!(iam.max_fails, 1);
    }

    #[test]
    fn test_resolve() {
        let dir = EndpointDirectory::from_endpoints(&endpoints(2), "https");
        assert_eq!(dir.resolve("videos").as_deref(), Some("https://h0.test/videos/v1"));
        assert_eq!(dir.resolve("iam").as_deref(), Some("https://h0.test/iam/v2"));
        assert_eq!(dir.resolve("missing"), None);
        assert_eq!(dir.module_path("iam").as_deref(), Some("iam/v2"));
        assert_eq!(dir.image_url("player").as_deref(), Some("https://img.test/player"));
        assert_eq!(dir.image_url("team"), None);
    }

    #[test]
    fn test_resolve_with_no_hosts() {
        let dir = EndpointDirectory::from_endpoints(&endpoints(0), "https");
        assert_eq!(dir.resolve("videos"), None);
        assert!(!dir.rotate_if_needed("videos", "h0.test"));
    }

    #[test]
    fn test_rotation_cycles_and_decrements_budget() {
        let h = 3;
        let dir = EndpointDirectory::from_endpoints(&endpoints(h), "https");

        for k in 1..=h {
            let previous = host_of(&dir, "videos");
            assert!(dir.rotate_if_needed("videos", &previous));
            let module = dir.module("videos").unwrap();
            assert_eq!(module.in_use as usize, k % h);
            let expected_budget = if k < h { 2 } else { 1 };
            assert_eq!(module.max_fails, expected_budget);
        }
    }

    #[test]
    fn test_exhausted_module_never_advances() {
        let listener = Arc::new(Recorder::default());
        let dir = EndpointDirectory::from_endpoints(&endpoints(2), "https")
            .with_listener(listener.clone());

        // Two full cycles drain the default budget of 2.
        for _ in 0..4 {
            let previous = host_of(&dir, "videos");
            assert!(dir.rotate_if_needed("videos", &previous));
        }
        let module = dir.module("videos").unwrap();
        assert_eq!(module.max_fails, 0);
        assert_eq!(module.in_use, 0);

        for _ in 0..5 {
            let previous = host_of(&dir, "videos");
            assert!(!dir.rotate_if_needed("videos", &previous));
            assert_eq!(dir.module("videos").unwrap().in_use, 0);
        }
        assert_eq!(listener.changes.load(Ordering::SeqCst), 4 + 5);
        assert_eq!(listener.flushes.load(Ordering::SeqCst), 4 + 5);
        assert_eq!(listener.canonical.lock().unwrap().as_ref().unwrap().max_fails, 0);
    }

    #[test]
    fn test_flush_runs_outside_module_lock() {
        let listener = Arc::new(Recorder {
            flush_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let dir = Arc::new(
            EndpointDirectory::from_endpoints(&endpoints(2), "https").with_listener(listener.clone()),
        );

        let rotating = {
            let dir = dir.clone();
            std::thread::spawn(move || dir.rotate_if_needed("videos", "h0.test"))
        };
        std::thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        assert_eq!(dir.resolve("videos").as_deref(), Some("https://h1.test/videos/v1"));
        assert!(start.elapsed() < Duration::from_millis(100), "resolve waited {:?}", start.elapsed());

        assert!(rotating.join().unwrap());
        assert_eq!(listener.changes.load(Ordering::SeqCst), 1);
        assert_eq!(listener.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_rotation_is_not_repeated() {
        let listener = Arc::new(Recorder::default());
        let dir = EndpointDirectory::from_endpoints(&endpoints(3), "https")
            .with_listener(listener.clone());

        // Two requests both failed against h0; only the first one rotates.
        assert!(dir.rotate_if_needed("videos", "h0.test"));
        assert!(dir.rotate_if_needed("videos", "h0.test"));
        assert_eq!(dir.module("videos").unwrap().in_use, 1);
        assert_eq!(listener.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prefix_hosts_are_distinct() {
        let eps = Endpoints {
            app_urls: vec!["{0}://api.test/".into(), "{0}://api.test.backup/".into()],
            ..endpoints(0)
        };
        let dir = EndpointDirectory::from_endpoints(&eps, "https");

        assert!(dir.rotate_if_needed("videos", "api.test"));
        assert_eq!(dir.module("videos").unwrap().in_use, 1);

        // A stale report about "api.test" must not rotate away from
        // "api.test.backup" even though one contains the other.
        assert!(dir.rotate_if_needed("videos", "api.test"));
        assert_eq!(dir.module("videos").unwrap().in_use, 1);

        // Full URLs are accepted as well.
        assert!(dir.rotate_if_needed("videos", "https://api.test.backup/videos/v1"));
        assert_eq!(dir.module("videos").unwrap().in_use, 0);
    }

    #[test]
    fn test_unknown_module_does_not_retry() {
        let dir = EndpointDirectory::from_endpoints(&endpoints(2), "https");
        assert!(!dir.rotate_if_needed("nope", "h0.test"));
    }
}
