//! Endpoint registry.
//!
//! A [`Registry`] is one immutable generation of endpoints keyed by
//! normalized path. [`LiveRegistry`] holds the generation currently being
//! served and swaps in a new one after each successful rebuild. Readers
//! clone an `Arc` to a whole generation, so a request never sees parts of
//! two generations.

use crate::config::ServerSettings;
use crate::model::{AuthenticationProfile, HttpMethod, ResponseHandler};
use crate::path::normalize;
use crate::store::{ConfigStore, Snapshot, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// An endpoint ready to be served.
///
/// Its authentication profile is resolved at build time so the endpoint and
/// its credentials always come from the same generation.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    /// Endpoint id from the store
    pub id: String,
    /// Normalized path
    pub path: String,
    /// Description
    pub description: String,
    /// Endpoint-level authentication
    pub auth: Option<AuthenticationProfile>,
    /// Handlers keyed by method
    pub handlers: BTreeMap<HttpMethod, ResponseHandler>,
}

impl ResolvedEndpoint {
    /// Methods with a configured handler.
    pub fn allowed_methods(&self) -> Vec<HttpMethod> {
        self.handlers.keys().copied().collect()
    }
}

/// Store-level invariant violations detected while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoints {first} and {second} both normalize to path '/{path}'")]
    DuplicatePath {
        path: String,
        first: String,
        second: String,
    },

    #[error("endpoint {endpoint} has more than one {method} handler")]
    DuplicateMethod {
        endpoint: String,
        method: HttpMethod,
    },

    #[error("endpoint {endpoint} references unknown auth profile {profile}")]
    UnknownAuthProfile { endpoint: String, profile: String },
}

/// One immutable generation of servable endpoints.
#[derive(Debug, Default)]
pub struct Registry {
    generation: u64,
    store_version: u64,
    endpoints: HashMap<String, ResolvedEndpoint>,
}

impl Registry {
    /// Build a generation from a store snapshot.
    ///
    /// Endpoints without handlers are left out: they are not servable.
    pub fn build(snapshot: &Snapshot, generation: u64) -> Result<Self, RegistryError> {
        let mut owners: HashMap<String, &str> = HashMap::new();
        let mut endpoints = HashMap::new();

        for endpoint in snapshot.list_endpoints() {
            let key = normalize(&endpoint.path);
            if let Some(first) = owners.insert(key.clone(), &endpoint.id) {
                return Err(RegistryError::DuplicatePath {
                    path: key,
                    first: first.to_string(),
                    second: endpoint.id.clone(),
                });
            }

            let auth = match &endpoint.authentication {
                Some(profile_id) => Some(
                    snapshot
                        .auth_profile(profile_id)
                        .cloned()
                        .ok_or_else(|| RegistryError::UnknownAuthProfile {
                            endpoint: endpoint.id.clone(),
                            profile: profile_id.clone(),
                        })?,
                ),
                None => None,
            };

            let mut handlers = BTreeMap::new();
            for handler in &endpoint.handlers {
                if !handler.auth_profiles.is_empty() {
                    warn!(
                        endpoint_id = %endpoint.id,
                        handler_id = %handler.id,
                        "Handler-level authentication profiles are not enforced"
                    );
                }
                if handlers.insert(handler.method, handler.clone()).is_some() {
                    return Err(RegistryError::DuplicateMethod {
                        endpoint: endpoint.id.clone(),
                        method: handler.method,
                    });
                }
            }

            if handlers.is_empty() {
                debug!(endpoint_id = %endpoint.id, "Skipping endpoint without handlers");
                continue;
            }

            endpoints.insert(
                key.clone(),
                ResolvedEndpoint {
                    id: endpoint.id.clone(),
                    path: key,
                    description: endpoint.description.clone(),
                    auth,
                    handlers,
                },
            );
        }

        Ok(Self {
            generation,
            store_version: snapshot.version,
            endpoints,
        })
    }

    /// Exact-match lookup of a normalized path.
    pub fn resolve(&self, path: &str) -> Option<&ResolvedEndpoint> {
        self.endpoints.get(path)
    }

    /// Generation number, increasing with each install.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store version this generation was built from.
    pub fn store_version(&self) -> u64 {
        self.store_version
    }

    /// Number of servable endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Errors from a registry refresh.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Configuration(#[from] RegistryError),
}

impl RefreshError {
    /// Whether the store was reachable but its content was rejected.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RefreshError::Configuration(_) | RefreshError::Store(StoreError::Invalid(_))
        )
    }
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The store version did not change.
    Unchanged,
    /// A new generation was installed.
    Installed { generation: u64, endpoints: usize },
}

/// The registry generation currently being served, plus its refresh logic.
pub struct LiveRegistry {
    store: Arc<dyn ConfigStore>,
    current: RwLock<Arc<Registry>>,
    /// Serializes rebuilds; holds the last store version whose content was rejected
    refresh_lock: Mutex<Option<u64>>,
    started: Instant,
    /// Milliseconds after `started` of the last successful store read
    last_sync_ms: AtomicU64,
    store_timeout: Duration,
    max_staleness: Duration,
}

impl LiveRegistry {
    /// Read the store and build the first generation.
    ///
    /// Unlike later refreshes, a failure here has no previous generation to
    /// fall back on and is returned to the caller.
    pub async fn load(
        store: Arc<dyn ConfigStore>,
        settings: &ServerSettings,
    ) -> Result<Self, RefreshError> {
        let live = Self {
            store,
            current: RwLock::new(Arc::new(Registry::default())),
            refresh_lock: Mutex::new(None),
            started: Instant::now(),
            last_sync_ms: AtomicU64::new(0),
            store_timeout: settings.store_timeout(),
            max_staleness: settings.max_staleness(),
        };
        live.rebuild().await?;
        Ok(live)
    }

    /// The generation to serve the next request from.
    pub async fn current(&self) -> Arc<Registry> {
        Arc::clone(&*self.current.read().await)
    }

    /// Time since the store was last read successfully, if that exceeds the
    /// staleness bound.
    pub fn staleness(&self) -> Option<Duration> {
        let now = self.elapsed_ms();
        let last = self.last_sync_ms.load(Ordering::Acquire);
        let age = Duration::from_millis(now.saturating_sub(last));
        (age > self.max_staleness).then_some(age)
    }

    /// Poll the store's version and rebuild if it changed.
    ///
    /// On failure the current generation stays installed. A version whose
    /// content was rejected is not rebuilt again until the store changes.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let mut rejected = self.refresh_lock.lock().await;
        let version = self.read_store(self.store.version()).await?;
        if version == self.current().await.store_version() || *rejected == Some(version) {
            return Ok(RefreshOutcome::Unchanged);
        }
        let result = self.rebuild_locked().await;
        *rejected = match &result {
            Err(e) if e.is_configuration() => Some(version),
            _ => None,
        };
        result
    }

    /// Rebuild from a fresh snapshot regardless of the version marker.
    pub async fn rebuild(&self) -> Result<RefreshOutcome, RefreshError> {
        let mut rejected = self.refresh_lock.lock().await;
        let result = self.rebuild_locked().await;
        if result.is_ok() {
            *rejected = None;
        }
        result
    }

    async fn rebuild_locked(&self) -> Result<RefreshOutcome, RefreshError> {
        let snapshot = match self.read_store(self.store.snapshot()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if e.is_configuration() {
                    error!(error = %e, "Store content rejected, previous generation keeps serving");
                }
                return Err(e);
            }
        };
        let generation = self.current().await.generation() + 1;

        let registry = match Registry::build(&snapshot, generation) {
            Ok(registry) => registry,
            Err(e) => {
                error!(error = %e, "Registry rebuild rejected, previous generation keeps serving");
                return Err(e.into());
            }
        };

        let endpoints = registry.len();
        *self.current.write().await = Arc::new(registry);
        info!(
            generation,
            endpoints,
            store_version = snapshot.version,
            "Registry generation installed"
        );
        Ok(RefreshOutcome::Installed {
            generation,
            endpoints,
        })
    }

    /// Run a store call under the read timeout, tracking the last successful read.
    async fn read_store<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, RefreshError> {
        let result = tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| RefreshError::Timeout(self.store_timeout))?;
        match &result {
            Ok(_) | Err(StoreError::Invalid(_)) => self.mark_synced(),
            Err(StoreError::Unavailable(_)) => {}
        }
        Ok(result?)
    }

    fn mark_synced(&self) {
        self.last_sync_ms
            .store(self.elapsed_ms(), Ordering::Release);
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Spawn a task polling the store every `interval`.
    ///
    /// Configuration changes become visible to new requests within
    /// `interval` plus the store timeout.
    pub fn spawn_refresher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let live = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match live.refresh().await {
                    Ok(_) => {}
                    // Already logged by the rebuild.
                    Err(e) if e.is_configuration() => {}
                    Err(e) => warn!(error = %e, "Registry refresh failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthKind, MockEndpoint};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    fn handler(method: HttpMethod, body: &str) -> ResponseHandler {
        ResponseHandler {
            id: format!("h-{}", method),
            method,
            status: 200,
            headers: BTreeMap::new(),
            body: body.to_string(),
            description: String::new(),
            auth_profiles: vec![],
        }
    }

    fn endpoint(id: &str, path: &str, handlers: Vec<ResponseHandler>) -> MockEndpoint {
        MockEndpoint {
            id: id.to_string(),
            owner: None,
            path: path.to_string(),
            description: String::new(),
            authentication: None,
            handlers,
        }
    }

    fn snapshot(endpoints: Vec<MockEndpoint>) -> Snapshot {
        Snapshot {
            version: 7,
            endpoints,
            auth_profiles: vec![],
        }
    }

    #[test]
    fn test_build_keys_by_normalized_path() {
        let snap = snapshot(vec![endpoint(
            "a",
            "/some//unique/path/",
            vec![handler(HttpMethod::Get, "x")],
        )]);
        let registry = Registry::build(&snap, 1).unwrap();
        assert_eq!(registry.resolve("some/unique/path").unwrap().id, "a");
        assert!(registry.resolve("some/unique").is_none());
        assert_eq!(registry.store_version(), 7);
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_build_rejects_duplicate_paths() {
        let snap = snapshot(vec![
            endpoint("a", "a/b", vec![handler(HttpMethod::Get, "")]),
            endpoint("b", "/a//b/", vec![]),
        ]);
        assert!(matches!(
            Registry::build(&snap, 1),
            Err(RegistryError::DuplicatePath { .. })
        ));
    }

    #[test]
    fn test_build_rejects_duplicate_methods() {
        let snap = snapshot(vec![endpoint(
            "a",
            "a",
            vec![handler(HttpMethod::Get, "1"), handler(HttpMethod::Get, "2")],
        )]);
        assert!(matches!(
            Registry::build(&snap, 1),
            Err(RegistryError::DuplicateMethod { .. })
        ));
    }

    #[test]
    fn test_build_rejects_dangling_auth() {
        let mut ep = endpoint("a", "a", vec![handler(HttpMethod::Get, "")]);
        ep.authentication = Some("gone".to_string());
        assert!(matches!(
            Registry::build(&snapshot(vec![ep]), 1),
            Err(RegistryError::UnknownAuthProfile { .. })
        ));
    }

    #[test]
    fn test_build_resolves_auth_profile() {
        let mut ep = endpoint("a", "a", vec![handler(HttpMethod::Get, "")]);
        ep.authentication = Some("key".to_string());
        let mut snap = snapshot(vec![ep]);
        snap.auth_profiles.push(AuthenticationProfile {
            id: "key".to_string(),
            name: String::new(),
            owner: None,
            kind: AuthKind::ApiKey {
                key: "K".to_string(),
            },
        });
        let registry = Registry::build(&snap, 1).unwrap();
        assert_eq!(registry.resolve("a").unwrap().auth.as_ref().unwrap().id, "key");
    }

    #[test]
    fn test_zero_handler_endpoint_is_not_servable() {
        let snap = snapshot(vec![endpoint("empty", "empty", vec![])]);
        let registry = Registry::build(&snap, 1).unwrap();
        assert!(registry.resolve("empty").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_installs_new_generation() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_endpoint(endpoint("a", "a", vec![handler(HttpMethod::Get, "v1")]))
            .await;
        let live = LiveRegistry::load(store.clone(), &ServerSettings::default())
            .await
            .unwrap();
        let first = live.current().await;
        assert_eq!(first.generation(), 1);

        assert_eq!(live.refresh().await.unwrap(), RefreshOutcome::Unchanged);

        store
            .upsert_endpoint(endpoint("a", "a", vec![handler(HttpMethod::Get, "v2")]))
            .await;
        assert!(matches!(
            live.refresh().await.unwrap(),
            RefreshOutcome::Installed { generation: 2, .. }
        ));

        let second = live.current().await;
        assert_eq!(second.resolve("a").unwrap().handlers[&HttpMethod::Get].body, "v2");
        // A reader holding the old generation keeps a consistent view.
        assert_eq!(first.resolve("a").unwrap().handlers[&HttpMethod::Get].body, "v1");
    }

    #[tokio::test]
    async fn test_bad_rebuild_keeps_previous_generation() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_endpoint(endpoint("a", "a", vec![handler(HttpMethod::Get, "ok")]))
            .await;
        let live = LiveRegistry::load(store.clone(), &ServerSettings::default())
            .await
            .unwrap();

        store
            .upsert_endpoint(endpoint("b", "/a/", vec![handler(HttpMethod::Get, "dup")]))
            .await;
        let err = live.refresh().await.unwrap_err();
        assert!(err.is_configuration());

        let current = live.current().await;
        assert_eq!(current.generation(), 1);
        assert_eq!(current.resolve("a").unwrap().id, "a");
        assert!(live.staleness().is_none());

        // The rejected version is not rebuilt on every poll.
        assert_eq!(live.refresh().await.unwrap(), RefreshOutcome::Unchanged);
        assert_eq!(live.refresh().await.unwrap(), RefreshOutcome::Unchanged);

        // A corrective edit is picked up.
        store.remove_endpoint("b").await;
        assert!(matches!(
            live.refresh().await.unwrap(),
            RefreshOutcome::Installed { generation: 2, .. }
        ));
    }

    struct FlakyStore {
        inner: MemoryStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl ConfigStore for FlakyStore {
        async fn version(&self) -> Result<u64, StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".to_string()));
            }
            self.inner.version().await
        }

        async fn snapshot(&self) -> Result<Snapshot, StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".to_string()));
            }
            self.inner.snapshot().await
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_becomes_stale() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        });
        let settings = ServerSettings {
            refresh_interval_ms: 1,
            store_timeout_ms: 1,
            max_staleness_ms: 20,
            ..ServerSettings::default()
        };
        let live = LiveRegistry::load(store.clone(), &settings).await.unwrap();
        assert!(live.staleness().is_none());

        store.down.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(live.refresh().await, Err(RefreshError::Store(_))));
        assert!(live.staleness().is_some());

        store.down.store(false, Ordering::SeqCst);
        live.refresh().await.unwrap();
        assert!(live.staleness().is_none());
    }

    #[tokio::test]
    async fn test_load_fails_without_store() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            down: AtomicBool::new(true),
        });
        assert!(LiveRegistry::load(store, &ServerSettings::default())
            .await
            .is_err());
    }
}
