//! Configuration store.
//!
//! The store owns the endpoint and authentication-profile records. The
//! serving engine reads point-in-time [`Snapshot`]s from it and polls a
//! version marker to learn when a new snapshot is worth reading.

use crate::config::{ConfigError, MockApiConfig};
use crate::model::{AuthenticationProfile, HttpMethod, MockEndpoint};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors surfaced by a configuration store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or read.
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),

    /// The store was read but its content is not a valid configuration.
    #[error("configuration store content invalid: {0}")]
    Invalid(#[from] ConfigError),
}

/// A point-in-time, internally consistent view of the store.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Version marker this snapshot was read at
    pub version: u64,
    /// Endpoints with their handlers
    pub endpoints: Vec<MockEndpoint>,
    /// Authentication profiles
    pub auth_profiles: Vec<AuthenticationProfile>,
}

impl Snapshot {
    /// All endpoints in the snapshot.
    pub fn list_endpoints(&self) -> &[MockEndpoint] {
        &self.endpoints
    }

    /// Look up an authentication profile by id.
    pub fn auth_profile(&self, id: &str) -> Option<&AuthenticationProfile> {
        self.auth_profiles.iter().find(|p| p.id == id)
    }
}

/// Source of configuration snapshots.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current version marker. Changes whenever the content changes.
    async fn version(&self) -> Result<u64, StoreError>;

    /// Read a complete snapshot.
    async fn snapshot(&self) -> Result<Snapshot, StoreError>;
}

/// In-process store. Every write bumps the version.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded from a configuration document.
    pub fn from_config(config: &MockApiConfig) -> Self {
        Self {
            state: RwLock::new(Snapshot {
                version: 1,
                endpoints: config.endpoints.clone(),
                auth_profiles: config.auth_profiles.clone(),
            }),
        }
    }

    /// Replace all records at once.
    pub async fn replace(
        &self,
        endpoints: Vec<MockEndpoint>,
        auth_profiles: Vec<AuthenticationProfile>,
    ) {
        let mut state = self.state.write().await;
        state.endpoints = endpoints;
        state.auth_profiles = auth_profiles;
        state.version += 1;
    }

    /// Insert an endpoint, or replace the one with the same id.
    pub async fn upsert_endpoint(&self, endpoint: MockEndpoint) {
        let mut state = self.state.write().await;
        match state.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => state.endpoints.push(endpoint),
        }
        state.version += 1;
    }

    /// Remove an endpoint by id. Returns whether it existed.
    pub async fn remove_endpoint(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.endpoints.len();
        state.endpoints.retain(|e| e.id != id);
        let removed = state.endpoints.len() != before;
        if removed {
            state.version += 1;
        }
        removed
    }

    /// Remove the handler for `method` from an endpoint.
    ///
    /// Removing an endpoint's last handler removes the endpoint too.
    pub async fn remove_handler(&self, endpoint_id: &str, method: HttpMethod) -> bool {
        let mut state = self.state.write().await;
        let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.id == endpoint_id) else {
            return false;
        };
        let before = endpoint.handlers.len();
        endpoint.handlers.retain(|h| h.method != method);
        if endpoint.handlers.len() == before {
            return false;
        }
        if endpoint.handlers.is_empty() {
            debug!(endpoint_id, "Last handler removed, deleting endpoint");
            state.endpoints.retain(|e| e.id != endpoint_id);
        }
        state.version += 1;
        true
    }

    /// Insert an authentication profile, or replace the one with the same id.
    pub async fn upsert_auth_profile(&self, profile: AuthenticationProfile) {
        let mut state = self.state.write().await;
        match state.auth_profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => state.auth_profiles.push(profile),
        }
        state.version += 1;
    }

    /// Remove an authentication profile by id.
    ///
    /// Endpoints referencing it become public.
    pub async fn remove_auth_profile(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.auth_profiles.len();
        state.auth_profiles.retain(|p| p.id != id);
        if state.auth_profiles.len() == before {
            return false;
        }
        for endpoint in &mut state.endpoints {
            if endpoint.authentication.as_deref() == Some(id) {
                endpoint.authentication = None;
            }
        }
        state.version += 1;
        true
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn version(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.version)
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.state.read().await.clone())
    }
}

/// Store backed by a YAML configuration file.
///
/// The version marker is a hash of the file content, so any edit is seen
/// on the next poll.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<String, StoreError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to read {}: {}", self.path.display(), e))
        })
    }
}

fn content_version(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl ConfigStore for FileStore {
    async fn version(&self) -> Result<u64, StoreError> {
        Ok(content_version(&self.read().await?))
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let content = self.read().await?;
        let config = MockApiConfig::parse(&content)?;
        Ok(Snapshot {
            version: content_version(&content),
            endpoints: config.endpoints,
            auth_profiles: config.auth_profiles,
        })
    }
}
