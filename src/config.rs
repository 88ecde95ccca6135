//! Configuration for the mock API server.
//!
//! A single YAML document carries the server settings together with the
//! endpoint and authentication-profile records served from it.

use crate::model::{AuthKind, AuthenticationProfile, MockEndpoint};
use crate::path::{normalize, strip_prefix};
use axum::http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockApiConfig {
    /// Server settings (read once at startup)
    #[serde(default)]
    pub settings: ServerSettings,

    /// Authentication profiles
    #[serde(default)]
    pub auth_profiles: Vec<AuthenticationProfile>,

    /// Mock endpoints
    #[serde(default)]
    pub endpoints: Vec<MockEndpoint>,
}

/// Errors raised while parsing or validating a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

impl MockApiConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content)?)
    }

    /// Parse and validate a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings and records.
    ///
    /// This is the write-time validation the serving engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        let mut profile_ids = HashSet::new();
        for (i, profile) in self.auth_profiles.iter().enumerate() {
            validate_profile(profile).map_err(|e| invalid(format!("Auth profile {}: {}", i, e)))?;
            if !profile_ids.insert(profile.id.as_str()) {
                return Err(invalid(format!("Duplicate auth profile id: {}", profile.id)));
            }
        }

        let mut endpoint_ids = HashSet::new();
        let mut paths = HashSet::new();
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            validate_endpoint(endpoint, &profile_ids)
                .map_err(|e| invalid(format!("Endpoint {}: {}", i, e)))?;
            if !endpoint_ids.insert(endpoint.id.as_str()) {
                return Err(invalid(format!("Duplicate endpoint id: {}", endpoint.id)));
            }
            let key = normalize(&endpoint.path);
            if self.settings.is_admin_path(&self.settings.served_path(&key)) {
                return Err(invalid(format!(
                    "Endpoint {}: path /{} is reserved for admin routes",
                    i, key
                )));
            }
            if !paths.insert(key.clone()) {
                return Err(invalid(format!("Duplicate endpoint path: /{}", key)));
            }
        }
        Ok(())
    }
}

fn validate_profile(profile: &AuthenticationProfile) -> Result<(), ConfigError> {
    if profile.id.is_empty() {
        return Err(invalid("id cannot be empty"));
    }
    match &profile.kind {
        AuthKind::ApiKey { key } => {
            if key.is_empty() {
                return Err(invalid("API key cannot be empty"));
            }
            HeaderValue::from_str(key)
                .map_err(|_| invalid("API key must be a valid header value"))?;
        }
        AuthKind::BasicAuth { username, password } => {
            if username.is_empty() {
                return Err(invalid("Basic auth username is required"));
            }
            if username.contains(':') {
                return Err(invalid("Basic auth username cannot contain ':'"));
            }
            if password.is_empty() {
                return Err(invalid("Basic auth password cannot be empty"));
            }
        }
    }
    Ok(())
}

fn validate_endpoint(
    endpoint: &MockEndpoint,
    profile_ids: &HashSet<&str>,
) -> Result<(), ConfigError> {
    if endpoint.id.is_empty() {
        return Err(invalid("id cannot be empty"));
    }
    if normalize(&endpoint.path).is_empty() {
        return Err(invalid("Path cannot be empty or just slashes after normalization"));
    }
    if let Some(auth) = &endpoint.authentication {
        if !profile_ids.contains(auth.as_str()) {
            return Err(invalid(format!("Unknown auth profile: {}", auth)));
        }
    }

    let mut methods = HashSet::new();
    for handler in &endpoint.handlers {
        if !methods.insert(handler.method) {
            return Err(invalid(format!("Duplicate handler for method {}", handler.method)));
        }
        if handler.status < 100 || handler.status > 599 {
            return Err(invalid(format!("Invalid status code: {}", handler.status)));
        }

        let mut names = HashSet::new();
        for (name, value) in &handler.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("Invalid header name: {}", name)))?;
            HeaderValue::from_str(value)
                .map_err(|_| invalid(format!("Invalid value for header {}", name)))?;
            if !names.insert(name.to_ascii_lowercase()) {
                return Err(invalid(format!("Duplicate header: {}", name)));
            }
        }

        for auth in &handler.auth_profiles {
            if !profile_ids.contains(auth.as_str()) {
                return Err(invalid(format!("Unknown auth profile: {}", auth)));
            }
        }
    }
    Ok(())
}

/// Status used when a well-formed credential does not match the profile.
///
/// Missing or malformed credentials are always `401`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrongCredentialStatus {
    #[default]
    Unauthorized,
    Forbidden,
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Prefix under which mock endpoints are served
    #[serde(default)]
    pub path_prefix: String,

    /// Prefix for the status and audit routes
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,

    /// Content type used when a handler pins none and negotiation does not apply
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// How often the store's version marker is polled (ms)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Upper bound for a single store read (ms)
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Serving fails with 503 when the store was last read longer ago (ms)
    #[serde(default = "default_max_staleness_ms")]
    pub max_staleness_ms: u64,

    /// Status for well-formed but mismatched credentials
    #[serde(default)]
    pub wrong_credential_status: WrongCredentialStatus,

    /// Log served requests
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests with no endpoint
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Number of audit entries retained in memory
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path_prefix: String::new(),
            admin_prefix: default_admin_prefix(),
            default_content_type: default_content_type(),
            refresh_interval_ms: default_refresh_interval_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            max_staleness_ms: default_max_staleness_ms(),
            wrong_credential_status: WrongCredentialStatus::default(),
            log_matches: true,
            log_unmatched: true,
            audit_capacity: default_audit_capacity(),
        }
    }
}

impl ServerSettings {
    /// Validate the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize(&self.admin_prefix).is_empty() {
            return Err(invalid("admin_prefix cannot be empty"));
        }
        if self.is_admin_path(&normalize(&self.path_prefix)) {
            return Err(invalid("path_prefix cannot lie under admin_prefix"));
        }
        HeaderValue::from_str(&self.default_content_type)
            .map_err(|_| invalid("default_content_type must be a valid header value"))?;
        if self.refresh_interval_ms == 0 {
            return Err(invalid("refresh_interval_ms must be positive"));
        }
        if self.store_timeout_ms == 0 {
            return Err(invalid("store_timeout_ms must be positive"));
        }
        let min_staleness = self
            .refresh_interval_ms
            .checked_add(self.store_timeout_ms)
            .ok_or_else(|| invalid("refresh_interval_ms + store_timeout_ms is out of range"))?;
        if self.max_staleness_ms < min_staleness {
            return Err(invalid(
                "max_staleness_ms must be at least refresh_interval_ms + store_timeout_ms",
            ));
        }
        Ok(())
    }

    /// Full request path (normalized) an endpoint path is served at.
    pub fn served_path(&self, endpoint_path: &str) -> String {
        normalize(&format!("{}/{}", self.path_prefix, endpoint_path))
    }

    /// Whether a normalized request path is reserved for the admin routes.
    pub fn is_admin_path(&self, normalized: &str) -> bool {
        strip_prefix(normalized, &normalize(&self.admin_prefix)).is_some()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_admin_prefix() -> String {
    "_mokkapi".to_string()
}

fn default_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_max_staleness_ms() -> u64 {
    30_000
}

fn default_audit_capacity() -> usize {
    1000
}
