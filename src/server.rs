//! Serving orchestrator.
//!
//! Runs one request through normalization, registry lookup,
//! authentication, method dispatch and materialization, stopping at the
//! first stage that fails. No stage writes configuration, so a request can
//! be dropped at any await point without side effects on serving state.

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::auth::{AuthOutcome, Authenticator};
use crate::config::ServerSettings;
use crate::dispatch::dispatch;
use crate::error::ServeError;
use crate::materialize::{materialize, MockResponse};
use crate::path::{normalize, strip_prefix};
use crate::registry::{LiveRegistry, RefreshError};
use crate::store::ConfigStore;
use axum::http::HeaderMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An inbound request, as far as the engine cares.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    /// Raw path, without query string
    pub path: String,
    pub headers: HeaderMap,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers,
        }
    }
}

/// Snapshot of the server's counters and registry state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generation: u64,
    pub store_version: u64,
    pub endpoints: usize,
    pub stale: bool,
    pub requests_total: u64,
    pub requests_served: u64,
    pub requests_not_found: u64,
    pub requests_unauthorized: u64,
    pub requests_forbidden: u64,
    pub requests_method_not_allowed: u64,
    pub requests_unavailable: u64,
}

/// Mock API server.
///
/// Serves requests against the live registry and keeps request counters
/// and the audit trail.
pub struct MockServer {
    settings: ServerSettings,
    /// Background registry refresh, aborted on drop
    refresher: Option<JoinHandle<()>>,
    /// Normalized `settings.path_prefix`
    prefix: String,
    registry: Arc<LiveRegistry>,
    authenticator: Authenticator,
    audit: AuditLog,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Requests answered with a configured response.
    requests_served: AtomicU64,
    requests_not_found: AtomicU64,
    requests_unauthorized: AtomicU64,
    requests_forbidden: AtomicU64,
    requests_method_not_allowed: AtomicU64,
    requests_unavailable: AtomicU64,
}

impl MockServer {
    /// Create a server over an already loaded registry.
    ///
    /// Nothing refreshes the registry; the caller drives
    /// [`LiveRegistry::refresh`] or uses [`MockServer::from_store`].
    pub fn new(settings: ServerSettings, registry: Arc<LiveRegistry>) -> Self {
        info!(
            path_prefix = %settings.path_prefix,
            wrong_credential_status = ?settings.wrong_credential_status,
            "Mock server initialized"
        );

        Self {
            prefix: normalize(&settings.path_prefix),
            authenticator: Authenticator::new(settings.wrong_credential_status),
            audit: AuditLog::new(settings.audit_capacity),
            settings,
            refresher: None,
            registry,
            requests_total: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
            requests_not_found: AtomicU64::new(0),
            requests_unauthorized: AtomicU64::new(0),
            requests_forbidden: AtomicU64::new(0),
            requests_method_not_allowed: AtomicU64::new(0),
            requests_unavailable: AtomicU64::new(0),
        }
    }

    /// Load the first registry generation from `store`, create a server and
    /// start polling the store every `settings.refresh_interval_ms`.
    ///
    /// The refresher stops when the server is dropped.
    pub async fn from_store(
        settings: ServerSettings,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self, RefreshError> {
        let registry = Arc::new(LiveRegistry::load(store, &settings).await?);
        let refresher = registry.spawn_refresher(settings.refresh_interval());
        let mut server = Self::new(settings, registry);
        server.refresher = Some(refresher);
        Ok(server)
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<LiveRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests served from a handler.
    pub fn total_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Serve one request.
    pub async fn serve(&self, request: &MockRequest) -> Result<MockResponse, ServeError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let result = self.run(request).await;
        let counter = match &result {
            Ok(_) => &self.requests_served,
            Err(ServeError::NotFound { .. }) => &self.requests_not_found,
            Err(ServeError::Unauthorized { .. }) => &self.requests_unauthorized,
            Err(ServeError::Forbidden) => &self.requests_forbidden,
            Err(ServeError::MethodNotAllowed { .. }) => &self.requests_method_not_allowed,
            Err(ServeError::UpstreamUnavailable(_)) => &self.requests_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn run(&self, request: &MockRequest) -> Result<MockResponse, ServeError> {
        let normalized = normalize(&request.path);
        let Some(path) = strip_prefix(&normalized, &self.prefix) else {
            return Err(self.not_found(request, normalized.clone()));
        };

        if let Some(age) = self.registry.staleness() {
            warn!(age_ms = age.as_millis() as u64, "Refusing to serve from stale registry");
            return Err(ServeError::UpstreamUnavailable(format!(
                "configuration not refreshed for {} ms",
                age.as_millis()
            )));
        }

        // One generation for the whole request.
        let registry = self.registry.current().await;
        let Some(endpoint) = registry.resolve(path) else {
            return Err(self.not_found(request, path.to_string()));
        };

        let failure = match self.authenticator.authenticate(endpoint, request) {
            AuthOutcome::Authorized => None,
            AuthOutcome::Unauthorized(scheme) => Some(ServeError::Unauthorized { scheme }),
            AuthOutcome::Forbidden => Some(ServeError::Forbidden),
        };
        if let Some(error) = failure {
            debug!(endpoint_id = %endpoint.id, method = %request.method, "Authentication failed");
            self.audit
                .record(AuditEntry::new(
                    AuditAction::AuthFailure,
                    endpoint.id.as_str(),
                    request.method.as_str(),
                    path,
                    error.status().as_u16(),
                ))
                .await;
            return Err(error);
        }

        let handler = dispatch(endpoint, &request.method).map_err(|e| {
            debug!(
                endpoint_id = %endpoint.id,
                method = %request.method,
                allowed = %e.allow_header(),
                "Method not configured"
            );
            ServeError::MethodNotAllowed {
                method: request.method.to_ascii_uppercase(),
                allowed: e.allowed,
            }
        })?;

        let response = materialize(handler, request, &self.settings.default_content_type);

        if self.settings.log_matches {
            info!(
                endpoint_id = %endpoint.id,
                handler_id = %handler.id,
                method = %handler.method,
                path = %path,
                status = response.status.as_u16(),
                generation = registry.generation(),
                "Request served"
            );
        }
        self.audit
            .record(AuditEntry::new(
                AuditAction::MockAccess,
                endpoint.id.as_str(),
                handler.method.as_str(),
                path,
                response.status.as_u16(),
            ))
            .await;

        Ok(response)
    }

    fn not_found(&self, request: &MockRequest, path: String) -> ServeError {
        if self.settings.log_unmatched {
            warn!(
                method = %request.method,
                path = %request.path,
                "No mock endpoint found"
            );
        }
        ServeError::NotFound { path }
    }

    /// Counters and registry state.
    pub async fn status(&self) -> StatusReport {
        let registry = self.registry.current().await;
        StatusReport {
            generation: registry.generation(),
            store_version: registry.store_version(),
            endpoints: registry.len(),
            stale: self.registry.staleness().is_some(),
            requests_total: self.total_requests(),
            requests_served: self.total_served(),
            requests_not_found: self.requests_not_found.load(Ordering::Relaxed),
            requests_unauthorized: self.requests_unauthorized.load(Ordering::Relaxed),
            requests_forbidden: self.requests_forbidden.load(Ordering::Relaxed),
            requests_method_not_allowed: self.requests_method_not_allowed.load(Ordering::Relaxed),
            requests_unavailable: self.requests_unavailable.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}
