//! HTTP transport.
//!
//! - GET /{admin_prefix}/status - Counters and registry generation
//! - GET /{admin_prefix}/audit?limit=N - Recent audit entries
//! - anything else - Mock endpoints

use crate::audit::AuditEntry;
use crate::path::normalize;
use crate::server::{MockRequest, MockServer, StatusReport};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Query parameters for the audit listing.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// Build the router: admin routes under the admin prefix, mocks for everything else.
pub fn router(server: Arc<MockServer>) -> Router {
    let admin = normalize(&server.settings().admin_prefix);
    Router::new()
        .route(&format!("/{}/status", admin), get(status))
        .route(&format!("/{}/audit", admin), get(audit))
        .fallback(serve_mock)
        .with_state(server)
}

async fn status(State(server): State<Arc<MockServer>>) -> Json<StatusReport> {
    Json(server.status().await)
}

async fn audit(
    State(server): State<Arc<MockServer>>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    Json(server.audit().recent(query.limit).await)
}

async fn serve_mock(
    State(server): State<Arc<MockServer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = MockRequest::new(method.as_str(), uri.path(), headers);
    let mut response = match server.serve(&request).await {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    };
    if method == Method::HEAD {
        *response.body_mut() = Body::empty();
    }
    response
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(server: Arc<MockServer>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Mock API listening");

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Mock API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
