//! Audit trail of mock traffic.
//!
//! Served requests and authentication failures are kept in a bounded
//! in-memory ring and mirrored to the `mokkapi::audit` log target.
//! Credentials are never recorded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A configured response was served.
    MockAccess,
    /// A request to a protected endpoint failed authentication.
    AuthFailure,
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub endpoint_id: String,
    pub method: String,
    /// Normalized path
    pub path: String,
    /// Status code returned to the client
    pub status: u16,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        endpoint_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            endpoint_id: endpoint_id.into(),
            method: method.into(),
            path: path.into(),
            status,
        }
    }
}

/// Bounded audit log; the oldest entries are dropped first.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Append an entry.
    pub async fn record(&self, entry: AuditEntry) {
        info!(
            target: "mokkapi::audit",
            action = ?entry.action,
            endpoint_id = %entry.endpoint_id,
            method = %entry.method,
            path = %entry.path,
            status = entry.status,
            "Audit"
        );
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
