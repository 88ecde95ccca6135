//! Endpoint, handler and authentication-profile records.
//!
//! These are the records owned by the configuration store. The serving
//! engine only ever reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Header carrying the secret for [`AuthKind::ApiKey`] profiles.
pub const API_KEY_HEADER: &str = "x-api-key";

/// HTTP methods a response handler can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
}

impl HttpMethod {
    /// All methods, in the order they are listed in `Allow` headers.
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
    ];

    /// Canonical uppercase token.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method token is not one of the supported methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = UnknownMethod;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

/// A reusable credential definition attachable to endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationProfile {
    /// Opaque identifier referenced by endpoints
    pub id: String,

    /// Human-friendly name
    #[serde(default)]
    pub name: String,

    /// Owning user
    #[serde(default)]
    pub owner: Option<String>,

    /// Credential kind and its fields
    #[serde(flatten)]
    pub kind: AuthKind,
}

/// The credential carried by an [`AuthenticationProfile`].
///
/// Exactly one kind's fields exist at a time.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthKind {
    /// Secret compared against the [`API_KEY_HEADER`] request header.
    ApiKey { key: String },
    /// Credentials for `Authorization: Basic`.
    BasicAuth { username: String, password: String },
}

impl AuthKind {
    /// Short label used in logs and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            AuthKind::ApiKey { .. } => "api_key",
            AuthKind::BasicAuth { .. } => "basic_auth",
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKind::ApiKey { .. } => f.debug_struct("ApiKey").field("key", &"<redacted>").finish(),
            AuthKind::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// A configured path with its per-method responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockEndpoint {
    /// Opaque identifier
    pub id: String,

    /// Owning user
    #[serde(default)]
    pub owner: Option<String>,

    /// Path, normalized before it is used as a registry key
    pub path: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Optional authentication profile id applied to every method
    #[serde(default)]
    pub authentication: Option<String>,

    /// Response handlers, at most one per method
    #[serde(default)]
    pub handlers: Vec<ResponseHandler>,
}

/// The stored response for one method of an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseHandler {
    /// Opaque identifier
    pub id: String,

    /// Method this handler answers
    pub method: HttpMethod,

    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers (names compared case-insensitively)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw response body
    #[serde(default)]
    pub body: String,

    /// Optional description
    #[serde(default)]
    pub description: String,

    /// Handler-level authentication profile ids (declared, not enforced)
    #[serde(default)]
    pub auth_profiles: Vec<String>,
}

fn default_status() -> u16 {
    200
}

impl ResponseHandler {
    /// Look up a stored header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
