//! Endpoint authentication.
//!
//! Checks a request's credentials against the endpoint's authentication
//! profile. Secrets are compared in constant time.

use crate::config::WrongCredentialStatus;
use crate::model::{AuthKind, API_KEY_HEADER};
use crate::registry::ResolvedEndpoint;
use crate::server::MockRequest;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::Engine;
use subtle::ConstantTimeEq;

/// `WWW-Authenticate` challenge sent for Basic-protected endpoints.
pub const BASIC_CHALLENGE: &str = "Basic realm=\"mokkapi\", charset=\"UTF-8\"";

/// Result of authenticating a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    /// Credential missing, malformed or (by default) wrong.
    Unauthorized(Scheme),
    /// Well-formed credential that does not match, when configured to say so.
    Forbidden,
}

/// Scheme the endpoint expects, used to build the failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    ApiKey,
    Basic,
}

impl Scheme {
    /// Value for the `WWW-Authenticate` header, if the scheme defines one.
    pub fn challenge(&self) -> Option<&'static str> {
        match self {
            Scheme::ApiKey => None,
            Scheme::Basic => Some(BASIC_CHALLENGE),
        }
    }
}

/// What the request presented.
#[derive(Debug, PartialEq, Eq)]
enum Presented {
    Missing,
    Malformed,
    Checked { matches: bool },
}

/// Stateless authenticator applying one credential policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticator {
    wrong_credential: WrongCredentialStatus,
}

impl Authenticator {
    pub fn new(wrong_credential: WrongCredentialStatus) -> Self {
        Self { wrong_credential }
    }

    /// Authenticate `request` against the endpoint's profile.
    pub fn authenticate(&self, endpoint: &ResolvedEndpoint, request: &MockRequest) -> AuthOutcome {
        let Some(profile) = &endpoint.auth else {
            return AuthOutcome::Authorized;
        };

        let (scheme, presented) = match &profile.kind {
            AuthKind::ApiKey { key } => (Scheme::ApiKey, check_api_key(&request.headers, key)),
            AuthKind::BasicAuth { username, password } => (
                Scheme::Basic,
                check_basic(&request.headers, username, password),
            ),
        };

        match presented {
            Presented::Checked { matches: true } => AuthOutcome::Authorized,
            Presented::Checked { matches: false } => match self.wrong_credential {
                WrongCredentialStatus::Unauthorized => AuthOutcome::Unauthorized(scheme),
                WrongCredentialStatus::Forbidden => AuthOutcome::Forbidden,
            },
            Presented::Missing | Presented::Malformed => AuthOutcome::Unauthorized(scheme),
        }
    }
}

fn secret_eq(presented: &[u8], expected: &[u8]) -> bool {
    presented.ct_eq(expected).into()
}

fn check_api_key(headers: &HeaderMap, key: &str) -> Presented {
    let Some(value) = headers.get(API_KEY_HEADER) else {
        return Presented::Missing;
    };
    if value.is_empty() {
        return Presented::Missing;
    }
    Presented::Checked {
        matches: secret_eq(value.as_bytes(), key.as_bytes()),
    }
}

fn check_basic(headers: &HeaderMap, username: &str, password: &str) -> Presented {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Presented::Missing;
    };
    let Ok(value) = value.to_str() else {
        return Presented::Malformed;
    };
    let Some((scheme, encoded)) = value.trim().split_once(' ') else {
        return Presented::Malformed;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Presented::Malformed;
    }
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return Presented::Malformed;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return Presented::Malformed;
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return Presented::Malformed;
    };

    // Both halves are always compared.
    let user_ok = user.as_bytes().ct_eq(username.as_bytes());
    let pass_ok = pass.as_bytes().ct_eq(password.as_bytes());
    Presented::Checked {
        matches: (user_ok & pass_ok).into(),
    }
}
