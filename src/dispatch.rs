//! Per-method handler selection.

use crate::model::{HttpMethod, ResponseHandler};
use crate::registry::ResolvedEndpoint;

/// The endpoint has no handler for the requested method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNotAllowed {
    /// Methods configured on the endpoint, for the `Allow` header
    pub allowed: Vec<HttpMethod>,
}

impl MethodNotAllowed {
    /// `Allow` header value, e.g. `GET, POST`.
    pub fn allow_header(&self) -> String {
        allow_header(&self.allowed)
    }
}

/// Join methods into an `Allow` header value.
pub fn allow_header(methods: &[HttpMethod]) -> String {
    methods
        .iter()
        .map(HttpMethod::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Select the handler for `method`, compared case-insensitively.
///
/// There is no fallback handler; methods outside the supported set are
/// simply never configured.
pub fn dispatch<'a>(
    endpoint: &'a ResolvedEndpoint,
    method: &str,
) -> Result<&'a ResponseHandler, MethodNotAllowed> {
    method
        .parse::<HttpMethod>()
        .ok()
        .and_then(|m| endpoint.handlers.get(&m))
        .ok_or_else(|| MethodNotAllowed {
            allowed: endpoint.allowed_methods(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn endpoint(methods: &[HttpMethod]) -> ResolvedEndpoint {
        ResolvedEndpoint {
            id: "e".to_string(),
            path: "p".to_string(),
            description: String::new(),
            auth: None,
            handlers: methods
                .iter()
                .map(|m| {
                    (
                        *m,
                        ResponseHandler {
                            id: m.to_string(),
                            method: *m,
                            status: 200,
                            headers: BTreeMap::new(),
                            body: m.to_string(),
                            description: String::new(),
                            auth_profiles: vec![],
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_dispatch_matches_method() {
        let ep = endpoint(&[HttpMethod::Get, HttpMethod::Post]);
        assert_eq!(dispatch(&ep, "GET").unwrap().body, "GET");
        assert_eq!(dispatch(&ep, "post").unwrap().body, "POST");
    }

    #[test]
    fn test_method_not_allowed_lists_configured_methods() {
        let ep = endpoint(&[HttpMethod::Post, HttpMethod::Get]);
        let err = dispatch(&ep, "DELETE").unwrap_err();

        let allowed: HashSet<_> = err.allowed.iter().copied().collect();
        assert_eq!(allowed, HashSet::from([HttpMethod::Get, HttpMethod::Post]));
        assert_eq!(err.allow_header(), "GET, POST");
    }

    #[test]
    fn test_unsupported_method_is_not_allowed() {
        let ep = endpoint(&[HttpMethod::Get]);
        assert!(dispatch(&ep, "TRACE").is_err());
        assert!(dispatch(&ep, "").is_err());
    }
}
