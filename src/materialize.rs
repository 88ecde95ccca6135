//! Response materialization.
//!
//! Turns a stored handler into the outbound response. Status and body are
//! emitted verbatim; the only thing computed is the `Content-Type` when the
//! handler does not pin one.

use crate::model::ResponseHandler;
use crate::server::MockRequest;
use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// A fully materialized mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Render `handler` for `request`.
///
/// If the handler stores no content type and the request's `Accept` asks
/// for JSON or XML that the body actually is, that type is emitted;
/// otherwise `default_content_type` is.
pub fn materialize(
    handler: &ResponseHandler,
    request: &MockRequest,
    default_content_type: &str,
) -> MockResponse {
    let status = StatusCode::from_u16(handler.status).unwrap_or_else(|_| {
        warn!(handler_id = %handler.id, status = handler.status, "Stored status code is invalid");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut headers = HeaderMap::with_capacity(handler.headers.len() + 1);
    for (name, value) in &handler.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(handler_id = %handler.id, header = %name, "Skipping invalid stored header"),
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        let accept = request.headers.get(ACCEPT).and_then(|v| v.to_str().ok());
        let content_type = negotiate(accept, &handler.body)
            .and_then(|media| HeaderValue::from_str(&media).ok())
            .or_else(|| HeaderValue::from_str(default_content_type).ok());
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, content_type);
        }
    }

    MockResponse {
        status,
        headers,
        body: handler.body.clone(),
    }
}

/// Pick the most preferred structured media type in `accept` that `body`
/// can be served as. Wildcards never select a type.
fn negotiate(accept: Option<&str>, body: &str) -> Option<String> {
    let mut ranges: Vec<(String, f32)> = accept?
        .split(',')
        .filter_map(|range| {
            let mut parts = range.split(';');
            let media = parts.next()?.trim().to_ascii_lowercase();
            let quality = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (!media.is_empty() && quality > 0.0).then_some((media, quality))
        })
        .collect();
    // Stable, so equal weights keep header order.
    ranges.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut json = None;
    let mut xml = None;
    for (media, _) in ranges {
        if is_json_type(&media) && *json.get_or_insert_with(|| is_json(body)) {
            return Some(media);
        }
        if is_xml_type(&media) && *xml.get_or_insert_with(|| is_well_formed_xml(body)) {
            return Some(media);
        }
    }
    None
}

fn is_json_type(media: &str) -> bool {
    media == "application/json" || (media.ends_with("+json") && !media.contains('*'))
}

fn is_xml_type(media: &str) -> bool {
    media == "application/xml"
        || media == "text/xml"
        || (media.ends_with("+xml") && !media.contains('*'))
}

fn is_json(body: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(body).is_ok()
}

/// Non-element markup as (opening, closing) delimiters, most specific first.
const MARKUP: [(&str, &str); 4] = [
    ("<!--", "-->"),
    ("<![CDATA[", "]]>"),
    ("<?", "?>"),
    ("<!", ">"),
];

/// Structural XML check: a single root element with balanced tags, allowing
/// a prolog, comments, processing instructions, CDATA and a DOCTYPE without
/// an internal subset.
fn is_well_formed_xml(body: &str) -> bool {
    let mut rest = body.trim();
    let mut open: Vec<&str> = Vec::new();
    let mut seen_root = false;

    while let Some(start) = rest.find('<') {
        let text = &rest[..start];
        if (open.is_empty() && !text.trim().is_empty()) || !entities_ok(text) {
            return false;
        }
        rest = &rest[start..];

        let mut skipped = false;
        for (begin, end) in MARKUP {
            if let Some(after) = rest.strip_prefix(begin) {
                let Some(i) = after.find(end) else {
                    return false;
                };
                if begin == "<![CDATA[" && open.is_empty() {
                    return false;
                }
                rest = &after[i + end.len()..];
                skipped = true;
                break;
            }
        }
        if skipped {
            continue;
        }

        let Some(end) = tag_end(rest) else {
            return false;
        };
        let tag = &rest[1..end];
        if !entities_ok(tag) {
            return false;
        }
        rest = &rest[end + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            if open.pop() != Some(name.trim()) {
                return false;
            }
            if open.is_empty() {
                seen_root = true;
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("");
        let valid_start = name
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':');
        if !valid_start || (open.is_empty() && seen_root) {
            return false;
        }
        if self_closing {
            if open.is_empty() {
                seen_root = true;
            }
        } else {
            open.push(name);
        }
    }

    seen_root && open.is_empty() && rest.trim().is_empty()
}

/// Index of the `>` closing the tag at the start of `rest`, skipping quoted
/// attribute values.
fn tag_end(rest: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

/// Every `&` starts a named, decimal or hex character reference ending in `;`.
fn entities_ok(text: &str) -> bool {
    text.split('&').skip(1).all(|after| {
        let Some((name, _)) = after.split_once(';') else {
            return false;
        };
        if let Some(hex) = name.strip_prefix("#x") {
            !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
        } else if let Some(digits) = name.strip_prefix('#') {
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        } else {
            name.chars()
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':')
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpMethod;
    use std::collections::BTreeMap;

    const DEFAULT: &str = "text/plain; charset=utf-8";

    fn handler(status: u16, headers: &[(&str, &str)], body: &str) -> ResponseHandler {
        ResponseHandler {
            id: "h".to_string(),
            method: HttpMethod::Get,
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            body: body.to_string(),
            description: String::new(),
            auth_profiles: vec![],
        }
    }

    fn request(accept: Option<&str>) -> MockRequest {
        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert(ACCEPT, HeaderValue::from_str(accept).unwrap());
        }
        MockRequest::new("GET", "/x", headers)
    }

    fn content_type(response: &MockResponse) -> &str {
        response.headers.get(CONTENT_TYPE).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_verbatim_status_headers_body() {
        let h = handler(
            301,
            &[("Location", "https://example.com/new"), ("X-Custom-Header", "value with spaces")],
            "moved",
        );
        let response = materialize(&h, &request(None), DEFAULT);
        assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers["location"], "https://example.com/new");
        assert_eq!(response.headers["x-custom-header"], "value with spaces");
        assert_eq!(response.body, "moved");
    }

    #[test]
    fn test_stored_content_type_wins() {
        let h = handler(200, &[("content-type", "application/json; charset=utf-8")], "<a/>");
        let response = materialize(&h, &request(Some("application/xml")), DEFAULT);
        assert_eq!(content_type(&response), "application/json; charset=utf-8");
        assert_eq!(response.headers.get_all(CONTENT_TYPE).iter().count(), 1);
    }

    #[test]
    fn test_negotiates_json() {
        let h = handler(200, &[], r#"{"key":"value"}"#);
        let response = materialize(&h, &request(Some("application/json")), DEFAULT);
        assert_eq!(content_type(&response), "application/json");
        assert_eq!(response.body, r#"{"key":"value"}"#);
    }

    #[test]
    fn test_negotiates_xml() {
        let h = handler(200, &[], "<?xml version=\"1.0\"?><root><item>value</item></root>");
        let response = materialize(&h, &request(Some("text/html, application/xml;q=0.9")), DEFAULT);
        assert_eq!(content_type(&response), "application/xml");
    }

    #[test]
    fn test_falls_back_when_body_does_not_match() {
        let h = handler(200, &[], "{not json");
        let response = materialize(&h, &request(Some("application/json")), DEFAULT);
        assert_eq!(content_type(&response), DEFAULT);
        assert_eq!(response.body, "{not json");
    }

    #[test]
    fn test_wildcards_and_missing_accept_use_default() {
        let h = handler(200, &[], r#"{"a":1}"#);
        assert_eq!(content_type(&materialize(&h, &request(None), DEFAULT)), DEFAULT);
        assert_eq!(
            content_type(&materialize(&h, &request(Some("*/*")), DEFAULT)),
            DEFAULT
        );
    }

    #[test]
    fn test_preference_order() {
        // Body is both valid JSON and not XML; XML is preferred but impossible.
        assert_eq!(
            negotiate(Some("application/xml, application/json;q=0.5"), "[1,2]"),
            Some("application/json".to_string())
        );
        assert_eq!(
            negotiate(Some("application/json;q=0, application/xml"), "[1,2]"),
            None
        );
        assert_eq!(
            negotiate(Some("application/problem+json"), r#"{"title":"x"}"#),
            Some("application/problem+json".to_string())
        );
    }

    #[test]
    fn test_xml_check() {
        assert!(is_well_formed_xml("<root/>"));
        assert!(is_well_formed_xml("<root><item a=\"1\">value</item><!-- c --></root>"));
        assert!(is_well_formed_xml("<!DOCTYPE note><note><![CDATA[<x>]]></note>"));
        assert!(!is_well_formed_xml("<root><item></root>"));
        assert!(!is_well_formed_xml("<a></a><b></b>"));
        assert!(!is_well_formed_xml("text <a></a>"));
        assert!(!is_well_formed_xml(r#"{"a":1}"#));
        assert!(!is_well_formed_xml(""));
    }

    #[test]
    fn test_xml_quoted_attributes_and_entities() {
        assert!(is_well_formed_xml(r#"<a href="x>y"></a>"#));
        assert!(is_well_formed_xml("<a title='1 > 0'>ok</a>"));
        assert!(is_well_formed_xml("<a q=\"&quot;\">Tom &amp; Jerry &#38; &#x26;</a>"));
        assert!(!is_well_formed_xml("<a>Tom & Jerry</a>"));
        assert!(!is_well_formed_xml("<a>&#xZZ;</a>"));
        assert!(!is_well_formed_xml(r#"<a href="x>y></a>"#));
    }

    #[test]
    fn test_empty_body() {
        let h = handler(204, &[], "");
        let response = materialize(&h, &request(Some("application/json")), DEFAULT);
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.body.is_empty());
        assert_eq!(content_type(&response), DEFAULT);
    }
}
