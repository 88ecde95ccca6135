//! Request path canonicalization.

/// Canonicalize a raw request path into a registry key.
///
/// Empty segments are dropped, so leading, trailing and repeated slashes
/// all collapse. The root path becomes the empty string.
pub fn normalize(raw: &str) -> String {
    raw.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip a serving prefix (itself normalized) from an already normalized path.
///
/// Returns `None` when the path lies outside the prefix.
pub fn strip_prefix<'a>(normalized: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(normalized);
    }
    match normalized.strip_prefix(prefix) {
        Some("") => Some(""),
        Some(rest) => rest.strip_prefix('/'),
        None => None,
    }
}
