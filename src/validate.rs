//! Input validation for pull references and repository URLs.
//!
//! References are checked against a restrictive character allow-list before
//! any backend contact; repository URLs are normalized to their index
//! document. Scheme checking happens at the call site where the URL is
//! parsed anyway.

/// Returns true when `reference` looks like an image or chart reference.
///
/// Accepts letters, digits, slash, dot, colon, `@`, underscore, and dash.
/// Anything else, including the empty string, is rejected.
pub fn valid_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference.bytes().all(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b'.' | b'/' | b':' | b'@' | b'_' | b'-')
        })
}

/// Normalize a Helm repository URL to its index document.
///
/// URLs already ending in `/index.yaml` or `/index.yml` pass through
/// unchanged; otherwise a single trailing slash is stripped and
/// `/index.yaml` appended.
pub fn normalize_index_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with("/index.yaml") || trimmed.ends_with("/index.yml") {
        return trimmed.to_string();
    }
    format!("{}/index.yaml", trimmed.strip_suffix('/').unwrap_or(trimmed))
}
