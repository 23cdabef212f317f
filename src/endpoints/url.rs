//! URL string helpers shared by the directory and the config fetcher.

use std::collections::BTreeMap;
use url::Url;

/// Placeholder for the scheme inside host and image templates.
pub const SCHEME_PLACEHOLDER: &str = "{0}";

/// Ensure `s` ends with exactly one `/`. Empty input yields `/`.
pub fn trailing_slash(s: &str) -> String {
    if s.is_empty() {
        return "/".to_string();
    }
    format!("{}/", s.trim_end_matches('/'))
}

/// Join segments with single-slash normalization. Empty segments are
/// skipped; the result keeps a trailing slash only if the last non-empty
/// segment had one.
pub fn join_url(segments: &[&str]) -> String {
    let parts: Vec<&str> = segments.iter().copied().filter(|s| !s.is_empty()).collect();
    let mut out = String::new();

    for (i, part) in parts.iter().enumerate() {
        let is_last = i + 1 == parts.len();
        let mut piece = *part;
        if i > 0 {
            piece = piece.trim_start_matches('/');
        }
        if !is_last {
            piece = piece.trim_end_matches('/');
        }
        if i > 0 && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(piece);
    }

    out
}

/// Substitute the scheme placeholder in a template.
pub fn expand_scheme(template: &str, scheme: &str) -> String {
    template.replace(SCHEME_PLACEHOLDER, scheme)
}

/// `host[:port]` of a URL string, if it parses and has a host.
pub fn authority(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Path plus query of a URL, e.g. `/videos/v1/index?lastId=3`.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

/// Build `?k=v&k2=v2` with keys in sorted order and pairs
/// form-urlencoded. Empty input yields "".
pub fn query_string(params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return String::new();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("?{encoded}")
}
