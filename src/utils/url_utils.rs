//! URL normalization and validity predicates.
//!
//! Every resource reference flows through these checks before it is
//! resolved or fetched: data/blob/about URIs are never fetched, references
//! back to the document itself are skipped, and only http/https/file/blob
//! schemes are eligible for retrieval.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

const DATA_URI_PREFIX: &str = "data:";
const BLOB_URI_PREFIX: &str = "blob:";
const ABOUT_BLANK_URI: &str = "about:blank";

static HTTP_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").unwrap());
static FILE_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^file://").unwrap());
static EMPTY_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://+\s*$").unwrap());
static NOT_EMPTY_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?://|file://|blob:).+").unwrap());

/// Strip the fragment from a URL. Data URIs pass through untouched since
/// `#` is payload there, not a fragment delimiter worth honoring.
pub fn normalize_url(url: &str) -> String {
    if url.is_empty() || url.starts_with(DATA_URI_PREFIX) {
        url.to_string()
    } else {
        url.split('#').next().unwrap_or_default().to_string()
    }
}

/// Paths that are already inline or intentionally blank and must never be
/// registered for retrieval.
pub fn is_ignored_path(url: &str) -> bool {
    !url.is_empty() && (url.starts_with(DATA_URI_PREFIX) || url == ABOUT_BLANK_URI)
}

/// A reference is a candidate for resolution only when it is non-empty and
/// distinct from both the document URL and its base URI.
pub fn is_valid_path(url: &str, base_uri: &str, doc_url: &str) -> bool {
    !url.is_empty() && url != base_uri && url != doc_url && !EMPTY_URL.is_match(url)
}

/// A resolved reference is fetchable when it is a distinct, non-empty
/// http/https/file/blob URL.
pub fn is_fetchable_url(url: &str, base_uri: &str, doc_url: &str) -> bool {
    is_valid_path(url, base_uri, doc_url)
        && (HTTP_URI.is_match(url) || FILE_URI.is_match(url) || url.starts_with(BLOB_URI_PREFIX))
        && NOT_EMPTY_URL.is_match(url)
}

/// Resolve a potentially relative reference against a base URL.
///
/// Uses the `url` crate's join semantics; `None` when the base itself does
/// not parse or the reference cannot be joined.
pub fn resolve_url(reference: &str, base_uri: &str) -> Option<String> {
    let base = Url::parse(base_uri).ok()?;
    base.join(reference).ok().map(|resolved| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragments_but_not_data_uris() {
        assert_eq!(normalize_url("http://x/a.png#frag"), "http://x/a.png");
        assert_eq!(normalize_url("data:image/png;base64,AB#CD"), "data:image/png;base64,AB#CD");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn ignored_paths() {
        assert!(is_ignored_path("data:image/png;base64,AAA"));
        assert!(is_ignored_path("about:blank"));
        assert!(!is_ignored_path("http://x/a.png"));
        assert!(!is_ignored_path(""));
    }

    #[test]
    fn fetchable_urls() {
        let base = "http://x/";
        assert!(is_fetchable_url("http://x/a.png", base, base));
        assert!(is_fetchable_url("file:///tmp/a.png", base, base));
        assert!(!is_fetchable_url("http://x/", base, base));
        assert!(!is_fetchable_url("javascript:void(0)", base, base));
        assert!(!is_fetchable_url("https://", base, base));
    }

    #[test]
    fn relative_resolution() {
        assert_eq!(
            resolve_url("../styles/main.css", "https://example.com/path/page.html"),
            Some("https://example.com/styles/main.css".to_string())
        );
        assert_eq!(
            resolve_url("icon.png", "http://x/"),
            Some("http://x/icon.png".to_string())
        );
    }
}
