//! Stateless helpers shared across the snapshot pipeline.
//!
//! URL normalization and validity predicates, textual CSS scanning
//! (`url()` / `@import` extraction), and the session-scoped attribute
//! names used to associate side-channel capture data with elements.

pub mod constants;
pub mod css_text;
pub mod url_utils;

pub use constants::{CSS_VARIABLE_PREFIX, EMPTY_DATA_URI, EMPTY_IMAGE};
pub use css_text::{
    SrcsetCandidate, compress_css, get_import_statements, get_url_functions, match_import,
    match_url_argument, parse_srcset, remove_css_comments, wrap_media_query,
};
pub use url_utils::{is_fetchable_url, is_ignored_path, is_valid_path, normalize_url, resolve_url};
