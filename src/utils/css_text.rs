//! Textual CSS scanning helpers.
//!
//! These operate on raw stylesheet text before it is parsed into a syntax
//! tree: extracting `url()` occurrences and `@import` statements with
//! quoted or unquoted arguments, stripping comments, and the whitespace
//! compression applied when CSS compression is enabled.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(url\s*\(\s*'(.*?)'\s*\))|(url\s*\(\s*"(.*?)"\s*\))|(url\s*\(\s*(.*?)\s*\))"#)
        .unwrap()
});
static URL_SIMPLE_QUOTES_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^url\s*\(\s*'(.*?)'\s*\)$").unwrap());
static URL_DOUBLE_QUOTES_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)^url\s*\(\s*"(.*?)"\s*\)$"#).unwrap());
static URL_NO_QUOTES_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^url\s*\(\s*(.*?)\s*\)$").unwrap());

static IMPORT_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?i)(@import\s*url\s*\(\s*'(.*?)'\s*\)\s*(.*?)(;|$|\}))"#,
        r#"|(@import\s*url\s*\(\s*"(.*?)"\s*\)\s*(.*?)(;|$|\}))"#,
        r#"|(@import\s*url\s*\(\s*(.*?)\s*\)\s*(.*?)(;|$|\}))"#,
        r#"|(@import\s*'(.*?)'\s*(.*?)(;|$|\}))"#,
        r#"|(@import\s*"(.*?)"\s*(.*?)(;|$|\}))"#,
        r#"|(@import\s*(.*?)\s*(.*?)(;|$|\}))"#,
    ))
    .unwrap()
});
static IMPORT_VARIANTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)@import\s*url\s*\(\s*'(.*?)'\s*\)\s*(.*?)(;|$|\})"#,
        r#"(?i)@import\s*url\s*\(\s*"(.*?)"\s*\)\s*(.*?)(;|$|\})"#,
        r#"(?i)@import\s*url\s*\(\s*(.*?)\s*\)\s*(.*?)(;|$|\})"#,
        r#"(?i)@import\s*'(.*?)'\s*(.*?)(;|$|\})"#,
        r#"(?i)@import\s*"(.*?)"\s*(.*?)(;|$|\})"#,
        r#"(?i)@import\s*(.*?)\s*(.*?)(;|$|\})"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Every distinct `url(...)` occurrence in the text, in first-seen order.
pub fn get_url_functions(stylesheet: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for found in URL_FN.find_iter(stylesheet) {
        let occurrence = found.as_str().to_string();
        if !seen.contains(&occurrence) {
            seen.push(occurrence);
        }
    }
    seen
}

/// Every `@import` statement in the text, in document order.
pub fn get_import_statements(stylesheet: &str) -> Vec<String> {
    IMPORT_FN
        .find_iter(stylesheet)
        .map(|found| found.as_str().to_string())
        .collect()
}

/// The URL argument of one `url(...)` occurrence.
pub fn match_url_argument(url_function: &str) -> Option<String> {
    for pattern in [&*URL_SIMPLE_QUOTES_FN, &*URL_DOUBLE_QUOTES_FN, &*URL_NO_QUOTES_FN] {
        if let Some(captures) = pattern.captures(url_function) {
            return captures.get(1).map(|group| group.as_str().to_string());
        }
    }
    None
}

/// The URL and trailing media query of one `@import` statement.
pub fn match_import(import_statement: &str) -> Option<(String, String)> {
    for pattern in IMPORT_VARIANTS.iter() {
        if let Some(captures) = pattern.captures(import_statement) {
            let url = captures.get(1).map(|group| group.as_str().to_string())?;
            let media = captures
                .get(2)
                .map(|group| group.as_str().trim().to_string())
                .unwrap_or_default();
            return Some((url, media));
        }
    }
    None
}

/// Strip `/* ... */` comments. Unterminated comments are left in place.
pub fn remove_css_comments(stylesheet: &str) -> String {
    let mut output = stylesheet.to_string();
    loop {
        let Some(start) = output.find("/*") else {
            return output;
        };
        let Some(end_offset) = output[start + 2..].find("*/") else {
            return output;
        };
        output.replace_range(start..start + 2 + end_offset + 2, "");
    }
}

/// Comment removal plus whitespace-run collapsing; applied to stylesheet
/// and style-attribute text when CSS compression is enabled.
pub fn compress_css(stylesheet: &str) -> String {
    let stripped = remove_css_comments(stylesheet);
    WHITESPACE_RUN.replace_all(stripped.trim(), " ").into_owned()
}

/// Wrap stylesheet text in a `@media` block when the import carried a
/// media query.
pub fn wrap_media_query(stylesheet: &str, media: &str) -> String {
    if media.is_empty() {
        stylesheet.to_string()
    } else {
        format!("@media {media}{{ {stylesheet} }}")
    }
}

/// One candidate of a `srcset` attribute: the URL plus its optional
/// width/density descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcsetCandidate {
    pub url: String,
    pub descriptor: Option<String>,
}

/// Parse a comma-separated `srcset` candidate list, preserving descriptors.
pub fn parse_srcset(srcset: &str) -> Vec<SrcsetCandidate> {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?.to_string();
            let descriptor = {
                let rest = parts.collect::<Vec<_>>().join(" ");
                if rest.is_empty() { None } else { Some(rest) }
            };
            Some(SrcsetCandidate { url, descriptor })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_function_extraction_dedupes() {
        let sheet = "a{background:url('x.png')} b{background:url('x.png')} c{background:url(\"y.png\")}";
        let found = get_url_functions(sheet);
        assert_eq!(found.len(), 2);
        assert_eq!(match_url_argument(&found[0]).as_deref(), Some("x.png"));
        assert_eq!(match_url_argument(&found[1]).as_deref(), Some("y.png"));
    }

    #[test]
    fn unquoted_url_argument() {
        assert_eq!(
            match_url_argument("url( icon.png )").as_deref(),
            Some("icon.png")
        );
    }

    #[test]
    fn import_with_media_query() {
        let sheet = "@import url('print.css') print;\nbody{color:red}";
        let imports = get_import_statements(sheet);
        assert_eq!(imports.len(), 1);
        let (url, media) = match_import(&imports[0]).unwrap();
        assert_eq!(url, "print.css");
        assert_eq!(media, "print");
    }

    #[test]
    fn bare_string_import() {
        let (url, media) = match_import("@import \"theme.css\";").unwrap();
        assert_eq!(url, "theme.css");
        assert!(media.is_empty());
    }

    #[test]
    fn comment_removal() {
        assert_eq!(remove_css_comments("a{/* hidden */color:red}"), "a{color:red}");
        assert_eq!(compress_css("a {\n  color : red ;\n}"), "a { color : red ; }");
    }

    #[test]
    fn srcset_candidates() {
        let candidates = parse_srcset("a.png 1x, b.png 2x, c.png");
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].url, "a.png");
        assert_eq!(candidates[0].descriptor.as_deref(), Some("1x"));
        assert_eq!(candidates[2].descriptor, None);
    }

    #[test]
    fn media_wrapping() {
        assert_eq!(wrap_media_query("body{}", ""), "body{}");
        assert_eq!(wrap_media_query("body{}", "print"), "@media print{ body{} }");
    }
}
