//! Filename and infobar template evaluation.
//!
//! Substitutes a fixed vocabulary of `{placeholder}` variables. Every
//! value is produced by a lazy getter: a placeholder that does not occur
//! in the template never triggers its computation — which matters for the
//! digest variables, whose value hashes the whole serialized page.

use chrono::{Datelike, Local, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use sha2::{Digest, Sha256, Sha384, Sha512};
use url::Url;

static SLASH_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/+").unwrap());

/// Document metadata extracted during finalization.
#[derive(Debug, Clone, Default)]
pub struct DocMeta {
    pub description: String,
    pub lang: String,
    pub author: String,
    pub creator: String,
    pub publisher: String,
}

/// Inputs available to template evaluation.
pub struct TemplateContext<'a> {
    pub title: &'a str,
    pub meta: &'a DocMeta,
    pub url: &'a str,
    /// Serialized page content; enables the digest variables.
    pub content: Option<&'a str>,
    /// Keep `/` in substituted values (infobar); filenames collapse them.
    pub keep_slashes: bool,
}

/// Evaluate one template against the context. Unknown placeholders are
/// left unexpanded.
pub fn eval_template(template: &str, context: &TemplateContext<'_>) -> String {
    let now_local = Local::now();
    let now_utc = Utc::now();
    let parsed_url = Url::parse(context.url).ok();
    let keep = context.keep_slashes;

    let mut output = template.to_string();
    output = subst(output, "page-title", keep, || {
        fallback(context.title, "No title")
    });
    output = subst(output, "page-language", keep, || {
        fallback(&context.meta.lang, "No language")
    });
    output = subst(output, "page-description", keep, || {
        fallback(&context.meta.description, "No description")
    });
    output = subst(output, "page-author", keep, || {
        fallback(&context.meta.author, "No author")
    });
    output = subst(output, "page-creator", keep, || {
        fallback(&context.meta.creator, "No creator")
    });
    output = subst(output, "page-publisher", keep, || {
        fallback(&context.meta.publisher, "No publisher")
    });

    output = subst(output, "datetime-iso", keep, || {
        now_utc.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    });
    output = subst(output, "date-iso", keep, || now_utc.format("%Y-%m-%d").to_string());
    output = subst(output, "time-iso", keep, || now_utc.format("%H:%M:%S%.3f").to_string());
    output = subst(output, "date-locale", keep, || now_local.format("%Y-%m-%d").to_string());
    output = subst(output, "time-locale", keep, || now_local.format("%H-%M-%S").to_string());
    output = subst(output, "datetime-locale", keep, || {
        now_local.format("%Y-%m-%d %H:%M:%S").to_string()
    });
    output = subst(output, "datetime-utc", keep, || now_utc.to_rfc2822());
    output = subst(output, "day-locale", keep, || format!("{:02}", now_local.day()));
    output = subst(output, "month-locale", keep, || format!("{:02}", now_local.month()));
    output = subst(output, "year-locale", keep, || now_local.year().to_string());
    output = subst(output, "hours-locale", keep, || format!("{:02}", now_local.hour()));
    output = subst(output, "minutes-locale", keep, || format!("{:02}", now_local.minute()));
    output = subst(output, "seconds-locale", keep, || format!("{:02}", now_local.second()));
    output = subst(output, "day-utc", keep, || format!("{:02}", now_utc.day()));
    output = subst(output, "month-utc", keep, || format!("{:02}", now_utc.month()));
    output = subst(output, "year-utc", keep, || now_utc.year().to_string());
    output = subst(output, "hours-utc", keep, || format!("{:02}", now_utc.hour()));
    output = subst(output, "minutes-utc", keep, || format!("{:02}", now_utc.minute()));
    output = subst(output, "seconds-utc", keep, || format!("{:02}", now_utc.second()));

    output = subst(output, "url-hash", keep, || {
        url_part(&parsed_url, "No hash", |url| {
            url.fragment().unwrap_or_default().to_string()
        })
    });
    output = subst(output, "url-host", keep, || {
        url_part(&parsed_url, "No host", |url| {
            match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                _ => String::new(),
            }
        })
    });
    output = subst(output, "url-hostname", keep, || {
        url_part(&parsed_url, "No hostname", |url| {
            url.host_str().unwrap_or_default().to_string()
        })
    });
    output = subst(output, "url-href", keep, || {
        url_part(&parsed_url, "No href", |url| url.to_string())
    });
    output = subst(output, "url-password", keep, || {
        url_part(&parsed_url, "No password", |url| {
            url.password().unwrap_or_default().to_string()
        })
    });
    // Pathname keeps its slashes in every mode; filename sanitization
    // deals with them afterwards.
    output = subst(output, "url-pathname", true, || {
        url_part(&parsed_url, "No pathname", |url| {
            url.path().trim_matches('/').to_string()
        })
    });
    output = subst(output, "url-port", keep, || {
        url_part(&parsed_url, "No port", |url| {
            url.port().map(|port| port.to_string()).unwrap_or_default()
        })
    });
    output = subst(output, "url-protocol", keep, || {
        url_part(&parsed_url, "No protocol", |url| format!("{}:", url.scheme()))
    });
    output = subst(output, "url-search", keep, || {
        url_part(&parsed_url, "No search", |url| {
            url.query().unwrap_or_default().to_string()
        })
    });
    output = subst(output, "url-username", keep, || {
        url_part(&parsed_url, "No username", |url| url.username().to_string())
    });
    output = subst(output, "url-last-segment", keep, || {
        url_part(&parsed_url, "No last segment", last_segment)
    });

    if let Some(content) = context.content {
        output = subst(output, "digest-sha-256", keep, || {
            hex::encode(Sha256::digest(content.as_bytes()))
        });
        output = subst(output, "digest-sha-384", keep, || {
            hex::encode(Sha384::digest(content.as_bytes()))
        });
        output = subst(output, "digest-sha-512", keep, || {
            hex::encode(Sha512::digest(content.as_bytes()))
        });
    }

    output
}

fn subst<F: FnOnce() -> String>(
    template: String,
    name: &str,
    keep_slashes: bool,
    getter: F,
) -> String {
    let Ok(pattern) = Regex::new(&format!(r"\{{\s*{}\s*\}}", regex::escape(name))) else {
        return template;
    };
    if !pattern.is_match(&template) {
        return template;
    }
    let mut value = getter();
    if !keep_slashes {
        value = SLASH_RUN.replace_all(&value, "_").into_owned();
    }
    pattern.replace_all(&template, NoExpand(&value)).into_owned()
}

fn fallback(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.trim().to_string()
    }
}

fn url_part<F: Fn(&Url) -> String>(url: &Option<Url>, default: &str, extract: F) -> String {
    let value = url.as_ref().map(&extract).unwrap_or_default();
    fallback(&value, default)
}

fn last_segment(url: &Url) -> String {
    if let Some(segment) = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
    {
        return segment.to_string();
    }
    url.host_str().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn context<'a>(meta: &'a DocMeta, content: Option<&'a str>) -> TemplateContext<'a> {
        TemplateContext {
            title: "Example Page",
            meta,
            url: "https://user@example.com:8080/docs/page.html?q=1#top",
            content,
            keep_slashes: false,
        }
    }

    #[test]
    fn title_and_url_variables() {
        let meta = DocMeta::default();
        let evaluated = eval_template("{page-title} - {url-hostname}", &context(&meta, None));
        assert_eq!(evaluated, "Example Page - example.com");
    }

    #[test]
    fn host_includes_port() {
        let meta = DocMeta::default();
        assert_eq!(
            eval_template("{url-host}", &context(&meta, None)),
            "example.com:8080"
        );
        assert_eq!(
            eval_template("{url-last-segment}", &context(&meta, None)),
            "page.html"
        );
    }

    #[test]
    fn absent_placeholder_never_computes() {
        let touched = Cell::new(false);
        let evaluated = subst("static text".to_string(), "page-title", true, || {
            touched.set(true);
            "ignored".to_string()
        });
        assert_eq!(evaluated, "static text");
        assert!(!touched.get());
    }

    #[test]
    fn missing_values_fall_back() {
        let meta = DocMeta::default();
        let evaluated = eval_template("{page-author}", &context(&meta, None));
        assert_eq!(evaluated, "No author");
    }

    #[test]
    fn digest_requires_content() {
        let meta = DocMeta::default();
        let with_content = eval_template("{digest-sha-256}", &context(&meta, Some("abc")));
        assert_eq!(
            with_content,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let without = eval_template("{digest-sha-256}", &context(&meta, None));
        assert_eq!(without, "{digest-sha-256}");
    }

    #[test]
    fn slashes_collapse_in_filename_mode() {
        let meta = DocMeta {
            description: "a/b//c".to_string(),
            ..DocMeta::default()
        };
        let evaluated = eval_template("{page-description}", &context(&meta, None));
        assert_eq!(evaluated, "a_b_c");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let meta = DocMeta::default();
        let evaluated = eval_template("{ page-title }", &context(&meta, None));
        assert_eq!(evaluated, "Example Page");
    }
}
