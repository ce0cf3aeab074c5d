//! Finalization and serialization.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Processor;
use crate::capture::PageData;
use crate::dom;
use crate::helper::{DocMeta, TemplateContext, eval_template};
use crate::stats::{ResourceCategory, Tally};
use crate::utils::constants::SESSION_ATTRIBUTE_PREFIX;

static FILENAME_UNSAFE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[~\\\\?%*:|\"<>\\x00-\\x1f\\x7f]+").unwrap());
static SLASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("/+").unwrap());
static TRAILING_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\.[^.]{3,4})$").unwrap());

/// Longest filename emitted, extension included.
const MAX_FILENAME_LENGTH: usize = 192;

impl Processor {
    /// Compute page metadata and the infobar text, and normalize the
    /// document head: charset meta first, `<base>` removed.
    pub(crate) fn finalize(&self) {
        let Some(doc) = self.doc() else { return };
        if let Some(head) = dom::head(&doc) {
            if let Some(meta) = dom::select_first(&head, "meta[charset]") {
                let node = meta.as_node().clone();
                node.detach();
                match head.first_child() {
                    Some(first) => first.insert_before(node),
                    None => head.append(node),
                }
            }
        }
        for base in dom::select_all(&doc, "base") {
            base.as_node().detach();
        }

        let title = dom::select_first(&doc, "title")
            .map(|element| element.as_node().text_contents().trim().to_string())
            .unwrap_or_default();
        *self.inner.title.borrow_mut() = title;

        let meta = DocMeta {
            description: meta_content(&doc, "description"),
            lang: dom::select_first(&doc, "html")
                .and_then(|html| html.attributes.borrow().get("lang").map(str::to_string))
                .unwrap_or_default(),
            author: meta_content(&doc, "author"),
            creator: meta_content(&doc, "creator"),
            publisher: meta_content(&doc, "publisher"),
        };
        let infobar = eval_template(
            &self.options().infobar_template,
            &TemplateContext {
                title: &self.inner.title.borrow(),
                meta: &meta,
                url: &self.options().url,
                content: None,
                keep_slashes: true,
            },
        );
        *self.inner.infobar_content.borrow_mut() = infobar;
        *self.inner.doc_meta.borrow_mut() = meta;
    }

    /// Serialize the finished document into its final [`PageData`]:
    /// helper attributes stripped, provenance comment inserted, filename
    /// template evaluated and sanitized, byte statistics accounted.
    pub(crate) fn page_data(&self) -> anyhow::Result<PageData> {
        let doc = self
            .doc()
            .ok_or_else(|| anyhow::anyhow!("document was never loaded"))?;
        dom::remove_attributes_with_prefix(&doc, SESSION_ATTRIBUTE_PREFIX);

        if self.options().insert_provenance_comment {
            let infobar = self.inner.infobar_content.borrow();
            let mut text = format!(
                "\n Page saved with snapdoc \n url: {} \n saved date: {} \n",
                self.options().url,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z"),
            );
            if !infobar.is_empty() {
                text = format!("{} info: {}\n", text.trim_end_matches('\n'), infobar);
            }
            if let Some(html) = dom::select_first(&doc, "html") {
                let comment = kuchiki::NodeRef::new_comment(text);
                match html.as_node().first_child() {
                    Some(first) => first.insert_before(comment),
                    None => html.as_node().append(comment),
                }
            }
        }

        let content = dom::serialize(&doc);
        self.inner.stats.borrow_mut().set(
            Tally::Processed,
            ResourceCategory::HtmlBytes,
            content.len() as u64,
        );

        let title = self.inner.title.borrow().clone();
        let meta = self.inner.doc_meta.borrow().clone();
        let filename = eval_template(
            &self.options().filename_template,
            &TemplateContext {
                title: &title,
                meta: &meta,
                url: &self.options().url,
                content: Some(&content),
                keep_slashes: false,
            },
        );
        let filename = sanitize_filename(&filename);

        let title = if title.is_empty() { fallback_title(&self.inner.base_uri) } else { title };
        Ok(PageData {
            stats: self.inner.stats.borrow().snapshot(),
            title,
            filename,
            content,
        })
    }
}

fn meta_content(doc: &kuchiki::NodeRef, name: &str) -> String {
    dom::select_first(doc, &format!("meta[name=\"{name}\"]"))
        .and_then(|meta| meta.attributes.borrow().get("content").map(|content| content.trim().to_string()))
        .unwrap_or_default()
}

/// Strip filesystem-unsafe characters and path escapes, and cap the
/// length at 192 characters while preserving a short trailing extension.
fn sanitize_filename(filename: &str) -> String {
    let mut filename = FILENAME_UNSAFE.replace_all(filename, "_").into_owned();
    filename = filename.replace("../", "");
    filename = SLASH_RUNS.replace_all(&filename, "/").into_owned();
    let mut filename = filename.trim_matches('/').to_string();

    if filename.chars().count() > MAX_FILENAME_LENGTH {
        let extension = TRAILING_EXTENSION
            .captures(&filename)
            .and_then(|captures| captures.get(1))
            .map(|group| group.as_str().to_string())
            .unwrap_or_default();
        let keep = MAX_FILENAME_LENGTH.saturating_sub(extension.chars().count());
        let truncated: String = filename.chars().take(keep).collect();
        filename = format!("{truncated}…{extension}");
    }
    if filename.is_empty() {
        filename = "Unnamed page".to_string();
    }
    filename
}

/// Title fallback when the document has none: the base URI's last path
/// segment stem, else its hostname.
fn fallback_title(base_uri: &str) -> String {
    let Ok(url) = url::Url::parse(base_uri) else {
        return String::new();
    };
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last());
    if let Some(segment) = segment {
        let lowered = segment.to_lowercase();
        if lowered.ends_with(".html") || lowered.ends_with(".htm") {
            if let Some(stem) = segment.rsplit_once('.').map(|(stem, _)| stem) {
                return stem.to_string();
            }
        }
        return segment.to_string();
    }
    url.host_str().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_characters_become_underscores() {
        assert_eq!(sanitize_filename("a:b|c<d>.html"), "a_b_c_d_.html");
    }

    #[test]
    fn parent_escapes_are_removed() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc/passwd");
    }

    #[test]
    fn long_names_keep_their_extension() {
        let long = format!("{}.html", "x".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.chars().count() <= MAX_FILENAME_LENGTH + 1);
        assert!(sanitized.ends_with("….html"));
    }

    #[test]
    fn empty_names_fall_back() {
        assert_eq!(sanitize_filename(""), "Unnamed page");
    }

    #[test]
    fn title_falls_back_to_page_stem_then_host() {
        assert_eq!(fallback_title("http://x/docs/page.html"), "page");
        assert_eq!(fallback_title("http://x/docs/guide"), "guide");
        assert_eq!(fallback_title("http://example.com/"), "example.com");
    }
}
