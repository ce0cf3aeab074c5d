//! Resource resolution algorithms.
//!
//! These locate, resolve and inline resource references wherever they can
//! occur: element attributes, `srcset` candidate lists, SVG cross
//! references, and CSS syntax trees. Each algorithm degrades a single
//! failing reference to a placeholder instead of aborting the task that
//! invoked it.
//!
//! Every function here follows the same shape: a synchronous pass that
//! walks the document or syntax tree and registers each reference with the
//! shared [`BatchRequest`], then an asynchronous pass that awaits the
//! resolutions and applies them. Registration before suspension is what
//! lets the whole document tree share one deduplicated batch.

pub mod template;

pub use template::{DocMeta, TemplateContext, eval_template};

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use base64::Engine;
use kuchiki::{ElementData, NodeDataRef};

use crate::batch_request::{BatchRequest, ResourceTicket};
use crate::capture::data::ImageMeta;
use crate::config::CaptureOptions;
use crate::css::{Declaration, NodeSeq, Rule, Stylesheet, TokenLoc, ValueToken};
use crate::dom;
use crate::fetch::{FetchOptions, ResourceFetcher};
use crate::utils::constants::{image_index_attribute, style_index_attribute};
use crate::utils::{
    CSS_VARIABLE_PREFIX, EMPTY_DATA_URI, EMPTY_IMAGE, compress_css, get_import_statements,
    get_url_functions, is_fetchable_url, is_ignored_path, is_valid_path, match_import,
    match_url_argument, normalize_url, parse_srcset, remove_css_comments, resolve_url,
    wrap_media_query,
};

const PREFIX_DATA_URI_IMAGE_SVG: &str = "data:image/svg+xml";
const PREFIX_DATA_URI_NO_MIMETYPE: &str = "data:;";
const PREFIX_DATA_URI_VND: &str = "data:application/vnd.";

/// Depth cap for recursive `@import` substitution. A circular import chain
/// stops here, leaving the raw `@import` text in place.
const MAX_IMPORT_DEPTH: usize = 8;

/// Shared mutable tables the inlining algorithms write into: the CSS
/// custom-property table for de-duplicated images and the per-element
/// parsed `style` attribute map.
pub struct ResourceMaps<'a> {
    pub css_variables: &'a RefCell<BTreeMap<usize, String>>,
    pub styles: &'a RefCell<BTreeMap<usize, NodeSeq<Declaration>>>,
    pub next_style_index: &'a Cell<usize>,
}

// ---------------------------------------------------------------------------
// Textual CSS resolution
// ---------------------------------------------------------------------------

/// Absolutize every `url()` occurrence in stylesheet text. Unresolvable
/// references degrade to an empty data URI; embedded data URIs get their
/// markup-significant characters escaped.
pub fn resolve_css_urls_text(content: &str, base_uri: &str, doc_url: &str) -> String {
    let mut content = content.to_string();
    for url_function in get_url_functions(&content) {
        let original = match_url_argument(&url_function).unwrap_or_default();
        let resource_url = normalize_url(&original);
        if is_ignored_path(&resource_url) {
            if resource_url.starts_with("data:") {
                let escaped = resource_url
                    .replace('&', "&amp;")
                    .replace('\u{a0}', "&nbsp;")
                    .replace('<', "&lt;")
                    .replace('>', "&gt;");
                if escaped != resource_url {
                    let replacement = url_function.replace(&original, &escaped);
                    content = content.replace(&url_function, &replacement);
                }
            }
            continue;
        }
        if resource_url.is_empty() || is_valid_path(&resource_url, base_uri, doc_url) {
            let Some(resolved) = resolve_url(&resource_url, base_uri) else {
                continue;
            };
            if is_fetchable_url(&resolved, base_uri, doc_url) && resource_url != resolved {
                let replacement = url_function.replace(&original, &resolved);
                content = content.replace(&url_function, &replacement);
            }
        } else {
            let replacement = if original.is_empty() {
                format!("url({EMPTY_DATA_URI})")
            } else {
                url_function.replace(&original, EMPTY_DATA_URI)
            };
            content = content.replace(&url_function, &replacement);
        }
    }
    content
}

/// Recursively substitute `@import` statements with the imported sheet's
/// text, wrapped in the import's media query when present.
pub fn resolve_import_urls(
    fetcher: Rc<dyn ResourceFetcher>,
    content: String,
    base_uri: String,
    options: CaptureOptions,
    depth: usize,
) -> futures::future::LocalBoxFuture<'static, String> {
    Box::pin(async move {
        let mut content = resolve_css_urls_text(&content, &base_uri, &options.url);
        if depth >= MAX_IMPORT_DEPTH {
            return content;
        }
        for import_statement in get_import_statements(&content) {
            let Some((import_url, media)) = match_import(&import_statement) else {
                continue;
            };
            let resource_url = normalize_url(&import_url);
            if is_ignored_path(&resource_url)
                || !is_valid_path(&resource_url, &base_uri, &options.url)
            {
                continue;
            }
            let resolved =
                resolve_url(&import_url, &base_uri).unwrap_or_else(|| resource_url.clone());
            if !is_fetchable_url(&resolved, &base_uri, &options.url) {
                continue;
            }
            let fetch_options = FetchOptions {
                as_data_uri: false,
                max_size: options.max_resource_size,
                max_size_enabled: options.max_resource_size_enabled,
                charset: None,
            };
            let Ok(fetched) = fetcher.fetch(&resolved, &fetch_options).await else {
                continue;
            };
            let mut imported = remove_css_comments(&fetched.data);
            if options.compress_css {
                imported = compress_css(&imported);
            }
            imported = wrap_media_query(&imported, &media);
            if content.contains(&import_statement) {
                imported = resolve_import_urls(
                    Rc::clone(&fetcher),
                    imported,
                    fetched.resource_url,
                    options.clone(),
                    depth + 1,
                )
                .await;
                content = content.replace(&import_statement, &imported);
            }
        }
        content
    })
}

/// Retrieve an external stylesheet and resolve its imports. `None` when
/// the reference points back at the document or at nothing.
pub async fn resolve_link_stylesheet(
    fetcher: &Rc<dyn ResourceFetcher>,
    href: &str,
    base_uri: &str,
    charset: Option<String>,
    options: &CaptureOptions,
) -> Option<String> {
    let resource_url = normalize_url(href);
    if resource_url.is_empty() || resource_url == base_uri || resource_url == "about:blank" {
        return None;
    }
    let resolved = resolve_url(&resource_url, base_uri).unwrap_or(resource_url);
    let fetch_options = FetchOptions {
        as_data_uri: false,
        max_size: options.max_resource_size,
        max_size_enabled: options.max_resource_size_enabled,
        charset,
    };
    let fetched = fetcher.fetch(&resolved, &fetch_options).await.ok()?;
    let mut content = remove_css_comments(&fetched.data);
    if options.compress_css {
        content = compress_css(&content);
    }
    Some(
        resolve_import_urls(
            Rc::clone(fetcher),
            content,
            fetched.resource_url,
            options.clone(),
            0,
        )
        .await,
    )
}

// ---------------------------------------------------------------------------
// CSS syntax tree resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssJobKind {
    /// `url()` inside a style rule; eligible for duplicate grouping.
    Style,
    /// `url()` inside `@font-face`; the payload is validated before use.
    FontFace,
}

/// One pending `url()` rewrite inside a syntax tree.
pub struct CssJob {
    pub loc: TokenLoc,
    pub kind: CssJobKind,
    ticket: ResourceTicket,
}

/// The rewrite a resolved [`CssJob`] settled on.
pub enum CssTokenUpdate {
    Url(String),
    Variable { index: usize, content: String },
}

impl CssJob {
    pub async fn resolve(self, options: &CaptureOptions) -> CssTokenUpdate {
        match self.ticket.resolved().await {
            Ok(resource) => match self.kind {
                CssJobKind::FontFace => {
                    let content = resource.content;
                    if content != EMPTY_DATA_URI
                        && !content.starts_with(PREFIX_DATA_URI_VND)
                        && !content.starts_with(PREFIX_DATA_URI_IMAGE_SVG)
                        && !is_valid_font_data_uri(&content)
                    {
                        CssTokenUpdate::Url(EMPTY_DATA_URI.to_string())
                    } else {
                        CssTokenUpdate::Url(content)
                    }
                }
                CssJobKind::Style => {
                    if resource.duplicate && options.group_duplicate_images {
                        CssTokenUpdate::Variable { index: resource.index, content: resource.content }
                    } else {
                        CssTokenUpdate::Url(resource.content)
                    }
                }
            },
            Err(_) => CssTokenUpdate::Url(EMPTY_DATA_URI.to_string()),
        }
    }
}

/// Synchronous pass over a stylesheet: drop `@charset`, validate embedded
/// font payloads, and register every fetchable `url()` with the batch.
pub fn collect_stylesheet_jobs(
    sheet: &mut Stylesheet,
    base_uri: &str,
    options: &CaptureOptions,
    batch: &BatchRequest,
    jobs: &mut Vec<CssJob>,
) {
    collect_rule_jobs(&mut sheet.rules, Vec::new(), base_uri, options, batch, jobs);
}

fn collect_rule_jobs(
    rules: &mut NodeSeq<Rule>,
    path: Vec<usize>,
    base_uri: &str,
    options: &CaptureOptions,
    batch: &BatchRequest,
    jobs: &mut Vec<CssJob>,
) {
    for index in rules.indices() {
        let remove = matches!(
            rules.get(index),
            Some(Rule::Statement(statement)) if statement.name.eq_ignore_ascii_case("charset")
        );
        if remove {
            rules.remove(index);
            continue;
        }
        let Some(rule) = rules.get_mut(index) else {
            continue;
        };
        match rule {
            Rule::Style(style) => {
                let mut rule_path = path.clone();
                rule_path.push(index);
                collect_declaration_jobs(
                    &mut style.declarations,
                    rule_path,
                    CssJobKind::Style,
                    base_uri,
                    options,
                    batch,
                    jobs,
                );
            }
            Rule::DeclarationBlock(block) if block.name.eq_ignore_ascii_case("font-face") => {
                let mut rule_path = path.clone();
                rule_path.push(index);
                collect_declaration_jobs(
                    &mut block.declarations,
                    rule_path,
                    CssJobKind::FontFace,
                    base_uri,
                    options,
                    batch,
                    jobs,
                );
            }
            Rule::Group(group) => {
                let mut rule_path = path.clone();
                rule_path.push(index);
                collect_rule_jobs(&mut group.rules, rule_path, base_uri, options, batch, jobs);
            }
            _ => {}
        }
    }
}

/// Synchronous pass over a declaration list (style rules, font-face
/// blocks, or a parsed `style` attribute with an empty rule path).
pub fn collect_declaration_jobs(
    declarations: &mut NodeSeq<Declaration>,
    rule_path: Vec<usize>,
    kind: CssJobKind,
    base_uri: &str,
    options: &CaptureOptions,
    batch: &BatchRequest,
    jobs: &mut Vec<CssJob>,
) {
    for (declaration_index, declaration) in declarations.iter_mut() {
        for (token_index, token) in declaration.value.iter_mut().enumerate() {
            let url = match &*token {
                ValueToken::Url(url) => url.clone(),
                _ => continue,
            };
            let resource_url = normalize_url(&url);
            if is_ignored_path(&resource_url) {
                // Already-embedded fonts still get their payload checked.
                if kind == CssJobKind::FontFace
                    && resource_url.starts_with("data:")
                    && !resource_url.starts_with(PREFIX_DATA_URI_VND)
                    && !resource_url.starts_with(PREFIX_DATA_URI_IMAGE_SVG)
                    && !is_valid_font_data_uri(&resource_url)
                {
                    *token = ValueToken::Url(EMPTY_DATA_URI.to_string());
                }
                continue;
            }
            if !is_fetchable_url(&resource_url, base_uri, &options.url) {
                continue;
            }
            let ticket = batch.register(&resource_url, true, kind == CssJobKind::Style);
            jobs.push(CssJob {
                loc: TokenLoc {
                    rule_path: rule_path.clone(),
                    declaration: declaration_index,
                    token: token_index,
                },
                kind,
                ticket,
            });
        }
    }
}

/// Apply a resolved update to the addressed token, recording shared
/// variables in the custom-property table.
pub fn apply_token_update(
    token: Option<&mut ValueToken>,
    update: CssTokenUpdate,
    css_variables: &RefCell<BTreeMap<usize, String>>,
) {
    let Some(token) = token else {
        return;
    };
    match update {
        CssTokenUpdate::Url(content) => *token = ValueToken::Url(content),
        CssTokenUpdate::Variable { index, content } => {
            css_variables.borrow_mut().insert(index, content);
            *token = ValueToken::Var(format!("{CSS_VARIABLE_PREFIX}{index}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute inlining
// ---------------------------------------------------------------------------

struct AttributeJob {
    element: NodeDataRef<ElementData>,
    ticket: ResourceTicket,
}

/// Inline the resources referenced by `attribute_name` across a node set.
///
/// `process_duplicates` opts `<img src>`-style references into the
/// duplicate group; `remove_element_if_missing` removes elements whose
/// resource came back empty (used for icon links).
#[allow(clippy::too_many_arguments)]
pub async fn process_attribute(
    elements: Vec<NodeDataRef<ElementData>>,
    attribute_name: &str,
    expected_prefix: &str,
    base_uri: &str,
    options: &CaptureOptions,
    batch: &BatchRequest,
    maps: ResourceMaps<'_>,
    images: &[ImageMeta],
    process_duplicates: bool,
    remove_element_if_missing: bool,
) {
    let mut jobs = Vec::new();
    for element in elements {
        let original = {
            let attributes = element.attributes.borrow();
            dom::attribute_local(&attributes, local_name(attribute_name))
        };
        let Some(original) = original else {
            continue;
        };
        let resource_url = normalize_url(original.trim());
        if is_ignored_path(&resource_url) {
            continue;
        }
        {
            let mut attributes = element.attributes.borrow_mut();
            dom::set_attribute_local(
                &mut attributes,
                local_name(attribute_name),
                EMPTY_IMAGE.to_string(),
            );
        }
        if !is_valid_path(&resource_url, base_uri, &options.url) {
            continue;
        }
        let Some(resolved) = resolve_url(&resource_url, base_uri) else {
            continue;
        };
        if !is_fetchable_url(&resolved, base_uri, &options.url) {
            continue;
        }
        let group = process_duplicates && is_image_source(&element, attribute_name);
        let ticket = batch.register(&resolved, true, group);
        jobs.push(AttributeJob { element, ticket });
    }

    for job in jobs {
        match job.ticket.resolved().await {
            Err(_) => {
                if remove_element_if_missing {
                    job.element.as_node().detach();
                }
            }
            Ok(resource) => {
                let content = resource.content;
                if remove_element_if_missing && content == EMPTY_DATA_URI {
                    job.element.as_node().detach();
                    continue;
                }
                if !has_expected_payload(&content, expected_prefix) {
                    continue;
                }
                let is_svg = content.starts_with(PREFIX_DATA_URI_IMAGE_SVG);
                let grouped = process_duplicates
                    && resource.duplicate
                    && options.group_duplicate_images
                    && !is_svg;
                if grouped
                    && replace_image_source(
                        &job.element,
                        &format!("{CSS_VARIABLE_PREFIX}{}", resource.index),
                        images,
                        options.session_id,
                        &maps,
                    )
                {
                    maps.css_variables.borrow_mut().insert(resource.index, content);
                } else {
                    let mut attributes = job.element.attributes.borrow_mut();
                    dom::set_attribute_local(&mut attributes, local_name(attribute_name), content);
                }
            }
        }
    }
}

fn local_name(attribute_name: &str) -> &str {
    attribute_name.rsplit(':').next().unwrap_or(attribute_name)
}

fn is_image_source(element: &NodeDataRef<ElementData>, attribute_name: &str) -> bool {
    attribute_name == "src" && (*element.name.local).eq_ignore_ascii_case("img")
}

fn has_expected_payload(content: &str, expected_prefix: &str) -> bool {
    content.starts_with(expected_prefix)
        || content.starts_with(PREFIX_DATA_URI_NO_MIMETYPE)
        || content.starts_with("data:application/octet-stream")
        || content.starts_with("data:binary/octet-stream")
        || content.starts_with("data:null;")
}

// ---------------------------------------------------------------------------
// Srcset inlining
// ---------------------------------------------------------------------------

/// Inline every candidate of a `srcset` attribute independently, keeping
/// width/density descriptors.
pub async fn process_srcset(
    elements: Vec<NodeDataRef<ElementData>>,
    base_uri: &str,
    options: &CaptureOptions,
    batch: &BatchRequest,
) {
    enum Candidate {
        Literal(String),
        Pending { ticket: ResourceTicket, descriptor: Option<String> },
    }

    let mut jobs = Vec::new();
    for element in elements {
        let Some(srcset) = element.attributes.borrow().get("srcset").map(str::to_string) else {
            continue;
        };
        let mut candidates = Vec::new();
        for candidate in parse_srcset(&srcset) {
            let resource_url = normalize_url(&candidate.url);
            if is_ignored_path(&resource_url) {
                let mut literal = resource_url;
                if let Some(descriptor) = &candidate.descriptor {
                    literal.push(' ');
                    literal.push_str(descriptor);
                }
                candidates.push(Candidate::Literal(literal));
                continue;
            }
            if !is_valid_path(&resource_url, base_uri, &options.url) {
                candidates.push(Candidate::Literal(String::new()));
                continue;
            }
            let resolved = resolve_url(&resource_url, base_uri).unwrap_or(resource_url);
            if !is_fetchable_url(&resolved, base_uri, &options.url) {
                candidates.push(Candidate::Literal(String::new()));
                continue;
            }
            candidates.push(Candidate::Pending {
                ticket: batch.register(&resolved, true, false),
                descriptor: candidate.descriptor,
            });
        }
        jobs.push((element, candidates));
    }

    for (element, candidates) in jobs {
        let mut values = Vec::new();
        for candidate in candidates {
            match candidate {
                Candidate::Literal(literal) => values.push(literal),
                Candidate::Pending { ticket, descriptor } => match ticket.resolved().await {
                    Ok(resource) => {
                        let mut value = resource.content;
                        if let Some(descriptor) = descriptor {
                            value.push(' ');
                            value.push_str(&descriptor);
                        }
                        values.push(value);
                    }
                    Err(_) => values.push(String::new()),
                },
            }
        }
        let mut attributes = element.attributes.borrow_mut();
        attributes.insert("srcset", values.join(", "));
    }
}

// ---------------------------------------------------------------------------
// SVG cross-reference inlining
// ---------------------------------------------------------------------------

/// Inline `xlink:href` references on `<use>` elements: same-document
/// fragments get the referenced symbol inlined next to them; external
/// references become SVG data URIs.
pub async fn process_xlinks(
    elements: Vec<NodeDataRef<ElementData>>,
    base_uri: &str,
    options: &CaptureOptions,
    batch: &BatchRequest,
) {
    struct XlinkJob {
        element: NodeDataRef<ElementData>,
        original: String,
        ticket: ResourceTicket,
    }

    let mut jobs = Vec::new();
    for element in elements {
        let original = {
            let attributes = element.attributes.borrow();
            dom::attribute_local(&attributes, "href")
        };
        let Some(original) = original else {
            continue;
        };
        let resource_url = normalize_url(&original);
        if is_valid_path(&resource_url, base_uri, &options.url) && !is_ignored_path(&resource_url) {
            {
                let mut attributes = element.attributes.borrow_mut();
                dom::set_attribute_local(&mut attributes, "href", EMPTY_IMAGE.to_string());
            }
            let resolved = resolve_url(&resource_url, base_uri).unwrap_or(resource_url);
            if !is_fetchable_url(&resolved, base_uri, &options.url) {
                continue;
            }
            let ticket = batch.register(&resolved, false, false);
            jobs.push(XlinkJob { element, original, ticket });
        } else if resource_url == options.url {
            let fragment = original[resource_url.len()..].to_string();
            let mut attributes = element.attributes.borrow_mut();
            dom::set_attribute_local(&mut attributes, "href", fragment);
        }
    }

    for job in jobs {
        let Ok(resource) = job.ticket.resolved().await else {
            continue;
        };
        let fragment = job.original.find('#').map(|at| job.original[at..].to_string());
        match fragment {
            Some(fragment) if fragment.len() > 1 => {
                let svg_document = dom::parse_html(&resource.content);
                if let Some(symbol) = dom::select_first(&svg_document, &fragment) {
                    let symbol_node = symbol.as_node().clone();
                    symbol_node.detach();
                    if let Some(parent) = job.element.as_node().parent() {
                        match parent.first_child() {
                            Some(first) => first.insert_before(symbol_node),
                            None => parent.append(symbol_node),
                        }
                        let mut attributes = job.element.attributes.borrow_mut();
                        dom::set_attribute_local(&mut attributes, "href", fragment);
                    }
                }
            }
            _ => {
                let mut attributes = job.element.attributes.borrow_mut();
                dom::set_attribute_local(
                    &mut attributes,
                    "href",
                    format!("{PREFIX_DATA_URI_IMAGE_SVG},{}", resource.content),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Duplicate image replacement
// ---------------------------------------------------------------------------

/// Replace a duplicate image's source with a transparent placeholder of
/// its rendered size plus a background driven by the shared CSS variable.
/// Only images the upstream capture flagged replaceable qualify.
pub fn replace_image_source(
    element: &NodeDataRef<ElementData>,
    variable_name: &str,
    images: &[ImageMeta],
    session_id: u32,
    maps: &ResourceMaps<'_>,
) -> bool {
    let index_attribute = image_index_attribute(session_id);
    let image_index = {
        let attributes = element.attributes.borrow();
        attributes.get(index_attribute.as_str()).and_then(|value| value.parse::<usize>().ok())
    };
    let Some(image_index) = image_index else {
        return false;
    };
    let Some(meta) = images.get(image_index) else {
        return false;
    };
    if !meta.replaceable {
        return false;
    }
    {
        let mut attributes = element.attributes.borrow_mut();
        attributes.insert("src", transparent_placeholder(meta.px_width, meta.px_height));
        attributes.remove(index_attribute.as_str());
    }
    let background = BackgroundStyle {
        size: meta
            .object_fit
            .as_deref()
            .filter(|fit| *fit == "contain" || *fit == "cover")
            .map(str::to_string),
        position: meta.object_position.clone(),
        color: meta.background_color.clone(),
    };
    set_background_image(element, &format!("var({variable_name})"), &background);

    // Re-parse the style attribute so stage 3 serializes it from the tree
    // like every other style.
    let style_text = element.attributes.borrow().get("style").unwrap_or("").to_string();
    let declarations = crate::css::parse_declarations(&style_text);
    let style_attribute = style_index_attribute(session_id);
    let style_index = {
        let attributes = element.attributes.borrow();
        attributes.get(style_attribute.as_str()).and_then(|value| value.parse::<usize>().ok())
    };
    let style_index = style_index.unwrap_or_else(|| {
        let index = maps.next_style_index.get();
        maps.next_style_index.set(index + 1);
        let mut attributes = element.attributes.borrow_mut();
        attributes.insert(style_attribute.as_str(), index.to_string());
        index
    });
    maps.styles.borrow_mut().insert(style_index, declarations);
    true
}

/// Background properties layered under a replaced image.
#[derive(Debug, Clone, Default)]
pub struct BackgroundStyle {
    pub position: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
}

/// Pin a background image onto an element through its `style` attribute,
/// overriding any page styling.
pub fn set_background_image(
    element: &NodeDataRef<ElementData>,
    image: &str,
    style: &BackgroundStyle,
) {
    let mut attributes = element.attributes.borrow_mut();
    let mut text = attributes.get("style").unwrap_or("").trim_end().to_string();
    if !text.is_empty() && !text.ends_with(';') {
        text.push(';');
    }
    let position = style.position.as_deref().unwrap_or("center");
    let color = style.color.as_deref().unwrap_or("transparent");
    let size = style.size.as_deref().unwrap_or("100% 100%");
    text.push_str(&format!(
        "background-blend-mode:normal !important;\
         background-clip:border-box !important;\
         background-position:{position} !important;\
         background-color:{color} !important;\
         background-image:{image} !important;\
         background-size:{size} !important;\
         background-origin:content-box !important;\
         background-repeat:no-repeat !important"
    ));
    attributes.insert("style", text);
}

fn transparent_placeholder(width: u32, height: u32) -> String {
    format!(
        "{PREFIX_DATA_URI_IMAGE_SVG},<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\"><rect fill-opacity=\"0\"/></svg>"
    )
}

// ---------------------------------------------------------------------------
// Font payload validation
// ---------------------------------------------------------------------------

/// Magic-number check over a base64 font data URI: woff, woff2, truetype,
/// opentype (sfnt/OTTO) and collections are accepted.
pub fn is_valid_font_data_uri(data_uri: &str) -> bool {
    let Some((_, payload)) = data_uri.split_once(";base64,") else {
        return false;
    };
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(payload.trim()) else {
        return false;
    };
    if bytes.len() < 4 {
        return false;
    }
    bytes.starts_with(b"wOFF")
        || bytes.starts_with(b"wOF2")
        || bytes.starts_with(&[0x00, 0x01, 0x00, 0x00])
        || bytes.starts_with(b"OTTO")
        || bytes.starts_with(b"true")
        || bytes.starts_with(b"ttcf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_url_text_resolution() {
        let resolved =
            resolve_css_urls_text("div{background:url('icon.png')}", "http://x/", "http://x/");
        assert!(resolved.contains("url('http://x/icon.png')"));
    }

    #[test]
    fn data_uris_in_css_are_escaped_not_resolved() {
        let resolved = resolve_css_urls_text(
            "div{background:url(data:image/png;base64,A&B)}",
            "http://x/",
            "http://x/",
        );
        assert!(resolved.contains("data:image/png;base64,A&amp;B"));
    }

    #[test]
    fn font_magic_numbers() {
        let woff = format!(
            "data:font/woff;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"wOFFrest")
        );
        assert!(is_valid_font_data_uri(&woff));
        let bogus = format!(
            "data:font/woff;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"notafont")
        );
        assert!(!is_valid_font_data_uri(&bogus));
        assert!(!is_valid_font_data_uri("data:font/woff,plain"));
    }
}
