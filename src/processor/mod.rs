//! Document mutation tasks.
//!
//! One [`Processor`] per document runner. It owns the parsed document,
//! the per-document maps (parsed stylesheets and style attributes, the
//! shared CSS custom-property table, frame and import child tables) and
//! implements one method per pipeline task. Sequential tasks are plain
//! synchronous DOM edits; parallel tasks live in [`resources`] and
//! [`frames`].

mod frames;
mod output;
mod resources;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result};
use kuchiki::NodeRef;

use crate::batch_request::BatchRequest;
use crate::capture::data::{CaptureData, FrameData};
use crate::config::CaptureOptions;
use crate::css::{Declaration, NodeSeq, Rule, Stylesheet};
use crate::dom;
use crate::fetch::{FetchOptions, ResourceFetcher};
use crate::helper::{self, BackgroundStyle, DocMeta};
use crate::progress::ProgressListener;
use crate::runner::{Runner, TaskAction};
use crate::stats::{ResourceCategory, Stats, Tally};
use crate::utils::constants::{
    self, SELECTED_CONTENT_ATTRIBUTE, SELECTED_CONTENT_ROOT_ATTRIBUTE,
};
use crate::utils::{self, EMPTY_IMAGE, normalize_url};

/// A style-bearing element's parsed stylesheet plus its original media
/// text. Entries whose stylesheet failed to parse or resolve are absent;
/// their elements are removed in stage 3.
pub struct StylesheetInfo {
    pub media: Option<String>,
    pub sheet: Stylesheet,
}

pub(crate) struct ProcessorInner {
    pub(crate) options: CaptureOptions,
    pub(crate) base_uri: String,
    pub(crate) batch: Rc<BatchRequest>,
    pub(crate) fetcher: Rc<dyn ResourceFetcher>,
    pub(crate) listener: Option<ProgressListener>,
    pub(crate) stats: RefCell<Stats>,
    doc: RefCell<Option<NodeRef>>,
    charset: RefCell<Option<String>>,
    pub(crate) capture: RefCell<CaptureData>,
    pub(crate) frames: RefCell<Vec<FrameData>>,
    pub(crate) stylesheets: RefCell<BTreeMap<usize, StylesheetInfo>>,
    pub(crate) styles: RefCell<BTreeMap<usize, NodeSeq<Declaration>>>,
    pub(crate) css_variables: RefCell<BTreeMap<usize, String>>,
    pub(crate) import_runners: RefCell<BTreeMap<usize, Runner>>,
    next_sheet_index: Cell<usize>,
    pub(crate) next_style_index: Cell<usize>,
    next_import_index: Cell<usize>,
    pub(crate) max_resources: Cell<usize>,
    pub(crate) title: RefCell<String>,
    pub(crate) doc_meta: RefCell<DocMeta>,
    pub(crate) infobar_content: RefCell<String>,
}

/// Cheaply cloneable handle; clones share the same document state so
/// stage futures can run detached from the runner's borrow.
#[derive(Clone)]
pub struct Processor {
    pub(crate) inner: Rc<ProcessorInner>,
}

impl Processor {
    pub(crate) fn new(
        options: CaptureOptions,
        mut capture: CaptureData,
        batch: Rc<BatchRequest>,
        fetcher: Rc<dyn ResourceFetcher>,
        listener: Option<ProgressListener>,
    ) -> Self {
        let base_uri = normalize_url(options.base_uri());
        let frames: Vec<FrameData> =
            std::mem::take(&mut capture.frames).into_iter().map(FrameData::from).collect();
        let stats = Stats::new(options.display_stats);
        Self {
            inner: Rc::new(ProcessorInner {
                base_uri,
                batch,
                fetcher,
                listener,
                stats: RefCell::new(stats),
                doc: RefCell::new(None),
                charset: RefCell::new(None),
                capture: RefCell::new(capture),
                frames: RefCell::new(frames),
                stylesheets: RefCell::new(BTreeMap::new()),
                styles: RefCell::new(BTreeMap::new()),
                css_variables: RefCell::new(BTreeMap::new()),
                import_runners: RefCell::new(BTreeMap::new()),
                next_sheet_index: Cell::new(0),
                next_style_index: Cell::new(0),
                next_import_index: Cell::new(0),
                max_resources: Cell::new(0),
                title: RefCell::new(String::new()),
                doc_meta: RefCell::new(DocMeta::default()),
                infobar_content: RefCell::new(String::new()),
                options,
            }),
        }
    }

    pub(crate) fn doc(&self) -> Option<NodeRef> {
        self.inner.doc.borrow().clone()
    }

    pub(crate) fn options(&self) -> &CaptureOptions {
        &self.inner.options
    }

    fn session_id(&self) -> u32 {
        self.inner.options.session_id
    }

    fn add_stat(&self, tally: Tally, category: ResourceCategory, delta: u64) {
        self.inner.stats.borrow_mut().add(tally, category, delta);
    }

    fn set_stat(&self, tally: Tally, category: ResourceCategory, value: u64) {
        self.inner.stats.borrow_mut().set(tally, category, value);
    }

    /// Fetch (when needed) and parse the document against its base URI.
    /// This is the only fatal failure point of a capture.
    pub(crate) async fn load_page(&self, supplied: Option<String>) -> Result<()> {
        let options = &self.inner.options;
        let content = match (supplied, options.save_raw_page) {
            (Some(content), false) => content,
            _ => {
                let fetch_options = FetchOptions {
                    as_data_uri: false,
                    max_size: options.max_resource_size,
                    max_size_enabled: options.max_resource_size_enabled,
                    charset: None,
                };
                let fetched = self
                    .inner
                    .fetcher
                    .fetch(&self.inner.base_uri, &fetch_options)
                    .await
                    .with_context(|| format!("failed to load document {}", self.inner.base_uri))?;
                fetched.data
            }
        };
        *self.inner.doc.borrow_mut() = Some(dom::parse_html(&content));
        Ok(())
    }

    /// Record the total distinct resource count once every document in
    /// the tree has registered its references.
    pub(crate) fn initialize_resource_count(&self) {
        let max = self.inner.batch.max_keys();
        self.inner.max_resources.set(max);
        self.set_stat(Tally::Processed, ResourceCategory::Resources, max as u64);
    }

    pub(crate) fn max_resources(&self) -> usize {
        self.inner.max_resources.get()
    }

    /// Dispatch one synchronous stage task.
    pub(crate) fn run_sequential(&self, action: TaskAction) {
        match action {
            TaskAction::PreProcessPage => self.pre_process_page(),
            TaskAction::InsertShadowRootContents => self.insert_shadow_root_contents(),
            TaskAction::ReplaceStyleContents => self.replace_style_contents(),
            TaskAction::IsolateSelectedContent => self.isolate_selected_content(),
            TaskAction::InsertVideoPosters => self.insert_video_posters(),
            TaskAction::RemoveFrames => self.remove_frames(),
            TaskAction::RemoveImports => self.remove_imports(),
            TaskAction::RemoveScripts => self.remove_scripts(),
            TaskAction::RemoveVideoSources => self.remove_video_sources(),
            TaskAction::RemoveAudioSources => self.remove_audio_sources(),
            TaskAction::RemoveDiscardedResources => self.remove_discarded_resources(),
            TaskAction::ResetCharsetMeta => self.reset_charset_meta(),
            TaskAction::SetInputValues => self.set_input_values(),
            TaskAction::InsertFaviconLink => self.insert_favicon_link(),
            TaskAction::ReplaceCanvasElements => self.replace_canvas_elements(),
            TaskAction::InsertFonts => self.insert_fonts(),
            TaskAction::RemoveHiddenElements => self.remove_hidden_elements(),
            TaskAction::ResolveHrefs => self.resolve_hrefs(),
            TaskAction::ResolveStyleAttributeUrls => self.resolve_style_attribute_urls(),
            TaskAction::RemoveUnusedStyles => self.remove_unused_styles(),
            TaskAction::RemoveAlternativeMedias => self.remove_alternative_medias(),
            TaskAction::RemoveUnusedFonts => self.remove_unused_fonts(),
            TaskAction::RemoveAlternativeImages => self.remove_alternative_images(),
            TaskAction::RemoveAlternativeFonts => self.remove_alternative_fonts(),
            TaskAction::ReplaceStylesheets => self.replace_stylesheets(),
            TaskAction::ReplaceStyleAttributes => self.replace_style_attributes(),
            TaskAction::InsertCssVariables => self.insert_css_variables(),
            TaskAction::CompressHtml => self.compress_html(),
            _ => {}
        }
    }

    /// Dispatch one asynchronous stage task.
    pub(crate) async fn run_parallel(&self, action: TaskAction) {
        match action {
            TaskAction::ResolveStylesheetUrls => self.resolve_stylesheet_urls().await,
            TaskAction::ResolveFrameUrls => self.resolve_frame_urls().await,
            TaskAction::ResolveImportUrls => self.resolve_import_links().await,
            TaskAction::ProcessStylesheets => self.process_stylesheets().await,
            TaskAction::ProcessStyleAttributes => self.process_style_attributes().await,
            TaskAction::ProcessPageResources => self.process_page_resources().await,
            TaskAction::ProcessScripts => self.process_scripts().await,
            TaskAction::ProcessFrames => self.process_frames().await,
            TaskAction::ProcessHtmlImports => self.process_html_imports().await,
            _ => {}
        }
    }

    // -----------------------------------------------------------------
    // Stage 0 — sequential
    // -----------------------------------------------------------------

    /// Apply the live-page image state: substitute current sources,
    /// blank out images that rendered at zero size, and promote deferred
    /// `data-src`/`data-srcset` attributes.
    fn pre_process_page(&self) {
        let Some(doc) = self.doc() else { return };
        let options = self.options();
        let capture = self.inner.capture.borrow();
        if !capture.images.is_empty() {
            let index_attribute = constants::image_index_attribute(self.session_id());
            for image in dom::select_all(&doc, "img") {
                let meta = {
                    let attributes = image.attributes.borrow();
                    attributes
                        .get(index_attribute.as_str())
                        .and_then(|value| value.parse::<usize>().ok())
                        .and_then(|index| capture.images.get(index))
                        .cloned()
                };
                let Some(meta) = meta else { continue };
                let mut attributes = image.attributes.borrow_mut();
                if options.remove_hidden_elements && meta.px_width == 0 && meta.px_height == 0 {
                    attributes.insert("src", EMPTY_IMAGE.to_string());
                } else if let Some(current_src) = meta.current_src {
                    attributes.insert("src", current_src);
                }
            }
            if !options.save_raw_page && options.load_deferred_images {
                for image in dom::select_all(&doc, "img[data-src]") {
                    let mut attributes = image.attributes.borrow_mut();
                    let src = attributes.get("src").unwrap_or("").to_string();
                    let deferred = attributes.get("data-src").unwrap_or("").to_string();
                    if (src.is_empty() || src == EMPTY_IMAGE) && !deferred.is_empty() {
                        attributes.insert("src", deferred);
                        attributes.remove("data-src");
                    }
                }
                for image in dom::select_all(&doc, "img[data-srcset]") {
                    let mut attributes = image.attributes.borrow_mut();
                    let srcset = attributes.get("srcset").unwrap_or("").to_string();
                    let deferred = attributes.get("data-srcset").unwrap_or("").to_string();
                    if srcset.is_empty() && !deferred.is_empty() {
                        attributes.insert("srcset", deferred);
                        attributes.remove("data-srcset");
                    }
                }
            }
        }
    }

    /// Materialize captured shadow roots as frames so the regular frame
    /// fold-in machinery carries their content.
    fn insert_shadow_root_contents(&self) {
        let Some(doc) = self.doc() else { return };
        let shadow_attribute = constants::shadow_root_attribute(self.session_id());
        let window_attribute = constants::window_id_attribute(self.session_id());
        let hosts = dom::select_all(&doc, &format!("[{shadow_attribute}]"));
        let capture = self.inner.capture.borrow();
        for (host_index, host) in hosts.into_iter().enumerate() {
            let Some(Some(shadow)) = capture.shadow_roots.get(host_index) else {
                continue;
            };
            let mut frames = self.inner.frames.borrow_mut();
            let window_id = format!("shadow-{}", frames.len());
            let style = format!(
                "all:initial!important;border:0!important;width:100%!important;height:{}px!important",
                shadow.px_height
            );
            let Some(frame) = dom::create_element(
                "iframe",
                &[("style", style.as_str()), (window_attribute.as_str(), window_id.as_str())],
            ) else {
                continue;
            };
            frames.push(FrameData {
                window_id,
                content: Some(shadow.content.clone()),
                base_uri: self.inner.base_uri.clone(),
                capture: CaptureData::default(),
                runner: None,
                max_resources: 0,
            });
            host.as_node().append(frame);
        }
    }

    /// Swap `<style>` texts for the computed contents harvested upstream.
    fn replace_style_contents(&self) {
        let Some(doc) = self.doc() else { return };
        let capture = self.inner.capture.borrow();
        if capture.stylesheet_contents.is_empty() {
            return;
        }
        for (style_index, style) in dom::select_all(&doc, "style").into_iter().enumerate() {
            if let Some(Some(content)) = capture.stylesheet_contents.get(style_index) {
                dom::set_text_content(style.as_node(), content);
            }
        }
    }

    /// Keep only the user-selected subtree, hiding the ancestors' other
    /// content.
    fn isolate_selected_content(&self) {
        let Some(doc) = self.doc() else { return };
        let Some(root) = dom::select_first(&doc, &format!("[{SELECTED_CONTENT_ROOT_ATTRIBUTE}]"))
        else {
            return;
        };
        let selection_selector = format!("[{SELECTED_CONTENT_ATTRIBUTE}]");
        for element in dom::select_all(root.as_node(), "*") {
            if (*element.name.local).eq_ignore_ascii_case("style") {
                continue;
            }
            let selected = element.attributes.borrow().contains(SELECTED_CONTENT_ATTRIBUTE);
            if selected {
                element.attributes.borrow_mut().remove(SELECTED_CONTENT_ATTRIBUTE);
            } else if dom::select_first(element.as_node(), &selection_selector).is_none() {
                element.as_node().detach();
            }
        }
        let mut element = root.as_node().clone();
        while let Some(parent) = element.parent() {
            let parent_is_html = parent
                .as_element()
                .map(|data| (*data.name.local).eq_ignore_ascii_case("html"))
                .unwrap_or(true);
            if parent_is_html {
                break;
            }
            let mut selection_found = false;
            for sibling in parent.children().collect::<Vec<_>>() {
                if sibling == element {
                    selection_found = true;
                    continue;
                }
                let tag = sibling
                    .as_element()
                    .map(|data| data.name.local.to_lowercase())
                    .unwrap_or_default();
                if tag == "svg" || tag == "style" || tag == "link" {
                    continue;
                }
                if selection_found {
                    sibling.detach();
                } else {
                    if let Some(data) = sibling.as_element() {
                        data.attributes.borrow_mut().insert("hidden", String::new());
                    }
                    for child in sibling.children().collect::<Vec<_>>() {
                        child.detach();
                    }
                }
            }
            element = parent;
        }
        let mut attributes = root.attributes.borrow_mut();
        attributes.remove(SELECTED_CONTENT_ROOT_ATTRIBUTE);
        attributes.remove(SELECTED_CONTENT_ATTRIBUTE);
    }

    /// Give videos whose source is being dropped a captured poster frame.
    fn insert_video_posters(&self) {
        let Some(doc) = self.doc() else { return };
        let capture = self.inner.capture.borrow();
        if capture.posters.is_empty() {
            return;
        }
        let elements = dom::select_all(&doc, "video[src], video > source[src]");
        for (video_index, element) in elements.into_iter().enumerate() {
            let video = if (*element.name.local).eq_ignore_ascii_case("video") {
                element.as_node().clone()
            } else {
                match element.as_node().parent() {
                    Some(parent) => parent,
                    None => continue,
                }
            };
            let Some(video_element) = video.as_element() else { continue };
            let mut attributes = video_element.attributes.borrow_mut();
            if attributes.get("poster").map(str::is_empty).unwrap_or(true) {
                if let Some(Some(poster)) = capture.posters.get(video_index) {
                    attributes.insert("poster", poster.clone());
                }
            }
        }
    }

    fn remove_frames(&self) {
        let Some(doc) = self.doc() else { return };
        let elements = dom::select_all(&doc, "iframe, frame, object[type=\"text/html\"][data]");
        self.set_stat(Tally::Discarded, ResourceCategory::Frames, elements.len() as u64);
        self.set_stat(Tally::Processed, ResourceCategory::Frames, elements.len() as u64);
        for element in elements {
            element.as_node().detach();
        }
    }

    fn remove_imports(&self) {
        let Some(doc) = self.doc() else { return };
        let elements = dom::select_all(&doc, "link[rel=\"import\"]");
        self.set_stat(Tally::Discarded, ResourceCategory::HtmlImports, elements.len() as u64);
        self.set_stat(Tally::Processed, ResourceCategory::HtmlImports, elements.len() as u64);
        for element in elements {
            element.as_node().detach();
        }
    }

    /// Strip scripts, inline event handlers and `javascript:` references.
    /// Structured-data scripts (`application/ld+json`) survive.
    fn remove_scripts(&self) {
        let Some(doc) = self.doc() else { return };
        for element in dom::select_all(&doc, "*") {
            let mut attributes = element.attributes.borrow_mut();
            let handlers: Vec<String> = attributes
                .map
                .keys()
                .filter(|name| name.local.starts_with("on"))
                .map(|name| name.local.to_string())
                .collect();
            for handler in handlers {
                attributes.remove(handler.as_str());
            }
        }
        for element in dom::select_all(&doc, "[href]") {
            let mut attributes = element.attributes.borrow_mut();
            let href = attributes.get("href").unwrap_or("").to_string();
            if href.trim_start().starts_with("javascript:") {
                attributes.insert("href", String::new());
            }
        }
        for element in dom::select_all(&doc, "[src]") {
            let mut attributes = element.attributes.borrow_mut();
            let src = attributes.get("src").unwrap_or("").to_string();
            if src.trim_start().starts_with("javascript:") {
                attributes.remove("src");
            }
        }
        let scripts: Vec<_> = dom::select_all(&doc, "script")
            .into_iter()
            .filter(|script| {
                script.attributes.borrow().get("type") != Some("application/ld+json")
            })
            .collect();
        self.set_stat(Tally::Discarded, ResourceCategory::Scripts, scripts.len() as u64);
        self.set_stat(Tally::Processed, ResourceCategory::Scripts, scripts.len() as u64);
        for script in scripts {
            script.as_node().detach();
        }
    }

    fn remove_video_sources(&self) {
        self.remove_media_sources("video", ResourceCategory::VideoSources);
    }

    fn remove_audio_sources(&self) {
        self.remove_media_sources("audio", ResourceCategory::AudioSources);
    }

    fn remove_media_sources(&self, tag: &str, category: ResourceCategory) {
        let Some(doc) = self.doc() else { return };
        let elements = dom::select_all(&doc, &format!("{tag}[src], {tag} > source[src]"));
        self.set_stat(Tally::Discarded, category, elements.len() as u64);
        self.set_stat(Tally::Processed, category, elements.len() as u64);
        for element in elements {
            if (*element.name.local).eq_ignore_ascii_case("source") {
                element.as_node().detach();
            } else {
                element.attributes.borrow_mut().remove("src");
            }
        }
    }

    /// Drop resources that cannot carry over into a static snapshot:
    /// applets, refresh metas, plugin objects, speculative-loading links,
    /// CSP metas and tracking pings.
    fn remove_discarded_resources(&self) {
        let Some(doc) = self.doc() else { return };
        let mut discarded = Vec::new();
        discarded.extend(dom::select_all(&doc, "applet"));
        discarded.extend(dom::select_all(&doc, "meta").into_iter().filter(|meta| {
            meta.attributes
                .borrow()
                .get("http-equiv")
                .map(|value| value.eq_ignore_ascii_case("refresh"))
                .unwrap_or(false)
        }));
        discarded.extend(dom::select_all(&doc, "object[data]").into_iter().filter(|object| {
            let attributes = object.attributes.borrow();
            let object_type = attributes.get("type").unwrap_or("");
            !matches!(object_type, "image/svg+xml" | "image/svg-xml" | "text/html")
        }));
        discarded.extend(dom::select_all(&doc, "embed[src]").into_iter().filter(|embed| {
            !embed.attributes.borrow().get("src").unwrap_or("").contains(".svg")
        }));
        self.set_stat(Tally::Discarded, ResourceCategory::Objects, discarded.len() as u64);
        self.set_stat(Tally::Processed, ResourceCategory::Objects, discarded.len() as u64);
        for element in discarded {
            element.as_node().detach();
        }

        const SPECULATIVE_RELS: [&str; 5] =
            ["preconnect", "prerender", "dns-prefetch", "preload", "prefetch"];
        for link in dom::select_all(&doc, "link[rel]") {
            let rel = link.attributes.borrow().get("rel").unwrap_or("").to_string();
            let kept: Vec<&str> = rel
                .split_whitespace()
                .filter(|token| !SPECULATIVE_RELS.contains(&token.to_lowercase().as_str()))
                .collect();
            if kept.len() != rel.split_whitespace().count() {
                if kept.is_empty() {
                    link.as_node().detach();
                } else {
                    link.attributes.borrow_mut().insert("rel", kept.join(" "));
                }
            }
        }

        for link in dom::select_all(&doc, "link[title]") {
            let rel = link.attributes.borrow().get("rel").unwrap_or("").to_lowercase();
            if rel.contains("stylesheet") && rel.contains("alternate") {
                link.as_node().detach();
            }
        }

        for meta in dom::select_all(&doc, "meta") {
            let is_csp = meta
                .attributes
                .borrow()
                .get("http-equiv")
                .map(|value| value.eq_ignore_ascii_case("content-security-policy"))
                .unwrap_or(false);
            if is_csp {
                meta.as_node().detach();
            }
        }

        if self.options().compress_html {
            for input in dom::select_all(&doc, "input[type=\"hidden\"]") {
                input.as_node().detach();
            }
        }

        for anchor in dom::select_all(&doc, "a[ping]") {
            anchor.attributes.borrow_mut().remove("ping");
        }
    }

    /// Replace whatever charset declarations the page had with a single
    /// utf-8 meta, since the snapshot is serialized as utf-8.
    fn reset_charset_meta(&self) {
        let Some(doc) = self.doc() else { return };
        for meta in dom::select_all(&doc, "meta") {
            let (has_charset, declared) = {
                let attributes = meta.attributes.borrow();
                let declared = attributes
                    .get("content")
                    .and_then(|content| content.split(';').nth(1))
                    .and_then(|declaration| declaration.split('=').nth(1))
                    .map(|charset| charset.trim().to_lowercase());
                let relevant = attributes.contains("charset")
                    || attributes
                        .get("http-equiv")
                        .map(|value| value.eq_ignore_ascii_case("content-type"))
                        .unwrap_or(false);
                (relevant, declared)
            };
            if has_charset {
                if let Some(declared) = declared {
                    let mut charset = self.inner.charset.borrow_mut();
                    if charset.is_none() {
                        *charset = Some(declared);
                    }
                }
                meta.as_node().detach();
            }
        }
        let Some(head) = dom::head(&doc) else { return };
        let Some(meta) = dom::create_element("meta", &[("charset", "utf-8")]) else {
            return;
        };
        match head.first_child() {
            Some(first) => first.insert_before(meta),
            None => head.append(meta),
        }
    }

    /// Bake the snapshotted form state into attributes so it survives
    /// serialization.
    fn set_input_values(&self) {
        let Some(doc) = self.doc() else { return };
        let value_attribute = constants::input_value_attribute(self.session_id());
        for input in dom::select_all(&doc, "input") {
            let mut attributes = input.attributes.borrow_mut();
            let value = attributes.get(value_attribute.as_str()).unwrap_or("").to_string();
            attributes.insert("value", value);
        }
        for input in dom::select_all(&doc, "input[type=\"radio\"], input[type=\"checkbox\"]") {
            let mut attributes = input.attributes.borrow_mut();
            if attributes.get(value_attribute.as_str()) == Some("true") {
                attributes.insert("checked", String::new());
            }
        }
        for textarea in dom::select_all(&doc, "textarea") {
            let value = textarea
                .attributes
                .borrow()
                .get(value_attribute.as_str())
                .unwrap_or("")
                .to_string();
            dom::set_text_content(textarea.as_node(), &value);
        }
        for option in dom::select_all(&doc, "select option") {
            let mut attributes = option.attributes.borrow_mut();
            if attributes.contains(value_attribute.as_str()) {
                attributes.insert("selected", String::new());
            }
        }
    }

    /// Make sure the document carries a favicon link for the inliner to
    /// resolve, defaulting to `/favicon.ico`.
    fn insert_favicon_link(&self) {
        let Some(doc) = self.doc() else { return };
        let Some(head) = dom::head(&doc) else { return };
        let favicon = dom::select_first(&doc, "link[href][rel=\"icon\"]")
            .or_else(|| dom::select_first(&doc, "link[href][rel=\"shortcut icon\"]"))
            .map(|link| link.as_node().clone())
            .or_else(|| {
                dom::create_element(
                    "link",
                    &[("type", "image/x-icon"), ("rel", "shortcut icon"), ("href", "/favicon.ico")],
                )
            });
        if let Some(favicon) = favicon {
            favicon.detach();
            head.append(favicon);
        }
    }

    /// Paint captured canvas bitmaps behind their elements.
    fn replace_canvas_elements(&self) {
        let Some(doc) = self.doc() else { return };
        let capture = self.inner.capture.borrow();
        if capture.canvases.is_empty() {
            return;
        }
        for (canvas_index, canvas) in dom::select_all(&doc, "canvas").into_iter().enumerate() {
            if let Some(Some(data)) = capture.canvases.get(canvas_index) {
                helper::set_background_image(
                    &canvas,
                    &format!("url({})", data.data_uri),
                    &BackgroundStyle::default(),
                );
                self.add_stat(Tally::Processed, ResourceCategory::Canvas, 1);
            }
        }
    }

    /// Re-emit the fonts the live page had loaded as `@font-face` rules,
    /// ahead of every other stylesheet.
    fn insert_fonts(&self) {
        let Some(doc) = self.doc() else { return };
        let capture = self.inner.capture.borrow();
        let mut stylesheet = String::new();
        for font in &capture.fonts {
            if font.get("font-family").is_none() || font.get("src").is_none() {
                continue;
            }
            stylesheet.push_str("@font-face{");
            let descriptors: Vec<String> = font
                .iter()
                .map(|(descriptor, value)| format!("{descriptor}:{value}"))
                .collect();
            stylesheet.push_str(&descriptors.join(";"));
            stylesheet.push('}');
        }
        if stylesheet.is_empty() {
            return;
        }
        let Some(style) = dom::create_element("style", &[]) else { return };
        dom::set_text_content(&style, &stylesheet);
        if let Some(existing) = dom::select_first(&doc, "style") {
            existing.as_node().insert_before(style);
        } else if let Some(head) = dom::head(&doc) {
            match head.first_child() {
                Some(first) => first.insert_before(style),
                None => head.append(style),
            }
        }
    }

    fn remove_hidden_elements(&self) {
        let Some(doc) = self.doc() else { return };
        let hidden_attribute = constants::removed_content_attribute(self.session_id());
        let elements = dom::select_all(&doc, &format!("[{hidden_attribute}]"));
        self.set_stat(Tally::Discarded, ResourceCategory::HiddenElements, elements.len() as u64);
        self.set_stat(Tally::Processed, ResourceCategory::HiddenElements, elements.len() as u64);
        for element in elements {
            element.as_node().detach();
        }
    }

    /// Absolutize navigation hrefs so links keep working from the saved
    /// file.
    fn resolve_hrefs(&self) {
        let Some(doc) = self.doc() else { return };
        for element in dom::select_all(&doc, "a[href], area[href], link[href]") {
            let mut attributes = element.attributes.borrow_mut();
            let href = attributes.get("href").unwrap_or("").trim().to_string();
            if href.is_empty() || utils::is_ignored_path(&href) || href.starts_with('#') {
                continue;
            }
            if let Some(resolved) = utils::resolve_url(&href, &self.inner.base_uri) {
                attributes.insert("href", resolved);
            }
        }
    }

    /// Parse every `style` attribute into a declaration tree, resolving
    /// its `url()` references against the base URI first.
    fn resolve_style_attribute_urls(&self) {
        let Some(doc) = self.doc() else { return };
        let style_attribute = constants::style_index_attribute(self.session_id());
        for element in dom::select_all(&doc, "[style]") {
            let mut content = element.attributes.borrow().get("style").unwrap_or("").to_string();
            if self.options().compress_css {
                content = utils::compress_css(&content);
            }
            content =
                helper::resolve_css_urls_text(&content, &self.inner.base_uri, &self.options().url);
            let declarations = crate::css::parse_declarations(&content);
            let index = self.inner.next_style_index.get();
            self.inner.next_style_index.set(index + 1);
            element
                .attributes
                .borrow_mut()
                .insert(style_attribute.as_str(), index.to_string());
            self.inner.styles.borrow_mut().insert(index, declarations);
        }
    }

    // -----------------------------------------------------------------
    // Stage 1 — sequential
    // -----------------------------------------------------------------

    /// Drop style rules whose selectors match nothing in the document.
    fn remove_unused_styles(&self) {
        let Some(doc) = self.doc() else { return };
        let mut processed = 0u64;
        let mut discarded = 0u64;
        let mut sheets = self.inner.stylesheets.borrow_mut();
        for info in sheets.values_mut() {
            remove_unused_rules(&mut info.sheet.rules, &doc, &mut processed, &mut discarded);
        }
        self.set_stat(Tally::Processed, ResourceCategory::CssRules, processed);
        self.set_stat(Tally::Discarded, ResourceCategory::CssRules, discarded);
    }

    /// Drop `@media` groups that can never apply to a screen
    /// presentation.
    fn remove_alternative_medias(&self) {
        let mut processed = 0u64;
        let mut discarded = 0u64;
        let mut sheets = self.inner.stylesheets.borrow_mut();
        for info in sheets.values_mut() {
            for index in info.sheet.rules.indices() {
                let non_screen = match info.sheet.rules.get(index) {
                    Some(Rule::Group(group)) if group.name.eq_ignore_ascii_case("media") => {
                        processed += 1;
                        media_query_never_screen(&group.prelude)
                    }
                    _ => false,
                };
                if non_screen {
                    info.sheet.rules.remove(index);
                    discarded += 1;
                }
            }
        }
        self.set_stat(Tally::Processed, ResourceCategory::Medias, processed);
        self.set_stat(Tally::Discarded, ResourceCategory::Medias, discarded);
    }

    /// Drop `@font-face` rules for families nothing references.
    fn remove_unused_fonts(&self) {
        let mut used = std::collections::BTreeSet::new();
        for family in &self.inner.capture.borrow().used_fonts {
            used.insert(family.trim().trim_matches(['"', '\'']).to_lowercase());
        }
        let mut sheets = self.inner.stylesheets.borrow_mut();
        for info in sheets.values_mut() {
            collect_used_families(&info.sheet.rules, &mut used);
        }
        for declarations in self.inner.styles.borrow().values() {
            collect_used_families_from_declarations(declarations, &mut used);
        }
        for info in sheets.values_mut() {
            remove_unused_font_faces(&mut info.sheet.rules, &used);
        }
    }

    // -----------------------------------------------------------------
    // Stage 2 — sequential
    // -----------------------------------------------------------------

    /// With sources inlined, alternative variants only repeat bytes:
    /// drop `srcset` from images that carry a usable `src`, and `<source>`
    /// alternatives inside `<picture>`.
    fn remove_alternative_images(&self) {
        let Some(doc) = self.doc() else { return };
        for image in dom::select_all(&doc, "img[srcset]") {
            let mut attributes = image.attributes.borrow_mut();
            let has_src = !attributes.get("src").unwrap_or("").is_empty();
            if has_src {
                attributes.remove("srcset");
                attributes.remove("sizes");
            }
        }
        for source in dom::select_all(&doc, "picture > source") {
            source.as_node().detach();
        }
    }

    /// Keep one `src` candidate per `@font-face` (preferring woff2).
    fn remove_alternative_fonts(&self) {
        let mut sheets = self.inner.stylesheets.borrow_mut();
        for info in sheets.values_mut() {
            reduce_font_sources(&mut info.sheet.rules);
        }
    }

    // -----------------------------------------------------------------
    // Stage 3 — sequential
    // -----------------------------------------------------------------

    /// Serialize every parsed stylesheet back into its element; elements
    /// whose stylesheet was dropped are removed, and `<link>` stylesheets
    /// become inline `<style>` elements.
    fn replace_stylesheets(&self) {
        let Some(doc) = self.doc() else { return };
        let sheet_attribute = constants::stylesheet_index_attribute(self.session_id());
        let sheets = self.inner.stylesheets.borrow();
        let mut kept = 0u64;
        let mut dropped = 0u64;
        for style in dom::select_all(&doc, "style") {
            let info = style
                .attributes
                .borrow()
                .get(sheet_attribute.as_str())
                .and_then(|value| value.parse::<usize>().ok())
                .and_then(|index| sheets.get(&index));
            match info {
                Some(info) => {
                    kept += 1;
                    dom::set_text_content(style.as_node(), &info.sheet.generate());
                    if let Some(media) = &info.media {
                        style.attributes.borrow_mut().insert("media", media.clone());
                    }
                }
                None => {
                    dropped += 1;
                    style.as_node().detach();
                }
            }
        }
        for link in dom::select_all(&doc, "link[rel*=\"stylesheet\"]") {
            let index = link
                .attributes
                .borrow()
                .get(sheet_attribute.as_str())
                .and_then(|value| value.parse::<usize>().ok());
            match index.and_then(|index| sheets.get(&index)) {
                Some(info) => {
                    kept += 1;
                    let mut attributes: Vec<(&str, &str)> = Vec::new();
                    if let Some(media) = &info.media {
                        attributes.push(("media", media.as_str()));
                    }
                    if let Some(style) = dom::create_element("style", &attributes) {
                        dom::set_text_content(&style, &info.sheet.generate());
                        link.as_node().insert_before(style);
                    }
                    link.as_node().detach();
                }
                None => {
                    dropped += 1;
                    link.as_node().detach();
                }
            }
        }
        self.set_stat(Tally::Processed, ResourceCategory::Stylesheets, kept);
        self.set_stat(Tally::Discarded, ResourceCategory::Stylesheets, dropped);
    }

    /// Serialize parsed `style` attributes back from their trees.
    fn replace_style_attributes(&self) {
        let Some(doc) = self.doc() else { return };
        let style_attribute = constants::style_index_attribute(self.session_id());
        let styles = self.inner.styles.borrow();
        for element in dom::select_all(&doc, "[style]") {
            let declarations = {
                let attributes = element.attributes.borrow();
                attributes
                    .get(style_attribute.as_str())
                    .and_then(|value| value.parse::<usize>().ok())
                    .and_then(|index| styles.get(&index))
            };
            let text = declarations
                .map(crate::css::generate_declarations)
                .unwrap_or_default();
            element.attributes.borrow_mut().insert("style", text);
        }
    }

    /// Emit the shared custom properties for de-duplicated resources.
    fn insert_css_variables(&self) {
        let Some(doc) = self.doc() else { return };
        let variables = self.inner.css_variables.borrow();
        if variables.is_empty() {
            return;
        }
        let declarations: Vec<String> = variables
            .iter()
            .map(|(index, content)| {
                format!("{}{index}:url(\"{content}\")", utils::CSS_VARIABLE_PREFIX)
            })
            .collect();
        let Some(style) = dom::create_element("style", &[]) else { return };
        dom::set_text_content(&style, &format!(":root{{{}}}", declarations.join(";")));
        let Some(head) = dom::head(&doc) else { return };
        match dom::select_first(&head, "style") {
            Some(first_style) => first_style.as_node().insert_before(style),
            None => head.append(style),
        }
    }

    /// Whitespace/comment compression over the final document.
    fn compress_html(&self) {
        let Some(doc) = self.doc() else { return };
        let display_stats = self.options().display_stats;
        let before = if display_stats { dom::serialize(&doc).len() as u64 } else { 0 };
        dom::compress(&doc, &constants::preserved_space_attribute(self.session_id()));
        if display_stats {
            let after = dom::serialize(&doc).len() as u64;
            self.add_stat(
                Tally::Discarded,
                ResourceCategory::HtmlBytes,
                before.saturating_sub(after),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// CSS pruning helpers
// ---------------------------------------------------------------------------

const RECURSIVE_GROUPS: [&str; 5] = ["media", "supports", "document", "layer", "container"];

fn remove_unused_rules(
    rules: &mut NodeSeq<Rule>,
    doc: &NodeRef,
    processed: &mut u64,
    discarded: &mut u64,
) {
    for index in rules.indices() {
        let remove = match rules.get_mut(index) {
            Some(Rule::Style(style)) => {
                *processed += 1;
                !selector_matches(doc, &style.prelude)
            }
            Some(Rule::Group(group))
                if RECURSIVE_GROUPS.contains(&group.name.to_lowercase().as_str()) =>
            {
                remove_unused_rules(&mut group.rules, doc, processed, discarded);
                false
            }
            _ => false,
        };
        if remove {
            rules.remove(index);
            *discarded += 1;
        }
    }
}

/// Whether any alternative of the selector list matches the document.
/// Pseudo-classes are stripped before matching; selectors the engine
/// cannot evaluate are treated as matching.
fn selector_matches(doc: &NodeRef, prelude: &str) -> bool {
    for selector in prelude.split(',') {
        let stripped = match selector.find(':') {
            Some(at) => &selector[..at],
            None => selector,
        };
        let stripped = stripped.trim();
        if stripped.is_empty() {
            return true;
        }
        match doc.select(stripped) {
            Ok(mut matches) => {
                if matches.next().is_some() {
                    return true;
                }
            }
            Err(()) => return true,
        }
    }
    false
}

/// A media query list that cannot apply on screen: every alternative
/// names a non-screen media type.
fn media_query_never_screen(prelude: &str) -> bool {
    const NON_SCREEN: [&str; 8] =
        ["print", "speech", "aural", "projection", "tty", "tv", "handheld", "braille"];
    let prelude = prelude.to_lowercase();
    if prelude.trim().is_empty() {
        return false;
    }
    prelude.split(',').all(|alternative| {
        let mut words = alternative.split_whitespace();
        let first = match words.next() {
            Some("not") | Some("only") => words.next(),
            other => other,
        };
        first.map(|word| NON_SCREEN.contains(&word)).unwrap_or(false)
    })
}

fn collect_used_families(rules: &NodeSeq<Rule>, used: &mut std::collections::BTreeSet<String>) {
    for (_, rule) in rules.iter() {
        match rule {
            Rule::Style(style) => collect_used_families_from_declarations(&style.declarations, used),
            Rule::Group(group) => collect_used_families(&group.rules, used),
            _ => {}
        }
    }
}

fn collect_used_families_from_declarations(
    declarations: &NodeSeq<Declaration>,
    used: &mut std::collections::BTreeSet<String>,
) {
    for (_, declaration) in declarations.iter() {
        let property = declaration.property.to_lowercase();
        if property == "font-family" || property == "font" {
            for family in declaration.value_text().split(',') {
                used.insert(family.trim().trim_matches(['"', '\'']).to_lowercase());
            }
        }
    }
}

fn remove_unused_font_faces(rules: &mut NodeSeq<Rule>, used: &std::collections::BTreeSet<String>) {
    for index in rules.indices() {
        let remove = match rules.get_mut(index) {
            Some(Rule::DeclarationBlock(block)) if block.name.eq_ignore_ascii_case("font-face") => {
                font_face_family(block).map(|family| !used.contains(&family)).unwrap_or(false)
            }
            Some(Rule::Group(group)) => {
                remove_unused_font_faces(&mut group.rules, used);
                false
            }
            _ => false,
        };
        if remove {
            rules.remove(index);
        }
    }
}

fn font_face_family(block: &crate::css::DeclarationBlockRule) -> Option<String> {
    for (_, declaration) in block.declarations.iter() {
        if declaration.property.eq_ignore_ascii_case("font-family") {
            return Some(
                declaration.value_text().trim().trim_matches(['"', '\'']).to_lowercase(),
            );
        }
    }
    None
}

/// Reduce multi-candidate `@font-face` `src` descriptors to one
/// candidate, preferring woff2.
fn reduce_font_sources(rules: &mut NodeSeq<Rule>) {
    for index in rules.indices() {
        match rules.get_mut(index) {
            Some(Rule::DeclarationBlock(block)) if block.name.eq_ignore_ascii_case("font-face") => {
                for (_, declaration) in block.declarations.iter_mut() {
                    if declaration.property.eq_ignore_ascii_case("src") {
                        reduce_src_candidates(declaration);
                    }
                }
            }
            Some(Rule::Group(group)) => reduce_font_sources(&mut group.rules),
            _ => {}
        }
    }
}

fn reduce_src_candidates(declaration: &mut Declaration) {
    use crate::css::ValueToken;

    let mut candidates: Vec<Vec<ValueToken>> = vec![Vec::new()];
    for token in declaration.value.drain(..) {
        match token {
            ValueToken::Raw(raw) if raw.contains(',') => {
                let mut pieces = raw.split(',').peekable();
                while let Some(piece) = pieces.next() {
                    if !piece.is_empty() {
                        if let Some(current) = candidates.last_mut() {
                            current.push(ValueToken::Raw(piece.to_string()));
                        }
                    }
                    if pieces.peek().is_some() {
                        candidates.push(Vec::new());
                    }
                }
            }
            token => {
                if let Some(current) = candidates.last_mut() {
                    current.push(token);
                }
            }
        }
    }
    let has_url =
        |candidate: &Vec<ValueToken>| candidate.iter().any(|t| matches!(t, ValueToken::Url(_)));
    let mentions_woff2 = |candidate: &Vec<ValueToken>| {
        candidate.iter().any(|token| match token {
            ValueToken::Raw(raw) => raw.to_lowercase().contains("woff2"),
            ValueToken::Url(url) => url.to_lowercase().contains("woff2"),
            ValueToken::Var(_) => false,
        })
    };
    let chosen = candidates
        .iter()
        .position(|candidate| has_url(candidate) && mentions_woff2(candidate))
        .or_else(|| candidates.iter().position(has_url));
    match chosen {
        Some(position) => declaration.value = candidates.swap_remove(position),
        None => {
            declaration.value = candidates.into_iter().flatten().collect();
        }
    }
}
