//! Asynchronous resource-resolving tasks.
//!
//! Each task does its document walk and batch registration synchronously
//! up front, then awaits the resolutions. That split is what lets the
//! runner start these tasks, let every registration land, and only then
//! fire the shared batch.

use futures::future::join_all;

use super::{Processor, StylesheetInfo};
use crate::css::{Rule, TokenLoc};
use crate::dom;
use crate::fetch::FetchOptions;
use crate::helper::{self, CssJob, ResourceMaps};
use crate::stats::{ResourceCategory, Tally};
use crate::utils::constants::stylesheet_index_attribute;
use crate::utils;

const PREFIX_DATA_URI_IMAGE: &str = "data:image/";
const PREFIX_DATA_URI_IMAGE_SVG: &str = "data:image/svg+xml";
const PREFIX_DATA_URI_AUDIO: &str = "data:audio/";
const PREFIX_DATA_URI_VIDEO: &str = "data:video/";

enum SheetOrigin {
    Inline(String),
    Link { href: String, charset: Option<String> },
}

impl Processor {
    /// Collect every `<style>` and stylesheet `<link>`, retrieve and
    /// flatten their text (imports included) and parse it into a syntax
    /// tree. Elements whose sheet fails to parse or resolve get no entry
    /// and are removed in stage 3.
    pub(crate) async fn resolve_stylesheet_urls(&self) {
        let Some(doc) = self.doc() else { return };
        let sheet_attribute = stylesheet_index_attribute(self.options().session_id);
        let document_charset = self.inner.charset.borrow().clone();

        let mut sources = Vec::new();
        for element in dom::select_all(&doc, "style, link[rel*=\"stylesheet\"]") {
            let index = self.inner.next_sheet_index.get();
            self.inner.next_sheet_index.set(index + 1);
            let (media, origin) = {
                let attributes = element.attributes.borrow();
                let media = attributes
                    .get("media")
                    .map(|media| media.to_lowercase())
                    .filter(|media| !media.is_empty());
                let origin = if (*element.name.local).eq_ignore_ascii_case("link") {
                    SheetOrigin::Link {
                        href: attributes.get("href").unwrap_or("").to_string(),
                        charset: attributes
                            .get("charset")
                            .map(str::to_string)
                            .or_else(|| document_charset.clone()),
                    }
                } else {
                    SheetOrigin::Inline(element.as_node().text_contents())
                };
                (media, origin)
            };
            element
                .attributes
                .borrow_mut()
                .insert(sheet_attribute.as_str(), index.to_string());
            sources.push((index, media, origin));
        }

        join_all(sources.into_iter().map(|(index, media, origin)| async move {
            let options = self.options();
            let content = match origin {
                SheetOrigin::Inline(text) => Some(
                    helper::resolve_import_urls(
                        self.inner.fetcher.clone(),
                        text,
                        self.inner.base_uri.clone(),
                        options.clone(),
                        0,
                    )
                    .await,
                ),
                SheetOrigin::Link { href, charset } => {
                    helper::resolve_link_stylesheet(
                        &self.inner.fetcher,
                        &href,
                        &self.inner.base_uri,
                        charset,
                        options,
                    )
                    .await
                }
            };
            let Some(content) = content else { return };
            match crate::css::parse_stylesheet(&content) {
                Ok(mut sheet) => {
                    if options.compress_css {
                        strip_raw_line_comments(&mut sheet);
                    }
                    self.inner
                        .stylesheets
                        .borrow_mut()
                        .insert(index, StylesheetInfo { media, sheet });
                }
                Err(error) => {
                    log::debug!("discarding unparseable stylesheet: {error}");
                }
            }
        }))
        .await;
    }

    /// Resolve and inline every `url()` across the parsed stylesheets.
    pub(crate) async fn process_stylesheets(&self) {
        let mut jobs: Vec<(usize, CssJob)> = Vec::new();
        {
            let mut sheets = self.inner.stylesheets.borrow_mut();
            for (&index, info) in sheets.iter_mut() {
                let mut sheet_jobs = Vec::new();
                helper::collect_stylesheet_jobs(
                    &mut info.sheet,
                    &self.inner.base_uri,
                    self.options(),
                    &self.inner.batch,
                    &mut sheet_jobs,
                );
                jobs.extend(sheet_jobs.into_iter().map(|job| (index, job)));
            }
        }
        for (index, job) in jobs {
            let loc = job.loc.clone();
            let update = job.resolve(self.options()).await;
            let mut sheets = self.inner.stylesheets.borrow_mut();
            if let Some(info) = sheets.get_mut(&index) {
                helper::apply_token_update(
                    info.sheet.token_mut(&loc),
                    update,
                    &self.inner.css_variables,
                );
            }
        }
    }

    /// Resolve and inline every `url()` across the parsed `style`
    /// attributes.
    pub(crate) async fn process_style_attributes(&self) {
        let mut jobs: Vec<(usize, CssJob)> = Vec::new();
        {
            let mut styles = self.inner.styles.borrow_mut();
            for (&index, declarations) in styles.iter_mut() {
                let mut style_jobs = Vec::new();
                helper::collect_declaration_jobs(
                    declarations,
                    Vec::new(),
                    helper::CssJobKind::Style,
                    &self.inner.base_uri,
                    self.options(),
                    &self.inner.batch,
                    &mut style_jobs,
                );
                jobs.extend(style_jobs.into_iter().map(|job| (index, job)));
            }
        }
        for (index, job) in jobs {
            let TokenLoc { declaration, token, .. } = job.loc.clone();
            let update = job.resolve(self.options()).await;
            let mut styles = self.inner.styles.borrow_mut();
            if let Some(declarations) = styles.get_mut(&index) {
                let token = declarations
                    .get_mut(declaration)
                    .and_then(|declaration| declaration.value.get_mut(token));
                helper::apply_token_update(token, update, &self.inner.css_variables);
            }
        }
    }

    /// Inline the generic page resources: icons, images, SVG embeds,
    /// posters, legacy `background` attributes, srcset candidates, SVG
    /// cross references, and audio/video sources that survived removal.
    pub(crate) async fn process_page_resources(&self) {
        let Some(doc) = self.doc() else { return };
        let options = self.options();
        let images = self.inner.capture.borrow().images.clone();
        let maps = || ResourceMaps {
            css_variables: &self.inner.css_variables,
            styles: &self.inner.styles,
            next_style_index: &self.inner.next_style_index,
        };
        // Shared by reference so every task future can build its own view.
        let maps = &maps;

        struct AttributePass {
            selector: &'static str,
            attribute: &'static str,
            prefix: &'static str,
            process_duplicates: bool,
            remove_if_missing: bool,
        }
        static PASSES: [AttributePass; 7] = [
            AttributePass {
                selector: "link[href][rel*=\"icon\"]",
                attribute: "href",
                prefix: "data:",
                process_duplicates: false,
                remove_if_missing: true,
            },
            AttributePass {
                selector: "object[type=\"image/svg+xml\"], object[type=\"image/svg-xml\"]",
                attribute: "data",
                prefix: PREFIX_DATA_URI_IMAGE_SVG,
                process_duplicates: false,
                remove_if_missing: false,
            },
            AttributePass {
                selector: "img[src], input[src][type=\"image\"]",
                attribute: "src",
                prefix: PREFIX_DATA_URI_IMAGE,
                process_duplicates: true,
                remove_if_missing: false,
            },
            AttributePass {
                selector: "embed[src*=\".svg\"]",
                attribute: "src",
                prefix: PREFIX_DATA_URI_IMAGE_SVG,
                process_duplicates: false,
                remove_if_missing: false,
            },
            AttributePass {
                selector: "video[poster]",
                attribute: "poster",
                prefix: PREFIX_DATA_URI_IMAGE,
                process_duplicates: false,
                remove_if_missing: false,
            },
            AttributePass {
                selector: "*[background]",
                attribute: "background",
                prefix: PREFIX_DATA_URI_IMAGE,
                process_duplicates: false,
                remove_if_missing: false,
            },
            AttributePass {
                selector: "image",
                attribute: "xlink:href",
                prefix: PREFIX_DATA_URI_IMAGE,
                process_duplicates: false,
                remove_if_missing: false,
            },
        ];

        let mut tasks: Vec<futures::future::LocalBoxFuture<'_, ()>> = Vec::new();
        for pass in &PASSES {
            let elements = dom::select_all(&doc, pass.selector);
            let images = &images;
            tasks.push(Box::pin(async move {
                helper::process_attribute(
                    elements,
                    pass.attribute,
                    pass.prefix,
                    &self.inner.base_uri,
                    options,
                    &self.inner.batch,
                    maps(),
                    images,
                    pass.process_duplicates,
                    pass.remove_if_missing,
                )
                .await;
            }));
        }
        tasks.push(Box::pin(helper::process_xlinks(
            dom::select_all(&doc, "use"),
            &self.inner.base_uri,
            options,
            &self.inner.batch,
        )));
        tasks.push(Box::pin(helper::process_srcset(
            dom::select_all(&doc, "img[srcset], source[srcset]"),
            &self.inner.base_uri,
            options,
            &self.inner.batch,
        )));
        if !options.remove_audio_sources {
            let elements = dom::select_all(&doc, "audio[src], audio > source[src]");
            let images = &images;
            tasks.push(Box::pin(async move {
                helper::process_attribute(
                    elements,
                    "src",
                    PREFIX_DATA_URI_AUDIO,
                    &self.inner.base_uri,
                    options,
                    &self.inner.batch,
                    maps(),
                    images,
                    false,
                    false,
                )
                .await;
            }));
        }
        if !options.remove_video_sources {
            let elements = dom::select_all(&doc, "video[src], video > source[src]");
            let images = &images;
            tasks.push(Box::pin(async move {
                helper::process_attribute(
                    elements,
                    "src",
                    PREFIX_DATA_URI_VIDEO,
                    &self.inner.base_uri,
                    options,
                    &self.inner.batch,
                    maps(),
                    images,
                    false,
                    false,
                )
                .await;
            }));
        }
        join_all(tasks).await;
        self.process_shortcut_icons(&doc);
    }

    /// Inline external script sources as data URIs. Direct fetches, not
    /// batch-registered: scripts are never deduplicated against images.
    pub(crate) async fn process_scripts(&self) {
        let Some(doc) = self.doc() else { return };
        let options = self.options();
        let mut jobs = Vec::new();
        for script in dom::select_all(&doc, "script[src]") {
            let source = {
                let mut attributes = script.attributes.borrow_mut();
                let source = attributes.get("src").unwrap_or("").to_string();
                attributes.remove("src");
                source
            };
            dom::set_text_content(script.as_node(), "");
            let Some(resolved) = utils::resolve_url(&source, &self.inner.base_uri) else {
                continue;
            };
            if !utils::is_fetchable_url(&resolved, &self.inner.base_uri, &options.url) {
                continue;
            }
            self.inner.stats.borrow_mut().add(Tally::Processed, ResourceCategory::Scripts, 1);
            jobs.push((script, resolved));
        }
        join_all(jobs.into_iter().map(|(script, resolved)| async move {
            let fetch_options = FetchOptions {
                as_data_uri: true,
                max_size: options.max_resource_size,
                max_size_enabled: options.max_resource_size_enabled,
                charset: None,
            };
            match self.inner.fetcher.fetch(&resolved, &fetch_options).await {
                Ok(fetched) => {
                    script.attributes.borrow_mut().insert("src", fetched.data);
                }
                Err(error) => {
                    log::debug!("dropping unreachable script {resolved}: {error}");
                }
            }
        }))
        .await;
    }

    /// Elect one shortcut icon and drop the alternatives.
    fn process_shortcut_icons(&self, doc: &kuchiki::NodeRef) {
        let mut candidates: Vec<_> = dom::select_all(doc, "link[href][rel=\"icon\"]");
        candidates.extend(dom::select_all(doc, "link[href][rel=\"shortcut icon\"]"));
        candidates.retain(|link| {
            link.attributes.borrow().get("href").unwrap_or("") != utils::EMPTY_IMAGE
        });
        let mut promoted = false;
        if candidates.is_empty() {
            candidates = dom::select_all(doc, "link[href][rel*=\"icon\"]");
            candidates.retain(|link| {
                link.attributes.borrow().get("href").unwrap_or("") != utils::EMPTY_IMAGE
            });
            promoted = true;
        }
        candidates.sort_by_key(|link| {
            let size = link
                .attributes
                .borrow()
                .get("sizes")
                .and_then(|sizes| {
                    sizes.split(['x', 'X']).next().and_then(|width| width.trim().parse::<u32>().ok())
                })
                .unwrap_or(16);
            std::cmp::Reverse(size)
        });
        let Some(elected) = candidates.first() else { return };
        if promoted {
            elected.attributes.borrow_mut().insert("rel", "icon".to_string());
        }
        let elected_node = elected.as_node().clone();
        for link in dom::select_all(doc, "link[rel*=\"icon\"]") {
            if link.as_node() != &elected_node {
                link.as_node().detach();
            }
        }
    }
}

fn strip_raw_line_comments(sheet: &mut crate::css::Stylesheet) {
    for index in sheet.rules.indices() {
        let remove = matches!(
            sheet.rules.get(index),
            Some(Rule::Raw(raw)) if raw.trim_start().starts_with("//")
        );
        if remove {
            sheet.rules.remove(index);
        }
    }
}
