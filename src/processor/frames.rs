//! Child document handling: frames (plus materialized shadow roots) and
//! HTML imports.
//!
//! Stage 0 constructs a child runner per captured frame/import, sharing
//! the parent's batch so every nested resource lands in the same
//! deduplicated retrieval. Stage 2 folds the finished child captures back
//! into the parent document and merges their statistics.

use futures::future::join_all;
use kuchiki::{ElementData, NodeDataRef};
use once_cell::sync::Lazy;
use regex::Regex;

use super::Processor;
use crate::dom;
use crate::runner::Runner;
use crate::stats::{ResourceCategory, Tally};
use crate::utils::constants::{import_index_attribute, window_id_attribute};
use crate::utils::{is_ignored_path, is_valid_path, normalize_url};

static SCRIPT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<script").unwrap());
static NOSCRIPT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<noscript").unwrap());

impl Processor {
    /// Start a child runner for every frame that has captured content.
    /// Children run through `load_page` + `initialize` here so their
    /// resources are registered before the shared batch fires.
    pub(crate) async fn resolve_frame_urls(&self) {
        if self.options().save_raw_page {
            return;
        }
        let Some(doc) = self.doc() else { return };
        let window_attribute = window_id_attribute(self.options().session_id);

        let mut pending = Vec::new();
        for element in dom::select_all(&doc, "iframe, frame, object[type=\"text/html\"][data]") {
            let window_id = element
                .attributes
                .borrow()
                .get(window_attribute.as_str())
                .map(str::to_string);
            set_frame_empty_source(&element);
            let Some(window_id) = window_id else { continue };
            let payload = {
                let mut frames = self.inner.frames.borrow_mut();
                frames.iter_mut().find(|frame| frame.window_id == window_id).and_then(|frame| {
                    frame
                        .content
                        .clone()
                        .map(|content| (content, frame.base_uri.clone(), frame.capture.clone()))
                })
            };
            let Some((content, base_uri, capture)) = payload else { continue };
            pending.push((window_id, content, base_uri, capture));
        }

        let started = join_all(pending.into_iter().map(
            |(window_id, content, base_uri, capture)| async move {
                let child_options = self.options().for_child_document(base_uri);
                let mut runner = Runner::new(
                    child_options,
                    capture,
                    Some(content),
                    false,
                    self.inner.batch.clone(),
                    self.inner.fetcher.clone(),
                    self.inner.listener.clone(),
                );
                if runner.load_page().await.is_err() || runner.initialize().await.is_err() {
                    return (window_id, None, 0);
                }
                let max_resources = self.inner.batch.max_keys();
                (window_id, Some(Box::new(runner)), max_resources)
            },
        ))
        .await;

        let mut frames = self.inner.frames.borrow_mut();
        for (window_id, runner, max_resources) in started {
            if let Some(frame) = frames.iter_mut().find(|frame| frame.window_id == window_id) {
                frame.runner = runner;
                frame.max_resources = max_resources;
            }
        }
    }

    /// Start a child runner per HTML import link; the import document is
    /// fetched by the child itself.
    pub(crate) async fn resolve_import_links(&self) {
        let Some(doc) = self.doc() else { return };
        let import_attribute = import_index_attribute(self.options().session_id);

        let mut pending = Vec::new();
        for element in dom::select_all(&doc, "link[rel=\"import\"][href]") {
            let href = {
                let mut attributes = element.attributes.borrow_mut();
                let href = attributes.get("href").unwrap_or("").to_string();
                attributes.remove("href");
                href
            };
            let resource_url = normalize_url(&href);
            if is_ignored_path(&resource_url)
                || !is_valid_path(&resource_url, &self.inner.base_uri, &self.options().url)
            {
                continue;
            }
            let index = self.inner.next_import_index.get();
            self.inner.next_import_index.set(index + 1);
            element
                .attributes
                .borrow_mut()
                .insert(import_attribute.as_str(), index.to_string());
            pending.push((index, resource_url));
        }

        let started = join_all(pending.into_iter().map(|(index, resource_url)| async move {
            let child_options = self.options().for_child_document(resource_url);
            let mut runner = Runner::new(
                child_options,
                Default::default(),
                None,
                false,
                self.inner.batch.clone(),
                self.inner.fetcher.clone(),
                self.inner.listener.clone(),
            );
            if runner.load_page().await.is_err() || runner.initialize().await.is_err() {
                return (index, None);
            }
            (index, Some(runner))
        }))
        .await;

        let mut imports = self.inner.import_runners.borrow_mut();
        for (index, runner) in started {
            if let Some(runner) = runner {
                imports.insert(index, runner);
            }
        }
    }

    /// Fold finished frame captures into their elements. A frame whose
    /// child capture never started is left with its emptied source and
    /// counted as discarded.
    pub(crate) async fn process_frames(&self) {
        let Some(doc) = self.doc() else { return };
        let window_attribute = window_id_attribute(self.options().session_id);
        for element in dom::select_all(&doc, "iframe, frame, object[type=\"text/html\"][data]") {
            let window_id = element
                .attributes
                .borrow()
                .get(window_attribute.as_str())
                .map(str::to_string);
            let Some(window_id) = window_id else { continue };
            let (known, runner) = {
                let mut frames = self.inner.frames.borrow_mut();
                match frames.iter_mut().find(|frame| frame.window_id == window_id) {
                    Some(frame) => (true, frame.runner.take()),
                    None => (false, None),
                }
            };
            if !known {
                continue;
            }
            let Some(mut runner) = runner else {
                self.inner.stats.borrow_mut().add(Tally::Discarded, ResourceCategory::Frames, 1);
                continue;
            };
            self.inner.stats.borrow_mut().add(Tally::Processed, ResourceCategory::Frames, 1);
            let page = match runner.run().await {
                Ok(()) => runner.page_data(),
                Err(error) => Err(error),
            };
            match page {
                Ok(page) => {
                    element.attributes.borrow_mut().remove(window_attribute.as_str());
                    let sandbox = if SCRIPT_TAG.is_match(&page.content)
                        || NOSCRIPT_TAG.is_match(&page.content)
                    {
                        "allow-scripts allow-same-origin"
                    } else {
                        ""
                    };
                    element.attributes.borrow_mut().insert("sandbox", sandbox.to_string());
                    set_frame_content(&element, &page.content);
                    self.inner.stats.borrow_mut().merge_from(page.stats.as_ref());
                }
                Err(error) => {
                    log::warn!("frame {window_id} failed to fold in: {error}");
                    self.inner
                        .stats
                        .borrow_mut()
                        .add(Tally::Discarded, ResourceCategory::Frames, 1);
                }
            }
        }
    }

    /// Fold finished import captures back into their links as
    /// `data:text/html` references.
    pub(crate) async fn process_html_imports(&self) {
        let Some(doc) = self.doc() else { return };
        let import_attribute = import_index_attribute(self.options().session_id);
        for element in dom::select_all(&doc, "link[rel=\"import\"]") {
            let index = element
                .attributes
                .borrow()
                .get(import_attribute.as_str())
                .and_then(|value| value.parse::<usize>().ok());
            let Some(index) = index else { continue };
            let runner = self.inner.import_runners.borrow_mut().remove(&index);
            let Some(mut runner) = runner else {
                self.inner
                    .stats
                    .borrow_mut()
                    .add(Tally::Discarded, ResourceCategory::HtmlImports, 1);
                continue;
            };
            self.inner.stats.borrow_mut().add(Tally::Processed, ResourceCategory::HtmlImports, 1);
            let page = match runner.run().await {
                Ok(()) => runner.page_data(),
                Err(error) => Err(error),
            };
            match page {
                Ok(page) => {
                    element
                        .attributes
                        .borrow_mut()
                        .insert("href", format!("data:text/html,{}", page.content));
                    self.inner.stats.borrow_mut().merge_from(page.stats.as_ref());
                }
                Err(error) => {
                    log::warn!("import {index} failed to fold in: {error}");
                    self.inner
                        .stats
                        .borrow_mut()
                        .add(Tally::Discarded, ResourceCategory::HtmlImports, 1);
                }
            }
        }
    }
}

/// Blank a frame's source while its content is pending.
fn set_frame_empty_source(element: &NodeDataRef<ElementData>) {
    let mut attributes = element.attributes.borrow_mut();
    if (*element.name.local).eq_ignore_ascii_case("object") {
        attributes.insert("data", "data:text/html,".to_string());
    } else {
        attributes.remove("src");
        attributes.remove("srcdoc");
    }
}

/// Embed a finished child document into its frame element, using the
/// encoding each element kind supports.
fn set_frame_content(element: &NodeDataRef<ElementData>, content: &str) {
    let mut attributes = element.attributes.borrow_mut();
    if (*element.name.local).eq_ignore_ascii_case("object") {
        attributes.insert("data", format!("data:text/html,{content}"));
    } else if (*element.name.local).eq_ignore_ascii_case("frame") {
        attributes.insert("src", format!("data:text/html,{}", content.replace('#', "%23")));
    } else {
        attributes.insert("srcdoc", content.to_string());
        attributes.remove("src");
    }
}
