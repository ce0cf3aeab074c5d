//! Public entry point.
//!
//! [`PageCapture`] wraps one top-level [`Runner`], owns the shared
//! [`BatchRequest`] for the whole document tree, and drives the capture
//! through its phases. Only the root document's fetch or parse failure is
//! fatal; every other error degrades locally inside the pipeline.

pub mod data;

pub use data::{
    CanvasData, CaptureData, FontFaceData, FrameData, FramePayload, ImageMeta, ShadowRootData,
};

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use serde::Serialize;

use crate::batch_request::BatchRequest;
use crate::config::CaptureOptions;
use crate::fetch::ResourceFetcher;
use crate::progress::ProgressListener;
use crate::runner::Runner;
use crate::stats::StatsData;

/// Final output of one capture.
#[derive(Debug, Clone, Serialize)]
pub struct PageData {
    /// Counter tables; `None` unless statistics display was enabled.
    pub stats: Option<StatsData>,
    pub title: String,
    pub filename: String,
    pub content: String,
}

/// Explicit session-id source for hosts that run several captures and
/// need distinct helper-attribute scopes per capture.
#[derive(Debug, Default)]
pub struct SessionIdSource {
    next: Cell<u32>,
}

impl SessionIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        let id = self.next.get();
        self.next.set(id.wrapping_add(1));
        id
    }
}

/// One in-flight capture of a document tree.
pub struct PageCapture {
    runner: Runner,
}

impl PageCapture {
    /// Build a capture. `content` carries the pre-serialized document when
    /// the host already holds it; without it the document is fetched from
    /// `options.url`.
    pub fn new(
        options: CaptureOptions,
        capture_data: CaptureData,
        content: Option<String>,
        fetcher: Rc<dyn ResourceFetcher>,
        listener: Option<ProgressListener>,
    ) -> Self {
        let batch = Rc::new(BatchRequest::new());
        Self {
            runner: Runner::new(options, capture_data, content, true, batch, fetcher, listener),
        }
    }

    /// Load and parse the document, then run stage 0 and start stage 1 in
    /// the background so resources are registered before retrieval.
    pub async fn load(&mut self) -> Result<()> {
        self.runner.load_page().await?;
        self.runner.initialize().await
    }

    /// Retrieve every registered resource and run the remaining stages.
    pub async fn run(&mut self) -> Result<()> {
        self.runner.run().await
    }

    /// Serialize the finished document.
    pub fn page_data(&mut self) -> Result<PageData> {
        self.runner.page_data()
    }
}

/// Convenience wrapper driving a capture end to end.
pub async fn capture_page(
    options: CaptureOptions,
    capture_data: CaptureData,
    content: Option<String>,
    fetcher: Rc<dyn ResourceFetcher>,
    listener: Option<ProgressListener>,
) -> Result<PageData> {
    let mut capture = PageCapture::new(options, capture_data, content, fetcher, listener);
    capture.load().await?;
    capture.run().await?;
    capture.page_data()
}
