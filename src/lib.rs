//! snapdoc — document snapshot compiler.
//!
//! Takes a parsed document plus side-channel capture data (canvas
//! bitmaps, font descriptors, image state, shadow-root contents, nested
//! frame payloads) and produces one self-contained HTML document with
//! every external resource resolved, deduplicated and inlined or removed
//! according to a configuration profile.
//!
//! The pipeline runs in four ordered stages per document (resolve URLs,
//! replace data, replace documents, post-process), recursing into frames
//! and HTML imports while all documents share one deduplicated resource
//! batch. One broken resource never aborts a capture; only the root
//! document's initial load can.

pub mod batch_request;
pub mod capture;
pub mod config;
pub mod css;
pub mod dom;
pub mod fetch;
pub mod helper;
pub mod processor;
pub mod progress;
pub mod runner;
pub mod stats;
pub mod utils;

pub use batch_request::{BatchRequest, RequestKey, ResourceTicket, RetrievedResource};
pub use capture::{
    CaptureData, FramePayload, ImageMeta, PageCapture, PageData, SessionIdSource, ShadowRootData,
    capture_page,
};
pub use config::CaptureOptions;
pub use fetch::{FetchError, FetchOptions, FetchedResource, HttpFetcher, MemoryFetcher, ResourceFetcher};
pub use progress::{ProgressEvent, ProgressListener};
pub use stats::{ResourceCategory, StatsData};
