//! Side-channel capture data.
//!
//! State the upstream DOM-harvesting step collected from the live page
//! before this pipeline runs: canvas bitmaps, font descriptors, image
//! rendering metadata, video posters, shadow-root payloads and nested
//! frame contents. Elements are tied to entries through session-scoped
//! index attributes stamped upstream.

use std::collections::BTreeMap;

use crate::runner::Runner;

/// One canvas's rasterized content.
#[derive(Debug, Clone)]
pub struct CanvasData {
    pub data_uri: String,
}

/// Descriptor map of one `@font-face` the live page had loaded
/// (`font-family`, `src`, `font-style`, ...). Ordered so the emitted
/// stylesheet is deterministic.
pub type FontFaceData = BTreeMap<String, String>;

/// Rendering metadata of one image element.
#[derive(Debug, Clone, Default)]
pub struct ImageMeta {
    /// The source actually displayed (after srcset/picture selection).
    pub current_src: Option<String>,
    pub px_width: u32,
    pub px_height: u32,
    /// Whether the image may be swapped for a styled placeholder when it
    /// turns out to be a duplicate.
    pub replaceable: bool,
    pub object_fit: Option<String>,
    pub object_position: Option<String>,
    pub background_color: Option<String>,
}

/// Serialized contents of one shadow root.
#[derive(Debug, Clone)]
pub struct ShadowRootData {
    pub content: String,
    /// Rendered height of the host, used to size the materialized frame.
    pub px_height: u32,
}

/// Captured payload of one nested browsing context.
#[derive(Debug, Clone)]
pub struct FramePayload {
    /// Identifier matching the frame element's window-id attribute.
    pub window_id: String,
    /// Serialized frame document; `None` when the frame was unreachable.
    pub content: Option<String>,
    pub base_uri: String,
    /// The frame's own side-channel data.
    pub capture: CaptureData,
}

/// Everything the upstream capture step hands this pipeline for one
/// document.
#[derive(Debug, Clone, Default)]
pub struct CaptureData {
    /// Per-canvas bitmaps, in document order of `<canvas>` elements.
    pub canvases: Vec<Option<CanvasData>>,
    /// Loaded font descriptors to re-emit as `@font-face` rules.
    pub fonts: Vec<FontFaceData>,
    /// Image metadata, indexed by the image index attribute.
    pub images: Vec<ImageMeta>,
    /// Poster frames for videos without one, in document order.
    pub posters: Vec<Option<String>>,
    /// Computed replacement texts for `<style>` elements, in document
    /// order.
    pub stylesheet_contents: Vec<Option<String>>,
    /// Shadow root payloads, in document order of marked hosts.
    pub shadow_roots: Vec<Option<ShadowRootData>>,
    /// Font families the live page actually used.
    pub used_fonts: Vec<String>,
    /// Nested frame payloads.
    pub frames: Vec<FramePayload>,
}

/// Runtime record of one frame during a capture: the payload plus, once
/// stage 0 started it, the child runner driving the frame's own pipeline.
pub struct FrameData {
    pub window_id: String,
    pub content: Option<String>,
    pub base_uri: String,
    pub capture: CaptureData,
    pub(crate) runner: Option<Box<Runner>>,
    /// Distinct resource count observed when the child finished
    /// initializing.
    pub max_resources: usize,
}

impl From<FramePayload> for FrameData {
    fn from(payload: FramePayload) -> Self {
        Self {
            window_id: payload.window_id,
            content: payload.content,
            base_uri: payload.base_uri,
            capture: payload.capture,
            runner: None,
            max_resources: 0,
        }
    }
}
