//! Capture configuration.
//!
//! One [`CaptureOptions`] value per document. Child documents (frames,
//! shadow roots, HTML imports) receive an independent copy with overrides
//! applied — configuration is never shared mutably across the runner tree.

use serde::{Deserialize, Serialize};

/// Per-run configuration for one document capture.
///
/// Defaults mirror a conservative archive profile: scripts, imports,
/// hidden elements, audio/video sources and unused styles removed, HTML
/// and CSS compressed, duplicate images grouped behind shared CSS custom
/// properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Document URL; also the fetch target when no content is supplied.
    pub url: String,
    /// Base URI for reference resolution; defaults to `url`.
    pub base_uri: Option<String>,
    /// Session identifier scoping the helper attributes stamped upstream.
    pub session_id: u32,

    pub remove_hidden_elements: bool,
    pub remove_unused_styles: bool,
    pub remove_unused_fonts: bool,
    pub remove_frames: bool,
    pub remove_imports: bool,
    pub remove_scripts: bool,
    pub remove_audio_sources: bool,
    pub remove_video_sources: bool,
    pub remove_alternative_fonts: bool,
    pub remove_alternative_medias: bool,
    pub remove_alternative_images: bool,

    pub compress_html: bool,
    pub compress_css: bool,

    /// Collapse repeated identical images into one shared CSS custom
    /// property instead of repeating the embedded bytes.
    pub group_duplicate_images: bool,

    pub insert_favicon_link: bool,
    /// Insert the human-readable provenance comment at the top of the
    /// output document.
    pub insert_provenance_comment: bool,

    /// Keep only the user-selected content subtree.
    pub selected_content_only: bool,
    /// Capture the raw served page instead of the live DOM state.
    pub save_raw_page: bool,
    /// Promote `data-src`/`data-srcset` lazy-loading attributes.
    pub load_deferred_images: bool,

    pub display_stats: bool,

    /// Resource size cap in bytes, enforced when
    /// `max_resource_size_enabled` is set.
    pub max_resource_size: u64,
    pub max_resource_size_enabled: bool,

    pub filename_template: String,
    pub infobar_template: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            base_uri: None,
            session_id: 0,
            remove_hidden_elements: true,
            remove_unused_styles: true,
            remove_unused_fonts: true,
            remove_frames: false,
            remove_imports: true,
            remove_scripts: true,
            remove_audio_sources: true,
            remove_video_sources: true,
            remove_alternative_fonts: true,
            remove_alternative_medias: true,
            remove_alternative_images: true,
            compress_html: true,
            compress_css: true,
            group_duplicate_images: true,
            insert_favicon_link: true,
            insert_provenance_comment: true,
            selected_content_only: false,
            save_raw_page: false,
            load_deferred_images: true,
            display_stats: false,
            max_resource_size: 10 * 1024 * 1024,
            max_resource_size_enabled: false,
            filename_template: "{page-title} ({date-iso} {time-locale}).html".to_string(),
            infobar_template: String::new(),
        }
    }
}

impl CaptureOptions {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// The base URI used for reference resolution.
    pub fn base_uri(&self) -> &str {
        self.base_uri.as_deref().unwrap_or(&self.url)
    }

    /// Independent configuration for a child document. Provenance comment
    /// and favicon insertion never apply recursively; size limits and
    /// removal flags are inherited.
    pub fn for_child_document(&self, url: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.url = url.into();
        child.base_uri = None;
        child.insert_provenance_comment = false;
        child.insert_favicon_link = false;
        child
    }

    /// Evaluate a task gate flag against this configuration.
    pub fn flag(&self, flag: OptionFlag) -> bool {
        match flag {
            OptionFlag::RemoveHiddenElements => self.remove_hidden_elements,
            OptionFlag::RemoveUnusedStyles => self.remove_unused_styles,
            OptionFlag::RemoveUnusedFonts => self.remove_unused_fonts,
            OptionFlag::RemoveFrames => self.remove_frames,
            OptionFlag::RemoveImports => self.remove_imports,
            OptionFlag::RemoveScripts => self.remove_scripts,
            OptionFlag::RemoveAudioSources => self.remove_audio_sources,
            OptionFlag::RemoveVideoSources => self.remove_video_sources,
            OptionFlag::RemoveAlternativeFonts => self.remove_alternative_fonts,
            OptionFlag::RemoveAlternativeMedias => self.remove_alternative_medias,
            OptionFlag::RemoveAlternativeImages => self.remove_alternative_images,
            OptionFlag::CompressHtml => self.compress_html,
            OptionFlag::InsertFaviconLink => self.insert_favicon_link,
            OptionFlag::SelectedContentOnly => self.selected_content_only,
        }
    }
}

/// Configuration flags a stage task can be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionFlag {
    RemoveHiddenElements,
    RemoveUnusedStyles,
    RemoveUnusedFonts,
    RemoveFrames,
    RemoveImports,
    RemoveScripts,
    RemoveAudioSources,
    RemoveVideoSources,
    RemoveAlternativeFonts,
    RemoveAlternativeMedias,
    RemoveAlternativeImages,
    CompressHtml,
    InsertFaviconLink,
    SelectedContentOnly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_options_are_independent() {
        let mut parent = CaptureOptions::for_url("http://x/");
        parent.insert_provenance_comment = true;
        parent.max_resource_size_enabled = true;

        let child = parent.for_child_document("http://x/frame.html");
        assert_eq!(child.url, "http://x/frame.html");
        assert!(!child.insert_provenance_comment);
        assert!(!child.insert_favicon_link);
        assert!(child.max_resource_size_enabled);

        parent.remove_scripts = false;
        assert!(child.remove_scripts);
    }
}
