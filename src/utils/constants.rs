//! Shared constants for the snapshot pipeline.

/// Data URI substituted for resources that could not be retrieved or that
/// were rejected (size limit, invalid payload). Decodes to zero bytes.
pub const EMPTY_DATA_URI: &str = "data:base64,";

/// Transparent 1x1 GIF used as the placeholder for image-bearing
/// attributes while their real content is pending or unavailable.
pub const EMPTY_IMAGE: &str =
    "data:image/gif;base64,R0lGODlhAQABAAAAACH5BAEKAAEALAAAAAABAAEAAAICTAEAOw==";

/// Prefix of the shared CSS custom properties emitted for de-duplicated
/// images; the full name is `--sf-img-{sequence index}`.
pub const CSS_VARIABLE_PREFIX: &str = "--sf-img-";

/// Prefix of every session-scoped helper attribute. All attributes with
/// this prefix are stripped from the document before serialization.
pub const SESSION_ATTRIBUTE_PREFIX: &str = "data-snapdoc-";

/// Browser-like user agent sent with resource requests.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Attribute carrying the window identifier that ties a frame element to
/// its captured [`FrameData`](crate::capture::FrameData) entry.
pub fn window_id_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}win-id-{session_id}")
}

/// Attribute carrying an element's index into the side-channel image
/// metadata table.
pub fn image_index_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}image-{session_id}")
}

/// Attribute carrying the snapshotted value of a form control.
pub fn input_value_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}value-{session_id}")
}

/// Attribute marking an element whose shadow root was serialized upstream.
pub fn shadow_root_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}shadowroot-{session_id}")
}

/// Attribute marking an element that was hidden in the live page.
pub fn removed_content_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}removed-{session_id}")
}

/// Attribute marking subtrees whose whitespace must survive compression.
pub fn preserved_space_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}preserve-{session_id}")
}

/// Attribute tying a style-bearing element to its parsed stylesheet entry.
pub fn stylesheet_index_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}sheet-{session_id}")
}

/// Attribute tying an element to its parsed `style` attribute entry.
pub fn style_index_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}style-{session_id}")
}

/// Attribute tying an import link to its child document runner.
pub fn import_index_attribute(session_id: u32) -> String {
    format!("{SESSION_ATTRIBUTE_PREFIX}import-{session_id}")
}

/// Attribute marking the root of a user content selection.
pub const SELECTED_CONTENT_ROOT_ATTRIBUTE: &str = "data-snapdoc-selected-content-root";

/// Attribute marking elements inside a user content selection.
pub const SELECTED_CONTENT_ATTRIBUTE: &str = "data-snapdoc-selected-content";
