//! Document capability: thin helpers over the kuchiki DOM.
//!
//! Parsing, serialization, element creation (through fragment parsing, so
//! no qualified-name plumbing leaks into the pipeline), HTML compression
//! and session-attribute cleanup.

use kuchiki::traits::TendrilSink;
use kuchiki::{Attributes, ElementData, NodeDataRef, NodeRef};

/// Parse an HTML document.
pub fn parse_html(content: &str) -> NodeRef {
    kuchiki::parse_html().one(content)
}

/// Serialize a node tree back to HTML text.
pub fn serialize(document: &NodeRef) -> String {
    let mut output = Vec::new();
    if document.serialize(&mut output).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&output).into_owned()
}

/// All matches of a selector, collected before any mutation.
///
/// Collecting is deliberate: callers detach and reparent nodes while
/// walking the result, which would invalidate a live iterator.
pub fn select_all(node: &NodeRef, selector: &str) -> Vec<NodeDataRef<ElementData>> {
    node.select(selector)
        .map(|matches| matches.collect())
        .unwrap_or_default()
}

/// First match of a selector.
pub fn select_first(node: &NodeRef, selector: &str) -> Option<NodeDataRef<ElementData>> {
    node.select_first(selector).ok()
}

/// The document's `<head>` element.
pub fn head(document: &NodeRef) -> Option<NodeRef> {
    select_first(document, "head").map(|element| element.as_node().clone())
}

/// Build a detached element by parsing a fragment and lifting it out.
pub fn create_element(tag: &str, attributes: &[(&str, &str)]) -> Option<NodeRef> {
    let mut fragment = String::new();
    fragment.push('<');
    fragment.push_str(tag);
    for (name, value) in attributes {
        fragment.push(' ');
        fragment.push_str(name);
        fragment.push_str("=\"");
        fragment.push_str(&escape_attribute(value));
        fragment.push('"');
    }
    fragment.push('>');
    fragment.push_str("</");
    fragment.push_str(tag);
    fragment.push('>');
    let document = parse_html(&fragment);
    let element = select_first(&document, tag)?;
    let node = element.as_node().clone();
    node.detach();
    Some(node)
}

/// Replace a node's children with a single text node.
pub fn set_text_content(node: &NodeRef, text: &str) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}

/// Attribute lookup by local name regardless of namespace; needed for
/// `xlink:href`, which the HTML parser files under the XLink namespace.
pub fn attribute_local(attributes: &Attributes, local: &str) -> Option<String> {
    if let Some(value) = attributes.get(local) {
        return Some(value.to_string());
    }
    attributes
        .map
        .iter()
        .find(|(name, _)| &*name.local == local)
        .map(|(_, attribute)| attribute.value.clone())
}

/// Update an attribute by local name, preserving an existing namespaced
/// entry (so `xlink:href` keeps its prefix on serialization).
pub fn set_attribute_local(attributes: &mut Attributes, local: &str, value: String) {
    for (name, attribute) in attributes.map.iter_mut() {
        if &*name.local == local {
            attribute.value = value;
            return;
        }
    }
    attributes.insert(local, value);
}

/// Strip every helper attribute carrying the given prefix.
pub fn remove_attributes_with_prefix(document: &NodeRef, prefix: &str) {
    for element in select_all(document, "*") {
        let mut attributes = element.attributes.borrow_mut();
        let stale: Vec<String> = attributes
            .map
            .keys()
            .filter(|name| name.local.starts_with(prefix))
            .map(|name| name.local.to_string())
            .collect();
        for name in stale {
            attributes.remove(name.as_str());
        }
    }
}

const PRESERVED_CONTENT_TAGS: [&str; 4] = ["pre", "textarea", "script", "style"];
const STRUCTURAL_TAGS: [&str; 10] =
    ["html", "head", "table", "thead", "tbody", "tfoot", "tr", "ul", "ol", "select"];

/// Collapse whitespace runs and drop comments, leaving preformatted
/// subtrees and anything under the preserved-space attribute untouched.
pub fn compress(document: &NodeRef, preserved_space_attribute: &str) {
    compress_node(document, preserved_space_attribute, false, "");
}

fn compress_node(node: &NodeRef, preserved_attribute: &str, preserve: bool, parent_tag: &str) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        if child.as_comment().is_some() {
            child.detach();
            continue;
        }
        if let Some(text) = child.as_text() {
            if preserve {
                continue;
            }
            let collapsed = collapse_whitespace(&text.borrow());
            if collapsed.trim().is_empty() && STRUCTURAL_TAGS.contains(&parent_tag) {
                child.detach();
            } else {
                *text.borrow_mut() = collapsed;
            }
            continue;
        }
        if let Some(element) = child.as_element() {
            let tag = element.name.local.to_string();
            let preserve_child = preserve
                || PRESERVED_CONTENT_TAGS.contains(&tag.as_str())
                || element.attributes.borrow().contains(preserved_attribute);
            compress_node(&child, preserved_attribute, preserve_child, &tag);
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for character in text.chars() {
        if character.is_whitespace() {
            if !in_whitespace {
                collapsed.push(' ');
                in_whitespace = true;
            }
        } else {
            collapsed.push(character);
            in_whitespace = false;
        }
    }
    collapsed
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_elements_are_detached() {
        let link = create_element("link", &[("rel", "icon"), ("href", "/favicon.ico")]).unwrap();
        assert!(link.parent().is_none());
        let attributes = link.as_element().unwrap().attributes.borrow();
        assert_eq!(attributes.get("rel"), Some("icon"));
    }

    #[test]
    fn text_content_replacement() {
        let style = create_element("style", &[]).unwrap();
        set_text_content(&style, "body{color:red}");
        assert_eq!(style.text_contents(), "body{color:red}");
        set_text_content(&style, "p{}");
        assert_eq!(style.text_contents(), "p{}");
    }

    #[test]
    fn compression_preserves_pre_and_drops_comments() {
        let document = parse_html(
            "<html><head></head><body><p>a   b</p><!-- gone --><pre>  keep\n  it</pre></body></html>",
        );
        compress(&document, "data-x-preserve");
        let html = serialize(&document);
        assert!(html.contains("<p>a b</p>"));
        assert!(!html.contains("gone"));
        assert!(html.contains("  keep\n  it"));
    }

    #[test]
    fn prefix_attribute_cleanup() {
        let document = parse_html("<html><body><div data-snapdoc-win-id-0=\"f0\" id=\"k\"></div></body></html>");
        remove_attributes_with_prefix(&document, "data-snapdoc-");
        let html = serialize(&document);
        assert!(!html.contains("data-snapdoc"));
        assert!(html.contains("id=\"k\""));
    }
}
