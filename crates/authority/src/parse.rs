//! Namespace-agnostic lookups over authority XML.
//!
//! Responses arrive with or without a SOAP wrapper and with varying namespace
//! prefixes, so every lookup matches on the local tag name only.

use roxmltree::{Document, Node};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty response")]
    Empty,
    #[error("malformed xml: {0}")]
    Malformed(String),
}

/// Parse a raw response, tolerating a leading BOM and surrounding whitespace.
pub fn document(raw: &str) -> Result<Document<'_>, ParseError> {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    Document::parse(trimmed).map_err(|e| ParseError::Malformed(e.to_string()))
}

/// First element (document order) with the given local name.
pub fn first<'a, 'i>(doc: &'a Document<'i>, name: &str) -> Option<Node<'a, 'i>> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// First element named `name` below `node` (any depth).
pub fn find_below<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.descendants()
        .skip(1)
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Direct child element named `name`.
pub fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Trimmed, non-empty text of a direct child.
pub fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Trimmed, non-empty text of the first element named `name` in the document.
pub fn first_text(doc: &Document<'_>, name: &str) -> Option<String> {
    first(doc, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric status code of a direct `cStat` child.
pub fn status_code(node: Node<'_, '_>) -> Option<u16> {
    child_text(node, "cStat").and_then(|s| s.parse().ok())
}
