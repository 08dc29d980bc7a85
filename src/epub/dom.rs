//! Arena-based XHTML document tree.
//!
//! EPUB job items reference their host element by `(doc_index, NodeId)`
//! rather than holding a pointer/`Rc` into the tree, because a job's
//! sub-chunks are translated across `.await` points inside a multi-thread
//! tokio runtime and must stay `Send` (`spec.md` §9 "Design Notes",
//! "Cyclic references to tree nodes"). `Document` itself is plain data:
//! `Vec<ElementNode>` plus a root id, so it is trivially `Send + Sync`.
//!
//! The text/tail split (`ElementNode::text` is content before the first
//! child, `tail` is content following a child's closing tag) mirrors
//! `lxml`'s element model, matching `original_source/src/core/epub_processor.py`
//! which is written entirely in those terms.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::epub::EpubError;

/// Index into a [`Document`]'s node arena.
pub type NodeId = usize;

/// One XHTML element, plus the text immediately inside it and immediately
/// following it.
#[derive(Debug, Clone)]
pub struct ElementNode {
    /// Local tag name, namespace prefix stripped (`p`, `span`, `br`, ...).
    pub tag: String,
    /// Attributes in document order, namespace prefixes stripped from names.
    pub attrs: Vec<(String, String)>,
    /// Child element ids, in document order.
    pub children: Vec<NodeId>,
    /// Text before the first child (or the whole content, if childless).
    pub text: Option<String>,
    /// Text following this element's closing tag, scoped to its parent.
    pub tail: Option<String>,
    /// Parent node id; `None` only for the document root.
    pub parent: Option<NodeId>,
}

impl ElementNode {
    fn new(tag: String, attrs: Vec<(String, String)>, parent: Option<NodeId>) -> Self {
        Self { tag, attrs, children: Vec::new(), text: None, tail: None, parent }
    }
}

/// An arena-parsed XHTML document.
#[derive(Debug, Clone)]
pub struct Document {
    /// All nodes, indexed by [`NodeId`].
    pub nodes: Vec<ElementNode>,
    /// Root element id (the document element, e.g. `<html>`).
    pub root: NodeId,
}

impl Document {
    /// Finds the first descendant (breadth order not guaranteed; document
    /// order is) of `start` whose local tag name is `tag`.
    pub fn find_descendant(&self, start: NodeId, tag: &str) -> Option<NodeId> {
        for &child in &self.nodes[start].children {
            if self.nodes[child].tag == tag {
                return Some(child);
            }
            if let Some(found) = self.find_descendant(child, tag) {
                return Some(found);
            }
        }
        None
    }

    /// Serialises the subtree rooted at `id` back to XHTML text, including
    /// its own start/end tags.
    pub fn serialize_element(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        let mut out = String::new();
        out.push('<');
        out.push_str(&node.tag);
        for (k, v) in &node.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape_attr(v));
            out.push('"');
        }
        if node.children.is_empty() && node.text.as_deref().unwrap_or("").is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            if let Some(t) = &node.text {
                out.push_str(&escape_text(t));
            }
            for &child in &node.children {
                out.push_str(&self.serialize_element(child));
                if let Some(tail) = &self.nodes[child].tail {
                    out.push_str(&escape_text(tail));
                }
            }
            out.push_str("</");
            out.push_str(&node.tag);
            out.push('>');
        }
        out
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

fn local_name(qname: &[u8]) -> String {
    let full = String::from_utf8_lossy(qname);
    match full.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => full.to_string(),
    }
}

fn attrs_of(start: &BytesStart) -> Vec<(String, String)> {
    start
        .attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            let key = local_name(a.key.as_ref());
            let value = a.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
            (key, value)
        })
        .collect()
}

fn append_text(nodes: &mut [ElementNode], stack: &[NodeId], text: String) {
    if text.is_empty() {
        return;
    }
    let Some(&current) = stack.last() else { return };
    if let Some(&last_child) = nodes[current].children.last() {
        nodes[last_child].tail.get_or_insert_with(String::new).push_str(&text);
    } else {
        nodes[current].text.get_or_insert_with(String::new).push_str(&text);
    }
}

/// Parses XHTML/XML `content` into an arena [`Document`].
///
/// Parsing is lenient: a malformed tail of the document is dropped (with a
/// warning logged) rather than failing the whole parse, matching the
/// `recover=True` behaviour of the Python reference's `lxml` parser.
///
/// # Errors
///
/// Returns [`EpubError::NoRootElement`] if `content` contains no element at
/// all.
pub fn parse_document(content: &str) -> Result<Document, EpubError> {
    // `Reader::from_str` defaults to preserving whitespace (no text trimming),
    // which is what the text/tail model here depends on.
    let mut reader = Reader::from_str(content);

    let mut nodes: Vec<ElementNode> = Vec::new();
    let mut stack: Vec<NodeId> = Vec::new();
    let mut root: Option<NodeId> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = local_name(e.name().as_ref());
                let attrs = attrs_of(&e);
                let parent = stack.last().copied();
                let id = nodes.len();
                nodes.push(ElementNode::new(tag, attrs, parent));
                if let Some(p) = parent {
                    nodes[p].children.push(id);
                } else if root.is_none() {
                    root = Some(id);
                }
                stack.push(id);
            }
            Ok(Event::Empty(e)) => {
                let tag = local_name(e.name().as_ref());
                let attrs = attrs_of(&e);
                let parent = stack.last().copied();
                let id = nodes.len();
                nodes.push(ElementNode::new(tag, attrs, parent));
                if let Some(p) = parent {
                    nodes[p].children.push(id);
                } else if root.is_none() {
                    root = Some(id);
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map(|t| t.into_owned()).unwrap_or_default();
                append_text(&mut nodes, &stack, text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                append_text(&mut nodes, &stack, text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "xhtml parse error, truncating document at this point");
                break;
            }
        }
    }

    root.map(|root| Document { nodes, root }).ok_or(EpubError::NoRootElement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_with_text_and_tail() {
        let doc = parse_document("<body><p>Hello <b>world</b>!</p></body>").expect("parses");
        let body = doc.root;
        assert_eq!(doc.nodes[body].tag, "body");
        let p = doc.nodes[body].children[0];
        assert_eq!(doc.nodes[p].text.as_deref(), Some("Hello "));
        let b = doc.nodes[p].children[0];
        assert_eq!(doc.nodes[b].tag, "b");
        assert_eq!(doc.nodes[b].text.as_deref(), Some("world"));
        assert_eq!(doc.nodes[b].tail.as_deref(), Some("!"));
    }

    #[test]
    fn parses_attributes_stripping_namespace_prefix() {
        let doc = parse_document(r#"<xhtml:p class="a">hi</xhtml:p>"#).expect("parses");
        let p = doc.root;
        assert_eq!(doc.nodes[p].tag, "p");
        assert_eq!(doc.nodes[p].attrs, vec![("class".to_string(), "a".to_string())]);
    }

    #[test]
    fn self_closing_br_becomes_childless_node() {
        let doc = parse_document("<p>a<br/>b</p>").expect("parses");
        let p = doc.root;
        assert_eq!(doc.nodes[p].children.len(), 1);
        let br = doc.nodes[p].children[0];
        assert_eq!(doc.nodes[br].tag, "br");
        assert_eq!(doc.nodes[br].tail.as_deref(), Some("b"));
    }

    #[test]
    fn find_descendant_locates_nested_tag() {
        let doc = parse_document("<html><head></head><body><p>x</p></body></html>").expect("parses");
        let body = doc.find_descendant(doc.root, "body").expect("found body");
        assert_eq!(doc.nodes[body].tag, "body");
    }

    #[test]
    fn rejects_content_with_no_element() {
        assert!(parse_document("   ").is_err());
    }
}
