//! Phase 3 — writing translated text back into the arena tree, grounded on
//! `original_source/src/core/epub_processor.py::_rebuild_element_from_translated_content`
//! and the "Apply translations" loop in `translate_epub_file`.

use std::sync::LazyLock;

use regex::Regex;

use crate::epub::collect::{JobItem, JobKind};
use crate::epub::dom::{parse_document, Document, NodeId};

static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&nbsp;", "\u{00A0}"),
];

/// Unescapes the HTML entities a translation may legitimately contain so
/// that re-serialising the document does not double-encode them
/// (`spec.md` §4.6, final bullet of Phase 3).
pub fn unescape_entities(text: &str) -> String {
    let mut out = text.to_string();
    for (entity, replacement) in NAMED_ENTITIES {
        out = out.replace(entity, replacement);
    }
    NUMERIC_ENTITY
        .replace_all(&out, |caps: &regex::Captures| {
            let digits = &caps[1];
            let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                digits.parse::<u32>().ok()
            };
            code.and_then(char::from_u32).map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Deep-copies the subtree rooted at `src_id` in `src` into `dst`'s arena as
/// a new child of `dst_parent`, preserving tag, attributes, text and tail.
fn copy_subtree(dst: &mut Document, dst_parent: NodeId, src: &Document, src_id: NodeId) -> NodeId {
    let src_node = &src.nodes[src_id];
    let new_id = dst.nodes.len();
    dst.nodes.push(crate::epub::dom::ElementNode {
        tag: src_node.tag.clone(),
        attrs: src_node.attrs.clone(),
        children: Vec::new(),
        text: src_node.text.clone(),
        tail: src_node.tail.clone(),
        parent: Some(dst_parent),
    });
    dst.nodes[dst_parent].children.push(new_id);
    for &child in &src.nodes[src_id].children.clone() {
        copy_subtree(dst, new_id, src, child);
    }
    new_id
}

/// Clears `node_id`'s content and rebuilds it from `translated_content`,
/// which is expected to be a fragment of XHTML with inline tags restored.
/// Falls back to plain text if the fragment fails to parse, so a malformed
/// LLM output never loses data (`spec.md` §4.6 Phase 3, `block_content`).
fn rebuild_block_content(doc: &mut Document, node_id: NodeId, translated_content: &str) {
    doc.nodes[node_id].text = None;
    doc.nodes[node_id].children.clear();

    let wrapped = format!("<temp_root>{translated_content}</temp_root>");
    match parse_document(&wrapped) {
        Ok(parsed) => {
            let root_text = parsed.nodes[parsed.root].text.clone();
            doc.nodes[node_id].text = root_text;
            for &child in &parsed.nodes[parsed.root].children.clone() {
                copy_subtree(doc, node_id, &parsed, child);
            }
        }
        Err(_) => {
            doc.nodes[node_id].text = Some(translated_content.to_string());
        }
    }
}

/// Applies every completed job's translation back into its host document,
/// skipping jobs whose translation is still `None` (never attempted, or
/// declined in Phase 2 for an unrecoverable placeholder mismatch).
pub fn splice_jobs(docs: &mut [Document], jobs: &[JobItem]) {
    for job in jobs {
        let Some(translated) = &job.translated_text else { continue };
        let unescaped = unescape_entities(translated);
        let doc = &mut docs[job.doc_index];
        match job.kind {
            JobKind::BlockContent => rebuild_block_content(doc, job.node_id, &unescaped),
            JobKind::Text => {
                let combined = format!("{}{}{}", job.leading_space, unescaped, job.trailing_space);
                doc.nodes[job.node_id].text = Some(combined);
            }
            JobKind::Tail => {
                let combined = format!("{}{}{}", job.leading_space, unescaped, job.trailing_space);
                doc.nodes[job.node_id].tail = Some(combined);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::dom::parse_document;

    #[test]
    fn unescape_entities_handles_named_and_numeric_forms() {
        assert_eq!(unescape_entities("Caf&eacute;? no: &amp;&#233;&#x2019;"), "Caf&eacute;? no: &\u{e9}\u{2019}");
        assert_eq!(unescape_entities("a&nbsp;b"), "a\u{00A0}b");
    }

    #[test]
    fn rebuild_block_content_replaces_children_with_parsed_fragment() {
        let mut doc = parse_document("<p>old</p>").expect("parses");
        rebuild_block_content(&mut doc, doc.root, "Bonjour <b>monde</b> !");
        assert_eq!(doc.nodes[doc.root].text.as_deref(), Some("Bonjour "));
        let b = doc.nodes[doc.root].children[0];
        assert_eq!(doc.nodes[b].tag, "b");
        assert_eq!(doc.nodes[b].text.as_deref(), Some("monde"));
        assert_eq!(doc.nodes[b].tail.as_deref(), Some(" !"));
    }

    #[test]
    fn rebuild_block_content_falls_back_to_plain_text_on_parse_failure() {
        let mut doc = parse_document("<p>old</p>").expect("parses");
        rebuild_block_content(&mut doc, doc.root, "");
        assert_eq!(doc.nodes[doc.root].text, None);
        assert!(doc.nodes[doc.root].children.is_empty());
    }

    #[test]
    fn splice_text_job_restores_surrounding_whitespace() {
        let doc = parse_document("<p>x</p>").expect("parses");
        let mut docs = vec![doc];
        let job = JobItem {
            doc_index: 0,
            node_id: docs[0].root,
            kind: JobKind::Text,
            sub_chunks: Vec::new(),
            leading_space: " ".to_string(),
            trailing_space: "\n".to_string(),
            tag_preserver: None,
            translated_text: Some("bonjour".to_string()),
        };
        splice_jobs(&mut docs, std::slice::from_ref(&job));
        assert_eq!(docs[0].nodes[docs[0].root].text.as_deref(), Some(" bonjour\n"));
    }
}
