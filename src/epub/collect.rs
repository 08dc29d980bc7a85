//! Phase 1 — walking an XHTML `<body>` tree and collecting translation
//! job items, grounded on
//! `original_source/src/core/epub_processor.py::_collect_epub_translation_jobs_recursive`
//! and `_serialize_inline_tags`.

use crate::chunk::{self, Chunk};
use crate::epub::dom::{Document, NodeId};
use crate::tags::TagPreserver;

/// Elements pruned outright: never translated, never recursed into.
const IGNORED_TAGS: &[&str] = &["script", "style", "meta", "link"];

/// Elements treated as block-level content containers.
const CONTENT_BLOCK_TAGS: &[&str] =
    &["p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "td", "th", "caption", "dt", "dd"];

fn is_ignored(tag: &str) -> bool {
    IGNORED_TAGS.contains(&tag)
}

fn is_block(tag: &str) -> bool {
    CONTENT_BLOCK_TAGS.contains(&tag)
}

/// One unit of translatable EPUB content, referencing its host element by
/// identity rather than by reference (`spec.md` §9 "Design Notes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Full inner serialisation of a childless block element, inline markup preserved.
    BlockContent,
    /// An element's direct `.text`.
    Text,
    /// The text following an element's closing tag (its `.tail`).
    Tail,
}

/// A single collected translation job item (`spec.md` §3 "EPUB Job Item").
pub struct JobItem {
    /// Index into the EPUB's list of parsed content documents.
    pub doc_index: usize,
    /// Host element within that document's arena.
    pub node_id: NodeId,
    /// Which of the element's text slots this job targets.
    pub kind: JobKind,
    /// Sub-chunks produced from the payload by the text chunker.
    pub sub_chunks: Vec<Chunk>,
    /// Whitespace preceding the trimmed payload, restored around the translation.
    pub leading_space: String,
    /// Whitespace following the trimmed payload, restored around the translation.
    pub trailing_space: String,
    /// Present iff `kind == BlockContent`: the placeholder map used to
    /// shield inline markup from the LLM, needed again at splice time.
    pub tag_preserver: Option<TagPreserver>,
    /// Filled in during Phase 2; `None` until then or if translation failed.
    pub translated_text: Option<String>,
}

fn split_or_single(payload: &str, chunk_lines: usize) -> Vec<Chunk> {
    let chunks = chunk::split_into_chunks(payload, chunk_lines);
    if chunks.is_empty() && !payload.is_empty() {
        vec![Chunk { context_before: String::new(), main_content: payload.to_string(), context_after: String::new() }]
    } else {
        chunks
    }
}

fn split_whitespace_bounds(raw: &str) -> (String, String, String) {
    let trimmed_start = raw.trim_start();
    let leading_len = raw.len().saturating_sub(trimmed_start.len());
    let leading = raw[..leading_len].to_string();
    let trimmed = trimmed_start.trim_end();
    let trailing = trimmed_start[trimmed.len()..].to_string();
    (leading, trimmed.to_string(), trailing)
}

fn push_text_job(
    doc_index: usize,
    node_id: NodeId,
    kind: JobKind,
    raw_text: &str,
    chunk_lines: usize,
    jobs: &mut Vec<JobItem>,
) {
    let (leading_space, stripped, trailing_space) = split_whitespace_bounds(raw_text);
    if stripped.is_empty() {
        return;
    }
    let sub_chunks = split_or_single(&stripped, chunk_lines);
    if sub_chunks.is_empty() {
        return;
    }
    jobs.push(JobItem { doc_index, node_id, kind, sub_chunks, leading_space, trailing_space, tag_preserver: None, translated_text: None });
}

/// Serialises `node_id`'s inner content (text, inline-tag markup, recursive
/// block boundaries, `<br/>` flattening) the way the inline block-content
/// job payload is built. Nested block-level descendants lose their own
/// wrapper tag here, matching the original's `_serialize_inline_tags`
/// behaviour exactly (`SPEC_FULL.md` §4 "EPUB Processor").
pub fn serialize_inline_tags(doc: &Document, node_id: NodeId) -> String {
    let node = &doc.nodes[node_id];
    let mut out = String::new();
    if let Some(text) = &node.text {
        out.push_str(text);
    }
    for &child_id in &node.children {
        let child = &doc.nodes[child_id];
        if child.tag == "br" {
            if !out.ends_with('\n') {
                out.push('\n');
            }
        } else if is_block(&child.tag) {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&serialize_inline_tags(doc, child_id));
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push('<');
            out.push_str(&child.tag);
            for (k, v) in &child.attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(v);
                out.push('"');
            }
            out.push('>');
            out.push_str(&serialize_inline_tags(doc, child_id));
            out.push_str("</");
            out.push_str(&child.tag);
            out.push('>');
        }
        if let Some(tail) = &child.tail {
            out.push_str(tail);
        }
    }
    out
}

/// Walks `node_id` and its descendants, appending collected job items to
/// `jobs` in document order.
pub fn collect_jobs(doc: &Document, node_id: NodeId, doc_index: usize, chunk_lines: usize, jobs: &mut Vec<JobItem>) {
    let tag = doc.nodes[node_id].tag.clone();
    if is_ignored(&tag) {
        return;
    }

    let block = is_block(&tag);

    if block {
        let has_block_children = doc.nodes[node_id].children.iter().any(|&c| is_block(&doc.nodes[c].tag));
        if has_block_children {
            if let Some(text) = doc.nodes[node_id].text.clone() {
                push_text_job(doc_index, node_id, JobKind::Text, &text, chunk_lines, jobs);
            }
        } else {
            let serialized = serialize_inline_tags(doc, node_id).trim().to_string();
            if !serialized.is_empty() {
                let mut tp = TagPreserver::new();
                let protected = tp.protect(&serialized);
                let sub_chunks = split_or_single(&protected, chunk_lines);
                if !sub_chunks.is_empty() {
                    jobs.push(JobItem {
                        doc_index,
                        node_id,
                        kind: JobKind::BlockContent,
                        sub_chunks,
                        leading_space: String::new(),
                        trailing_space: String::new(),
                        tag_preserver: Some(tp),
                        translated_text: None,
                    });
                }
            }
            return;
        }
    } else if let Some(text) = doc.nodes[node_id].text.clone() {
        push_text_job(doc_index, node_id, JobKind::Text, &text, chunk_lines, jobs);
    }

    for child in doc.nodes[node_id].children.clone() {
        collect_jobs(doc, child, doc_index, chunk_lines, jobs);
    }

    if !block {
        if let Some(tail) = doc.nodes[node_id].tail.clone() {
            push_text_job(doc_index, node_id, JobKind::Tail, &tail, chunk_lines, jobs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::dom::parse_document;

    #[test]
    fn collects_text_job_for_plain_paragraph() {
        let doc = parse_document("<body><p>Hello world.</p></body>").expect("parses");
        let mut jobs = Vec::new();
        collect_jobs(&doc, doc.root, 0, 25, &mut jobs);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::BlockContent);
    }

    #[test]
    fn block_with_inline_markup_preserves_tags_as_placeholders() {
        let doc = parse_document("<body><p>Hello <b>world</b>!</p></body>").expect("parses");
        let mut jobs = Vec::new();
        collect_jobs(&doc, doc.root, 0, 25, &mut jobs);
        assert_eq!(jobs.len(), 1);
        let tp = jobs[0].tag_preserver.as_ref().expect("tag preserver present");
        assert_eq!(tp.len(), 2);
        assert!(jobs[0].sub_chunks[0].main_content.contains("\u{27e6}TAG0\u{27e7}"));
    }

    #[test]
    fn block_with_block_children_emits_only_direct_text_and_recurses() {
        let doc = parse_document("<body><div>Intro<p>Para</p></div></body>").expect("parses");
        let mut jobs = Vec::new();
        collect_jobs(&doc, doc.root, 0, 25, &mut jobs);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, JobKind::Text);
        assert_eq!(jobs[0].sub_chunks[0].main_content, "Intro");
        assert_eq!(jobs[1].kind, JobKind::BlockContent);
    }

    #[test]
    fn non_block_element_emits_text_and_tail_jobs() {
        let doc = parse_document("<body><span>inner</span> after</body>").expect("parses");
        let mut jobs = Vec::new();
        collect_jobs(&doc, doc.root, 0, 25, &mut jobs);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, JobKind::Text);
        assert_eq!(jobs[1].kind, JobKind::Tail);
        assert_eq!(jobs[1].sub_chunks[0].main_content, "after");
    }

    #[test]
    fn ignored_tags_are_pruned_without_recursion() {
        let doc = parse_document("<body><script>var x=1;</script></body>").expect("parses");
        let mut jobs = Vec::new();
        collect_jobs(&doc, doc.root, 0, 25, &mut jobs);
        assert!(jobs.is_empty());
    }

    #[test]
    fn consecutive_br_tags_flatten_to_a_single_newline() {
        let doc = parse_document("<body><p>a<br/><br/>b</p></body>").expect("parses");
        let serialized = serialize_inline_tags(&doc, doc.root);
        // body wraps a single <p>; body itself has no text, the <p> is the only child.
        let p = doc.nodes[doc.root].children[0];
        let p_serialized = serialize_inline_tags(&doc, p);
        assert_eq!(p_serialized, "a\nb");
        let _ = serialized;
    }
}
