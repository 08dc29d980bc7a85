//! Context-aware text chunking.
//!
//! Splits prose into chunks sized around a target line count, nudging chunk
//! boundaries to land on sentence terminators where one is found nearby, and
//! carries small before/after context windows alongside each chunk's main
//! content. Ported line-for-line from the original chunker so that its
//! boundary-search quirks (including the cases where a chunk collapses back
//! to its un-adjusted bounds) are preserved exactly.

use std::sync::LazyLock;

use regex::Regex;

/// Sentence-ending punctuation a chunk boundary is allowed to land on.
///
/// Longest terminators are tried first so that, e.g., `.)"` is matched in
/// full rather than stopping at the bare `.`.
const SENTENCE_TERMINATORS: &[&str] = &[
    ".)\"", ".\"", "?\"", "!\"", ".'", "?'", "!'", ".", "!", "?", ":",
];

static DEHYPHENATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(\p{Alphabetic}|\p{Number})-(\r\n|\r|\n)[ \t]*(\p{Alphabetic}|\p{Number})")
        .expect("valid regex")
});

/// A single unit of translatable text with its surrounding context.
///
/// `context_before`/`context_after` are purely a chunk-boundary concern:
/// they record what sentence-aligned text immediately surrounds
/// `main_content` on disk. The prompt builder does not turn them into a
/// prompt section of their own — only `main_content` and the previous
/// chunk's translated output (the engine's rolling context) reach the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Lines immediately preceding `main_content`, joined with `\n`.
    pub context_before: String,
    /// The text this chunk is responsible for getting translated.
    pub main_content: String,
    /// Lines immediately following `main_content`, joined with `\n`.
    pub context_after: String,
}

fn ends_with_terminator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && SENTENCE_TERMINATORS.iter().any(|t| trimmed.ends_with(t))
}

/// Searches backward from `intended_start` for a line ending in sentence
/// punctuation, within `max_look_back` lines, and returns the index just
/// after it. Falls back to `0` if `intended_start` is already within the
/// look-back window of the document start, otherwise returns `intended_start`
/// unchanged.
fn adjusted_start_index(all_lines: &[&str], intended_start: usize, max_look_back: usize) -> usize {
    if intended_start == 0 {
        return 0;
    }
    let floor = intended_start.saturating_sub(max_look_back);
    let mut i = intended_start;
    while i > floor {
        i = i.saturating_sub(1);
        if ends_with_terminator(all_lines[i]) {
            return i.saturating_add(1);
        }
    }
    if intended_start <= max_look_back {
        0
    } else {
        intended_start
    }
}

/// Searches forward from `intended_end` for a line ending in sentence
/// punctuation, within `max_look_forward` lines, and returns the index just
/// after it. Falls back to the document length if `intended_end` is already
/// within the look-forward window of the end, otherwise returns
/// `intended_end` unchanged.
fn adjusted_end_index(all_lines: &[&str], intended_end: usize, max_look_forward: usize) -> usize {
    let len = all_lines.len();
    if intended_end >= len {
        return len;
    }
    let start_search = intended_end.saturating_sub(1);
    let ceiling = start_search.saturating_add(max_look_forward).min(len);
    for i in start_search..ceiling {
        if ends_with_terminator(all_lines[i]) {
            return i.saturating_add(1);
        }
    }
    if intended_end.saturating_add(max_look_forward) >= len {
        len
    } else {
        intended_end
    }
}

fn dehyphenate(text: &str) -> String {
    DEHYPHENATE.replace_all(text, "$1$3").into_owned()
}

/// Re-splits raw lines on sentence terminators, so that a single physical
/// line containing multiple sentences can still have a chunk boundary land
/// between them. Blank lines pass through unchanged.
fn refine_lines(raw_lines: &[&str]) -> Vec<String> {
    let mut sorted_terminators: Vec<&str> = SENTENCE_TERMINATORS.to_vec();
    sorted_terminators.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let pattern = sorted_terminators
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let splitter = Regex::new(&pattern).expect("valid regex");

    let mut refined = Vec::new();
    for &line in raw_lines {
        if line.trim().is_empty() {
            refined.push(line.to_string());
            continue;
        }

        let mut segments = Vec::new();
        let mut last_end = 0;
        for m in splitter.find_iter(line) {
            let segment = &line[last_end..m.end()];
            if !segment.trim().is_empty() {
                segments.push(segment.to_string());
            }
            last_end = m.end();
        }
        let remaining = &line[last_end..];
        if !remaining.trim().is_empty() {
            segments.push(remaining.to_string());
        }

        if segments.is_empty() {
            refined.push(line.to_string());
        } else {
            refined.extend(segments);
        }
    }
    refined
}

/// Splits `text` into [`Chunk`]s of roughly `main_lines_per_chunk` lines
/// each, adjusting boundaries to sentence terminators where a nearby one
/// exists.
///
/// Guarantees at least one line of progress per iteration, so pathological
/// input (e.g. a single very long line) cannot stall the loop.
pub fn split_into_chunks(text: &str, main_lines_per_chunk: usize) -> Vec<Chunk> {
    let dehyphenated = dehyphenate(text);
    let raw_lines: Vec<&str> = dehyphenated.lines().collect();
    let refined = refine_lines(&raw_lines);
    let all_lines: Vec<&str> = refined.iter().map(String::as_str).collect();

    if all_lines.is_empty() {
        return Vec::new();
    }

    let look_back_main = main_lines_per_chunk.div_euclid(4).max(1);
    let look_forward_main = main_lines_per_chunk.div_euclid(4).max(1);
    let look_back_context = main_lines_per_chunk.div_euclid(8).max(1);
    let look_forward_context = main_lines_per_chunk.div_euclid(8).max(1);
    let context_target_lines = main_lines_per_chunk.div_euclid(4);

    let mut chunks = Vec::new();
    let mut position = 0usize;

    while position < all_lines.len() {
        let intended_start = position;
        let intended_end = position.saturating_add(main_lines_per_chunk).min(all_lines.len());

        let mut final_start = adjusted_start_index(&all_lines, intended_start, look_back_main);
        let mut final_end = adjusted_end_index(&all_lines, intended_end, look_forward_main);

        if final_start > final_end {
            final_start = intended_start;
            final_end = intended_end;
        }

        if final_end <= final_start {
            if intended_start < all_lines.len() {
                if intended_end > intended_start {
                    final_start = intended_start;
                    final_end = intended_end;
                } else {
                    final_start = intended_start;
                    final_end = all_lines.len();
                }
            } else {
                break;
            }
        }

        let main_lines = &all_lines[final_start..final_end];

        if main_lines.is_empty() {
            if final_start < all_lines.len() {
                position = final_start.saturating_add(1);
                continue;
            }
            break;
        }

        let context_before_end = final_start;
        let context_before_start = adjusted_start_index(
            &all_lines,
            context_before_end.saturating_sub(context_target_lines),
            look_back_context,
        );
        let context_before_end = context_before_end.min(final_start);
        let before_lines = if context_before_start < context_before_end {
            &all_lines[context_before_start..context_before_end]
        } else {
            &[][..]
        };

        let context_after_start = final_end;
        let intended_context_after_end = context_after_start
            .saturating_add(context_target_lines)
            .min(all_lines.len());
        let context_after_end =
            adjusted_end_index(&all_lines, intended_context_after_end, look_forward_context);
        let after_lines = if context_after_start < context_after_end {
            &all_lines[context_after_start..context_after_end]
        } else {
            &[][..]
        };

        let main_content = main_lines.join("\n");
        if main_content.trim().is_empty() {
            position = final_end.max(intended_start.saturating_add(1));
            continue;
        }

        chunks.push(Chunk {
            context_before: before_lines.join("\n"),
            main_content,
            context_after: after_lines.join("\n"),
        });

        position = final_end;
        if position <= intended_start {
            position = intended_start.saturating_add(1);
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_into_chunks("", 25).is_empty());
    }

    #[test]
    fn simple_paragraph_is_a_single_chunk() {
        let text = "This is a sentence.\nThis is another one.\nAnd a third.";
        let chunks = split_into_chunks(text, 25);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].main_content.contains("This is a sentence."));
        assert!(chunks[0].main_content.contains("And a third."));
    }

    #[test]
    fn dehyphenates_across_line_breaks() {
        let text = "This is a hy-\nphenated word.";
        let chunks = split_into_chunks(text, 25);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].main_content.contains("hyphenated"));
        assert!(!chunks[0].main_content.contains("hy-"));
    }

    #[test]
    fn long_text_splits_into_multiple_chunks_without_losing_lines() {
        let mut text = String::new();
        for i in 0..200 {
            text.push_str(&format!("Line number {i}.\n"));
        }
        let chunks = split_into_chunks(&text, 25);
        assert!(chunks.len() > 1);
        let rejoined: String = chunks.iter().map(|c| c.main_content.clone() + "\n").collect();
        for i in 0..200 {
            assert!(rejoined.contains(&format!("Line number {i}.")));
        }
    }

    #[test]
    fn degenerate_single_very_long_line_makes_progress() {
        let text = "a".repeat(10_000);
        let chunks = split_into_chunks(&text, 25);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].main_content.len(), 10_000);
    }

    #[test]
    fn whitespace_only_lines_do_not_produce_empty_chunks() {
        let text = "\n\n\n   \n\n";
        let chunks = split_into_chunks(text, 25);
        assert!(chunks.is_empty());
    }

    #[test]
    fn multiple_sentences_on_one_line_can_still_split() {
        let mut text = String::new();
        for i in 0..10 {
            text.push_str(&format!("Sentence {i} one. Sentence {i} two. Sentence {i} three. "));
        }
        let chunks = split_into_chunks(&text, 4);
        assert!(!chunks.is_empty());
        let total_main: usize = chunks.iter().map(|c| c.main_content.len()).sum();
        assert!(total_main > 0);
    }
}
