//! SRT subtitle parsing, translation-block grouping, and reconstruction.
//!
//! Block layout (`number`/`start_time`/`end_time`/`text`) and the grouping
//! and index-repair heuristics are ported from the original SRT processor.
//! Blank-text subtitles (common in karaoke-style or gap cues) pass straight
//! through a group without counting against its line/char budget, matching
//! the source's behaviour.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::postprocess::PostProcessor;
use crate::prompt;
use crate::provider::{self, LlmProvider};

/// Failures specific to SRT parsing and reconstruction.
#[derive(Debug, Error)]
pub enum SrtError {
    /// `parse_srt` found no well-formed subtitle blocks in the input.
    #[error("no subtitle blocks found in SRT content")]
    NoSubtitlesFound,
}

/// One parsed subtitle cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtitle {
    /// The cue number as it appeared in the file (kept as text; SRT allows
    /// arbitrary renumbering and this crate does not second-guess it).
    pub number: String,
    /// `HH:MM:SS,mmm` start timecode.
    pub start_time: String,
    /// `HH:MM:SS,mmm` end timecode.
    pub end_time: String,
    /// Current (possibly translated) cue text, may span multiple lines.
    pub text: String,
    /// The cue text as originally parsed, never mutated afterwards.
    pub original_text: String,
}

static TIMECODE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}:\d{2}:\d{2},\d{3})\s*-->\s*(\d{2}:\d{2}:\d{2},\d{3})").expect("valid regex")
});

/// Parses SRT content into an ordered list of [`Subtitle`] cues.
///
/// Blocks that don't parse as `number\ntimecode --> timecode\ntext...` are
/// silently skipped, matching the source's tolerant parser. Returns
/// [`SrtError::NoSubtitlesFound`] if nothing parsed at all.
pub fn parse_srt(content: &str) -> Result<Vec<Subtitle>, SrtError> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut subtitles = Vec::new();

    for raw_block in normalized.split("\n\n") {
        let block = raw_block.trim();
        if block.is_empty() {
            continue;
        }

        let lines: Vec<&str> = block.split('\n').collect();
        if lines.len() < 3 {
            continue;
        }

        if lines[0].trim().parse::<u64>().is_err() {
            continue;
        }
        let number = lines[0].trim().to_string();

        let Some(caps) = TIMECODE_LINE.captures(lines[1].trim()) else {
            continue;
        };
        let start_time = caps[1].to_string();
        let end_time = caps[2].to_string();

        let text = lines[2..].join("\n");

        subtitles.push(Subtitle {
            number,
            start_time,
            end_time,
            original_text: text.clone(),
            text,
        });
    }

    if subtitles.is_empty() {
        return Err(SrtError::NoSubtitlesFound);
    }

    tracing::info!(count = subtitles.len(), "parsed subtitles from SRT content");
    Ok(subtitles)
}

/// Returns `(absolute_index, text)` for every subtitle whose text is
/// non-blank, `absolute_index` being its position in `subtitles`.
pub fn extract_translatable_text(subtitles: &[Subtitle]) -> Vec<(usize, &str)> {
    subtitles
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.text.trim().is_empty())
        .map(|(idx, s)| (idx, s.text.as_str()))
        .collect()
}

/// Overwrites `subtitles[idx].text` for each `(idx, translation)` pair whose
/// index is in bounds. Out-of-range indices are ignored.
pub fn update_translated_subtitles(subtitles: &mut [Subtitle], translations: &HashMap<usize, String>) {
    for (&idx, translation) in translations {
        if let Some(subtitle) = subtitles.get_mut(idx) {
            subtitle.text = translation.clone();
        }
    }
}

/// Joins subtitles back into `.srt` text, each cue rendered as
/// `number\nstart --> end\ntext\n`, blocks separated by a blank line.
pub fn reconstruct_srt(subtitles: &[Subtitle]) -> String {
    subtitles
        .iter()
        .map(|s| format!("{}\n{} --> {}\n{}\n", s.number, s.start_time, s.end_time, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// True if `content` contains at least one recognisable subtitle block.
pub fn validate_srt(content: &str) -> bool {
    parse_srt(content).is_ok()
}

/// A run of consecutive subtitles grouped for one translation request.
///
/// `absolute_indices` records every subtitle (translatable or blank) carried
/// in this block, in order; `translatable` holds the subset with non-blank
/// text, each paired with its 1-based position *within this block's
/// translatable subset* — the index the prompt renders as `[index]text` and
/// that [`extract_block_translations`] expects back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleGroup {
    /// Every subtitle index (into the original slice) carried by this block.
    pub absolute_indices: Vec<usize>,
    /// `(sequence_index, absolute_index)` pairs for the cues this block
    /// actually asks the model to translate. `sequence_index` is the cue's
    /// own declared number minus one — the index rendered in the prompt as
    /// `[index]text` and expected back unchanged — not its position within
    /// the block, so it survives blocks built from a renumbered or
    /// gap-containing subtitle list.
    pub translatable: Vec<(usize, usize)>,
}

/// Parses [`Subtitle::number`] as an integer and returns it minus one — the
/// 0-based index this crate uses as the subtitle's identity in prompts.
/// Returns `None` if `number` isn't a valid non-zero integer.
fn sequence_index(subtitle: &Subtitle) -> Option<usize> {
    subtitle.number.trim().parse::<usize>().ok()?.checked_sub(1)
}

/// Groups subtitles into translation blocks bounded by `lines_per_block`
/// translatable cues or `max_chars_per_block` translatable characters,
/// whichever comes first. Blank-text cues ride along with whatever block is
/// currently open without affecting either budget.
pub fn group_subtitles_for_translation(
    subtitles: &[Subtitle],
    lines_per_block: usize,
    max_chars_per_block: usize,
) -> Vec<SubtitleGroup> {
    if subtitles.is_empty() {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    let mut current_absolute: Vec<usize> = Vec::new();
    let mut current_translatable: Vec<(usize, usize)> = Vec::new();
    let mut current_char_count: usize = 0;

    for (idx, subtitle) in subtitles.iter().enumerate() {
        let text = subtitle.text.trim();
        if text.is_empty() {
            if !current_absolute.is_empty() {
                current_absolute.push(idx);
            }
            continue;
        }

        let text_length = text.chars().count();
        let would_exceed_lines = current_translatable.len() >= lines_per_block;
        let would_exceed_chars = current_char_count.saturating_add(text_length) > max_chars_per_block;

        if !current_absolute.is_empty() && (would_exceed_lines || would_exceed_chars) {
            blocks.push(SubtitleGroup {
                absolute_indices: std::mem::take(&mut current_absolute),
                translatable: std::mem::take(&mut current_translatable),
            });
            current_char_count = 0;
        }

        if let Some(seq_index) = sequence_index(subtitle) {
            current_translatable.push((seq_index, idx));
        }
        current_absolute.push(idx);
        current_char_count = current_char_count.saturating_add(text_length);
    }

    if !current_absolute.is_empty() {
        blocks.push(SubtitleGroup {
            absolute_indices: current_absolute,
            translatable: current_translatable,
        });
    }

    tracing::info!(
        subtitle_count = subtitles.len(),
        block_count = blocks.len(),
        "grouped subtitles into translation blocks"
    );
    blocks
}

static INDEX_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[(\d+)\](.*)$").expect("valid regex"));
static MULTIPLE_INDICES_ON_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S.*?)\s+(\[\d+\])").expect("valid regex"));

/// Parses a translated block back into `block_local_index -> text` pairs.
///
/// `block_indices` is the set of indices the prompt actually asked for;
/// indices missing from the response are logged, not treated as an error —
/// the caller decides whether a missing cue falls back to its source text.
pub fn extract_block_translations(translated_text: &str, block_indices: &[usize]) -> HashMap<usize, String> {
    let preprocessed = fix_multiple_indices_on_same_line(translated_text);

    let mut translations = HashMap::new();
    let mut current_index: Option<usize> = None;
    let mut current_lines: Vec<String> = Vec::new();

    for line in preprocessed.trim().split('\n') {
        if let Some(caps) = INDEX_LINE.captures(line) {
            if let (Some(idx), false) = (current_index, current_lines.is_empty()) {
                translations.insert(idx, current_lines.join("\n").trim().to_string());
            }

            let parsed: usize = caps[1].parse().unwrap_or(0);
            current_index = Some(parsed);
            let remaining = caps[2].trim();
            current_lines = if remaining.is_empty() {
                Vec::new()
            } else {
                vec![remaining.to_string()]
            };
        } else if current_index.is_some() {
            current_lines.push(line.to_string());
        }
    }

    if let (Some(idx), false) = (current_index, current_lines.is_empty()) {
        translations.insert(idx, current_lines.join("\n").trim().to_string());
    }

    let missing: Vec<usize> = block_indices
        .iter()
        .copied()
        .filter(|idx| !translations.contains_key(idx))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(?missing, "LLM response is missing translations for some indices");
    }

    translations
}

fn fix_multiple_indices_on_same_line(text: &str) -> String {
    MULTIPLE_INDICES_ON_LINE.replace_all(text, "$1\n$2").into_owned()
}

/// Progress/statistics snapshot reported after each translated block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SrtStats {
    /// Blocks translated (at least partially) successfully so far.
    pub completed: usize,
    /// Blocks that fell back to their original text after all retries.
    pub failed: usize,
    /// Total blocks to translate.
    pub total: usize,
}

/// Maximum times a block is retried against the LLM when its response is
/// missing one or more `[index]` tags (`spec.md` §4.7 "Block translation").
const MAX_BLOCK_TRANSLATION_ATTEMPTS: u32 = 3;

fn indices_present(text: &str, indices: &[usize]) -> bool {
    indices.iter().all(|&n| text.contains(&format!("[{n}]")))
}

/// Translates one block against `provider`, retrying up to
/// [`MAX_BLOCK_TRANSLATION_ATTEMPTS`] times with progressively more
/// emphatic instructions when the response drops an `[index]` tag. Returns
/// `None` if every attempt still fails to preserve all indices -- the
/// caller then leaves the block's subtitles at their source text.
async fn translate_block(
    group: &SubtitleGroup,
    subtitles: &[Subtitle],
    provider: &dyn LlmProvider,
    previous_block: &str,
    options: &crate::engine::TranslationOptions<'_>,
) -> Option<HashMap<usize, String>> {
    let payload: Vec<(usize, &str)> = group
        .translatable
        .iter()
        .map(|&(seq_index, absolute_index)| (seq_index, subtitles[absolute_index].text.as_str()))
        .collect();
    if payload.is_empty() {
        return Some(HashMap::new());
    }
    let expected: Vec<usize> = payload.iter().map(|(idx, _)| *idx).collect();
    let original_payload: String = payload.iter().map(|(_, text)| *text).collect::<Vec<_>>().join("\n");

    let mut instructions = options.custom_instructions.to_string();
    for attempt in 1..=MAX_BLOCK_TRANSLATION_ATTEMPTS {
        let request = prompt::subtitle_block_prompt(
            &payload,
            previous_block,
            options.source_language,
            options.target_language,
            &instructions,
        );
        match provider::translate(provider, &request, &original_payload).await {
            Ok(translated) if indices_present(&translated, &expected) => {
                return Some(extract_block_translations(&translated, &expected));
            }
            Ok(translated) => {
                tracing::warn!(attempt, "srt block response dropped index tags, retrying");
                let recovered = extract_block_translations(&translated, &expected);
                if expected.iter().all(|idx| recovered.contains_key(idx)) {
                    return Some(recovered);
                }
                instructions = format!(
                    "{}\nCRITICAL: preserve every [index] tag exactly as given, one per subtitle.",
                    options.custom_instructions
                );
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "srt block translation request failed");
            }
        }
    }
    None
}

/// Translates parsed SRT `content` end to end: groups subtitles into blocks
/// (`spec.md` §4.7 "Grouping"), translates each block in order with a
/// rolling "previous block" context, applies the default post-processing
/// pipeline to every translated cue, and optionally runs a second
/// LLM-driven post-processing pass per block. Polls `cancel` before each
/// new block, never mid-request. Blocks that fail every retry keep their
/// original text (`spec.md` §4.7, §7 "Semantic LLM failure").
///
/// # Errors
///
/// Returns [`SrtError::NoSubtitlesFound`] if `content` has no parseable
/// subtitle blocks.
pub async fn translate_srt(
    content: &str,
    provider: &dyn LlmProvider,
    lines_per_block: usize,
    max_chars_per_block: usize,
    options: &crate::engine::TranslationOptions<'_>,
    post_processor: &PostProcessor,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(f64),
    mut on_stats: impl FnMut(SrtStats),
) -> Result<String, SrtError> {
    let mut subtitles = parse_srt(content)?;
    let groups = group_subtitles_for_translation(&subtitles, lines_per_block, max_chars_per_block);
    let total = groups.len();
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut previous_block = String::new();

    for (block_idx, group) in groups.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(at_block = block_idx, total, "srt translation cancelled before next block");
            break;
        }
        on_progress(percent(block_idx, total));

        match translate_block(group, &subtitles, provider, &previous_block, options).await {
            Some(translations) => {
                let mut rendered = Vec::with_capacity(translations.len());
                for &(seq_index, absolute_index) in &group.translatable {
                    if let Some(text) = translations.get(&seq_index) {
                        let cleaned = post_processor.process(text);
                        subtitles[absolute_index].text = cleaned.clone();
                        rendered.push(format!("[{seq_index}]{cleaned}"));
                    }
                }

                if options.enable_post_processing && !rendered.is_empty() {
                    let joined = rendered.join("\n");
                    let request = prompt::post_processing_prompt(
                        &joined,
                        options.target_language,
                        options.post_processing_instructions,
                        true,
                    );
                    if let Ok(improved) = provider::translate(provider, &request, "").await {
                        let expected: Vec<usize> = group.translatable.iter().map(|&(idx, _)| idx).collect();
                        if indices_present(&improved, &expected) {
                            let reextracted = extract_block_translations(&improved, &expected);
                            for &(seq_index, absolute_index) in &group.translatable {
                                if let Some(text) = reextracted.get(&seq_index) {
                                    subtitles[absolute_index].text = post_processor.process(text);
                                }
                            }
                        }
                    }
                }

                previous_block = rendered.join("\n");
                completed = completed.saturating_add(1);
            }
            None => {
                tracing::warn!(block = block_idx, "srt block translation failed after all retries, keeping source text");
                previous_block.clear();
                failed = failed.saturating_add(1);
            }
        }

        on_stats(SrtStats { completed, failed, total });
    }

    on_progress(100.0);
    Ok(reconstruct_srt(&subtitles))
}

#[allow(clippy::cast_precision_loss)] // block counts are small enough for f64
fn percent(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (index as f64 / total as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello there.\n\n2\n00:00:03,000 --> 00:00:04,000\nGoodbye.\n";

    #[test]
    fn parse_srt_reads_two_cues() {
        let subs = parse_srt(SAMPLE).expect("parses");
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].number, "1");
        assert_eq!(subs[0].start_time, "00:00:01,000");
        assert_eq!(subs[0].text, "Hello there.");
        assert_eq!(subs[1].text, "Goodbye.");
    }

    #[test]
    fn parse_srt_normalizes_crlf() {
        let crlf = SAMPLE.replace('\n', "\r\n");
        let subs = parse_srt(&crlf).expect("parses");
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn parse_srt_skips_malformed_blocks() {
        let content = "not a number\nbogus\ntext\n\n1\n00:00:01,000 --> 00:00:02,000\nReal cue.\n";
        let subs = parse_srt(content).expect("parses");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].text, "Real cue.");
    }

    #[test]
    fn parse_srt_errors_when_nothing_parses() {
        assert!(matches!(parse_srt("garbage\n\nmore garbage"), Err(SrtError::NoSubtitlesFound)));
    }

    #[test]
    fn extract_translatable_text_skips_blank_cues() {
        let mut subs = parse_srt(SAMPLE).expect("parses");
        subs.push(Subtitle {
            number: "3".to_string(),
            start_time: "00:00:05,000".to_string(),
            end_time: "00:00:06,000".to_string(),
            text: "   ".to_string(),
            original_text: "   ".to_string(),
        });
        let translatable = extract_translatable_text(&subs);
        assert_eq!(translatable.len(), 2);
    }

    #[test]
    fn update_translated_subtitles_overwrites_by_index() {
        let mut subs = parse_srt(SAMPLE).expect("parses");
        let mut translations = HashMap::new();
        translations.insert(0, "Bonjour.".to_string());
        update_translated_subtitles(&mut subs, &translations);
        assert_eq!(subs[0].text, "Bonjour.");
        assert_eq!(subs[1].text, "Goodbye.");
    }

    #[test]
    fn reconstruct_srt_round_trips_structure() {
        let subs = parse_srt(SAMPLE).expect("parses");
        let out = reconstruct_srt(&subs);
        assert!(out.contains("1\n00:00:01,000 --> 00:00:02,000\nHello there.\n"));
        assert!(out.contains("2\n00:00:03,000 --> 00:00:04,000\nGoodbye.\n"));
    }

    #[test]
    fn validate_srt_detects_valid_content() {
        assert!(validate_srt(SAMPLE));
        assert!(!validate_srt("not an srt file at all"));
    }

    #[test]
    fn group_subtitles_respects_lines_per_block() {
        let mut content = String::new();
        for i in 1..=12 {
            content.push_str(&format!("{i}\n00:00:0{}:00,000 --> 00:00:0{}:01,000\nLine {i}.\n\n", i % 6, i % 6));
        }
        let subs = parse_srt(&content).expect("parses");
        let groups = group_subtitles_for_translation(&subs, 5, 10_000);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].translatable.len(), 5);
        assert_eq!(groups[2].translatable.len(), 2);
    }

    #[test]
    fn group_subtitles_respects_char_budget() {
        let content = "1\n00:00:01,000 --> 00:00:02,000\n\
             This is a fairly long subtitle line that eats much of the budget.\n\n\
             2\n00:00:03,000 --> 00:00:04,000\n\
             This is another fairly long subtitle line eating the rest of it.\n\n\
             3\n00:00:05,000 --> 00:00:06,000\nShort.\n";
        let subs = parse_srt(content).expect("parses");
        let groups = group_subtitles_for_translation(&subs, 100, 100);
        assert!(groups.len() >= 2);
    }

    #[test]
    fn group_subtitles_carries_blank_cues_along() {
        let content = "1\n00:00:01,000 --> 00:00:02,000\nHello.\n\n\
             2\n00:00:03,000 --> 00:00:04,000\n \n\n\
             3\n00:00:05,000 --> 00:00:06,000\nWorld.\n";
        let subs = parse_srt(content).expect("parses");
        let groups = group_subtitles_for_translation(&subs, 5, 10_000);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].absolute_indices, vec![0, 1, 2]);
        assert_eq!(groups[0].translatable, vec![(0, 0), (2, 2)]);
    }

    #[test]
    fn extract_block_translations_parses_indexed_lines() {
        let response = "[1]Bonjour.\n[2]Au revoir,\nmon ami.";
        let out = extract_block_translations(response, &[1, 2]);
        assert_eq!(out.get(&1), Some(&"Bonjour.".to_string()));
        assert_eq!(out.get(&2), Some(&"Au revoir,\nmon ami.".to_string()));
    }

    #[test]
    fn extract_block_translations_fixes_indices_crammed_on_one_line() {
        let response = "[1]Bonjour. [2]Au revoir.";
        let out = extract_block_translations(response, &[1, 2]);
        assert_eq!(out.get(&1), Some(&"Bonjour.".to_string()));
        assert_eq!(out.get(&2), Some(&"Au revoir.".to_string()));
    }

    #[test]
    fn extract_block_translations_logs_missing_without_failing() {
        let response = "[1]Only one.";
        let out = extract_block_translations(response, &[1, 2]);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(&1));
    }
}
