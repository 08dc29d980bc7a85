//! Prompt construction for the translation engine and the SRT block
//! translator.
//!
//! Section wording is ported from the original prompt templates. Two
//! deliberate departures from that source: the payload wrapper uses
//! square-bracket `[TO TRANSLATE]`/`[/TO TRANSLATE]` markers rather than the
//! source's angle-bracket form (the input-marker contract this crate
//! implements), and `context_before`/`context_after` are never turned into
//! their own prompt section — the source accepts them as parameters but
//! never actually references them in the rendered text either, and the
//! section list below covers everything that is rendered.
//!
//! Tags wrapping the *expected model output* (as opposed to the payload
//! sent to it) are a separate pair, `<TRANSLATED>`/`</TRANSLATED>`; the
//! engine strips them back off when parsing a response.

/// Opening marker around the payload sent for translation.
pub const INPUT_TAG_IN: &str = "[TO TRANSLATE]";
/// Closing marker around the payload sent for translation.
pub const INPUT_TAG_OUT: &str = "[/TO TRANSLATE]";
/// Opening marker the model is asked to wrap its answer in.
pub const OUTPUT_TAG_IN: &str = "<TRANSLATED>";
/// Closing marker the model is asked to wrap its answer in.
pub const OUTPUT_TAG_OUT: &str = "</TRANSLATED>";

/// Builds the prompt for a single plain-text or EPUB sub-chunk.
///
/// `previous_translation_context` is the engine's rolling context (the
/// tail end of the most recently translated chunk); an empty string omits
/// the "Previous paragraph" section entirely, matching the source's
/// `.strip()` emptiness check.
pub fn translation_prompt(
    main_content: &str,
    previous_translation_context: &str,
    source_language: &str,
    target_language: &str,
    custom_instructions: &str,
) -> String {
    let source_lang = source_language.to_uppercase();

    let role_block = format!(
        "## ROLE\n\
         # You are a {target_language} writer.\n\n\
         ## TRANSLATION\n\
         + Translate in the author's style\n\
         + Preserve meaning and enhance fluidity\n\
         + Adapt expressions and culture to the {target_language} language\n\
         + Maintain the original layout of the text\n\n\
         ## FORMATING\n\
         + Translate ONLY the text enclosed within the tags \"{INPUT_TAG_IN}\" and \"{INPUT_TAG_OUT}\" from {source_lang} into {target_language}\n\
         + Surround your translation with {OUTPUT_TAG_IN} and {OUTPUT_TAG_OUT} tags. For example: {OUTPUT_TAG_IN}Your text translated here.{OUTPUT_TAG_OUT}\n\
         + Return ONLY the translation, formatted as requested"
    );

    let custom_block = if custom_instructions.trim().is_empty() {
        String::new()
    } else {
        format!("### INSTRUCTIONS\n{}", custom_instructions.trim())
    };

    let previous_block = if previous_translation_context.trim().is_empty() {
        String::new()
    } else {
        format!(
            "## Previous paragraph :\n(...) {}",
            previous_translation_context.trim()
        )
    };

    let payload_block = format!("{INPUT_TAG_IN}\n{main_content}\n{INPUT_TAG_OUT}");

    join_nonempty_sections(&[role_block, custom_block, previous_block, payload_block])
}

/// Builds the prompt for a block of `[index]text` subtitles.
///
/// `subtitles` pairs each subtitle's 1-based index with its source text;
/// the rendered payload formats each as `[index]text` on its own line.
pub fn subtitle_block_prompt(
    subtitles: &[(usize, &str)],
    previous_translation_block: &str,
    source_language: &str,
    target_language: &str,
    custom_instructions: &str,
) -> String {
    let source_lang = source_language.to_uppercase();

    let role_block = format!(
        "## ROLE\n\
         # You are a {target_language} subtitle translator and dialogue adaptation specialist.\n\n\
         ## TRANSLATION\n\
         + Translate dialogues naturally for subtitles\n\
         + Adapt expressions and cultural references for {target_language} viewers\n\
         + Keep subtitle length appropriate for reading speed\n\n\
         ## FORMATING\n\
         + Translate ONLY the text enclosed within the tags \"{INPUT_TAG_IN}\" and \"{INPUT_TAG_OUT}\" from {source_lang} into {target_language}\n\
         + Each subtitle is marked with its index: [index]text\n\
         + Always start a new line at the end of each subtitle\n\
         + Preserve the index markers in your translation\n\
         + Surround your ENTIRE translation block with {OUTPUT_TAG_IN} and {OUTPUT_TAG_OUT} tags\n\
         + Return ONLY the translation block, formatted as requested\n\
         + Maintain line breaks between indexed subtitles"
    );

    let custom_block = if custom_instructions.trim().is_empty() {
        String::new()
    } else {
        format!("### ADDITIONAL INSTRUCTIONS\n{}", custom_instructions.trim())
    };

    let previous_block = if previous_translation_block.trim().is_empty() {
        String::new()
    } else {
        format!(
            "## Previous subtitle block (for context and consistency):\n{}",
            previous_translation_block.trim()
        )
    };

    let formatted: Vec<String> = subtitles
        .iter()
        .map(|(idx, text)| format!("[{idx}]{text}"))
        .collect();
    let payload_block = format!(
        "{INPUT_TAG_IN}\n{}\n{INPUT_TAG_OUT}",
        formatted.join("\n")
    );

    join_nonempty_sections(&[role_block, custom_block, previous_block, payload_block])
}

/// Builds the prompt for a post-processing pass over an already-translated
/// text: ask the model to improve fluidity without changing meaning, wrapped
/// in the same input/output markers as a translation request.
///
/// `preserve_tokens` is set when the text being improved still carries
/// placeholder tags (EPUB inline markup or SRT `[index]` markers); it adds
/// an imperative instruction to keep those tokens exactly as they appear,
/// matching the "CRITICAL: you must preserve..." reinforcement the source
/// adds on post-processing retries (`spec.md` §4.4, §4.6, §4.7).
pub fn post_processing_prompt(
    text: &str,
    target_language: &str,
    custom_instructions: &str,
    preserve_tokens: bool,
) -> String {
    let mut role_block = format!(
        "## ROLE\n\
         # You are a {target_language} editor improving an existing translation.\n\n\
         ## IMPROVEMENT\n\
         + Improve fluidity and natural phrasing\n\
         + Do NOT change the meaning of the text\n\
         + Do NOT add or remove content\n\n\
         ## FORMATING\n\
         + Improve ONLY the text enclosed within the tags \"{INPUT_TAG_IN}\" and \"{INPUT_TAG_OUT}\"\n\
         + Surround your answer with {OUTPUT_TAG_IN} and {OUTPUT_TAG_OUT} tags\n\
         + Return ONLY the improved text, formatted as requested"
    );

    if preserve_tokens {
        role_block.push_str(
            "\n+ CRITICAL: preserve every placeholder token (e.g. \u{27e6}TAG0\u{27e7} or [0]) exactly as it appears, in the same position",
        );
    }

    let custom_block = if custom_instructions.trim().is_empty() {
        String::new()
    } else {
        format!("### INSTRUCTIONS\n{}", custom_instructions.trim())
    };

    let payload_block = format!("{INPUT_TAG_IN}\n{text}\n{INPUT_TAG_OUT}");

    join_nonempty_sections(&[role_block, custom_block, payload_block])
}

fn join_nonempty_sections(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

/// Strips the model's `<TRANSLATED>...</TRANSLATED>` wrapper from a raw
/// response, falling back to the whole trimmed response if the wrapper is
/// missing -- *unless* that raw response contains `original_text` verbatim,
/// which means the model echoed its input instead of translating it
/// (`spec.md` §4.1, §7 "Semantic LLM failure"). `original_text` may be
/// empty to skip the echo check entirely (the post-processing pass reuses
/// this extractor but has no meaningful "echo of the source" to guard
/// against -- returning the prior translation unchanged is a legitimate
/// no-op improvement there).
///
/// Returns `None` when the response must be discarded as a chunk failure.
pub fn extract_translation(raw_response: &str, original_text: &str) -> Option<String> {
    let trimmed = raw_response.trim();
    if let (Some(start), Some(end)) = (trimmed.find(OUTPUT_TAG_IN), trimmed.rfind(OUTPUT_TAG_OUT)) {
        if start.saturating_add(OUTPUT_TAG_IN.len()) <= end {
            return Some(trimmed[start.saturating_add(OUTPUT_TAG_IN.len())..end].trim().to_string());
        }
    }

    let original = original_text.trim();
    if !original.is_empty() && trimmed.contains(original) {
        return None;
    }
    Some(trimmed.to_string())
}
