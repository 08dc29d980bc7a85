//! Translation Engine (C5): sequential chunk-by-chunk translation with a
//! rolling stylistic-context window, post-processing, and cooperative
//! cancellation.
//!
//! Grounded on `original_source/src/core/translator.py::translate_chunks`.
//! One deliberate simplification: the Python source retries the *whole*
//! `generate_translation_request` call up to `MAX_TRANSLATION_ATTEMPTS`
//! times at this layer, sleeping `RETRY_DELAY_SECONDS` between attempts --
//! but [`crate::provider::LlmProvider::generate`] already implements that
//! exact retry loop one layer down (`spec.md` §4.1). Retrying here too would
//! silently double the effective attempt count, so this engine makes a
//! single call per chunk and treats the provider's own exhaustion as the
//! chunk's failure, matching `spec.md` §4.5's "after the provider's internal
//! retries" wording precisely.
//!
//! Chunks are never translated concurrently: the rolling context makes each
//! chunk depend on the previous chunk's successful output (`spec.md` §5).

use crate::cancel::CancellationToken;
use crate::chunk::Chunk;
use crate::postprocess::PostProcessor;
use crate::prompt;
use crate::provider::{self, LlmProvider};

/// Per-job translation parameters threaded through every chunk.
pub struct TranslationOptions<'a> {
    /// Source language name, as configured (prompt builder uppercases it).
    pub source_language: &'a str,
    /// Target language name, as configured.
    pub target_language: &'a str,
    /// Free-form instructions appended to the translation prompt.
    pub custom_instructions: &'a str,
    /// Whether a second LLM pass improves each chunk after translation.
    pub enable_post_processing: bool,
    /// Free-form instructions appended to the post-processing prompt.
    pub post_processing_instructions: &'a str,
    /// Maximum trailing words of a successful translation carried forward
    /// as the next chunk's "previous paragraph" context.
    pub rolling_context_words: usize,
}

/// Outcome of translating a single chunk, reported to the stats callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk was passed through untouched (blank or single-character `main_content`).
    Skipped,
    /// Chunk was translated successfully (post-processed if enabled).
    Success,
    /// Chunk failed after the provider's internal retries; an error
    /// placeholder wrapping the original text was emitted instead.
    Failed,
}

/// Shrinks `text` to at most `max_words` trailing words.
fn rolling_context_suffix(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[words.len().saturating_sub(max_words)..].join(" ")
    }
}

/// Wraps `original` in the visible `[TRANSLATION_ERROR SEGMENT n]` marker
/// `spec.md` §4.5 specifies, so a failed chunk is never silently dropped.
fn error_placeholder(index: usize, original: &str) -> String {
    format!("[TRANSLATION_ERROR SEGMENT {index}]\n{original}\n[/TRANSLATION_ERROR SEGMENT {index}]")
}

/// Translates one chunk against `provider`, applying post-processing when
/// enabled. `preserve_tokens` should be set when `chunk.main_content` still
/// carries placeholder tags (the EPUB and SRT callers set it so the
/// post-processing prompt reinforces preservation).
///
/// Returns `(emitted_text, outcome, next_rolling_context)`. The rolling
/// context is cleared on failure, matching `spec.md` §4.5.
pub async fn translate_one(
    chunk: &Chunk,
    index: usize,
    provider: &dyn LlmProvider,
    rolling_context: &str,
    options: &TranslationOptions<'_>,
    post_processor: &PostProcessor,
    preserve_tokens: bool,
) -> (String, ChunkOutcome, String) {
    if chunk.main_content.trim().chars().count() <= 1 {
        return (
            chunk.main_content.clone(),
            ChunkOutcome::Skipped,
            rolling_context.to_string(),
        );
    }

    let request = prompt::translation_prompt(
        &chunk.main_content,
        rolling_context,
        options.source_language,
        options.target_language,
        options.custom_instructions,
    );

    match provider::translate(provider, &request, &chunk.main_content).await {
        Ok(translated) => {
            let mut text = post_processor.process(&translated);
            if options.enable_post_processing {
                text = run_post_processing_pass(&text, provider, options, post_processor, preserve_tokens).await;
            }
            let next_context = rolling_context_suffix(&text, options.rolling_context_words);
            (text, ChunkOutcome::Success, next_context)
        }
        Err(e) => {
            tracing::warn!(chunk = index, error = %e, "chunk translation failed, preserving original");
            (error_placeholder(index, &chunk.main_content), ChunkOutcome::Failed, String::new())
        }
    }
}

async fn run_post_processing_pass(
    text: &str,
    provider: &dyn LlmProvider,
    options: &TranslationOptions<'_>,
    post_processor: &PostProcessor,
    preserve_tokens: bool,
) -> String {
    let request = prompt::post_processing_prompt(
        text,
        options.target_language,
        options.post_processing_instructions,
        preserve_tokens,
    );
    match provider::translate(provider, &request, "").await {
        Ok(improved) => post_processor.process(&improved),
        Err(e) => {
            tracing::warn!(error = %e, "post-processing pass failed, keeping pre-post-processing translation");
            text.to_string()
        }
    }
}

/// Translates `chunks` in order, calling `on_progress` before each chunk and
/// `on_chunk` after it completes, and polling `cancel` between chunks --
/// never mid-request (`spec.md` §5). Returns one output string per input
/// chunk, in order, with fewer entries than `chunks` iff cancellation cut
/// the run short.
pub async fn translate_chunks(
    chunks: &[Chunk],
    provider: &dyn LlmProvider,
    options: &TranslationOptions<'_>,
    post_processor: &PostProcessor,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(f64),
    mut on_chunk: impl FnMut(ChunkOutcome),
) -> Vec<String> {
    let total = chunks.len();
    let mut outputs = Vec::with_capacity(total);
    let mut rolling_context = String::new();

    for (i, chunk) in chunks.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(at_chunk = i, total, "translation cancelled before next chunk");
            break;
        }
        on_progress(percent(i, total));

        let (text, outcome, next_context) = translate_one(
            chunk,
            i.saturating_add(1),
            provider,
            &rolling_context,
            options,
            post_processor,
            false,
        )
        .await;
        rolling_context = next_context;
        outputs.push(text);
        on_chunk(outcome);
    }

    outputs
}

#[allow(clippy::cast_precision_loss)] // chunk counts are small enough for f64
fn percent(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (index as f64 / total as f64) * 100.0
}
