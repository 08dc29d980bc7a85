//! Pluggable post-processing rules applied to translated text before it is
//! handed back to the caller.
//!
//! Rule bodies (the entity table, the whitespace-collapsing regexes, the
//! residual-tag-marker regexes) are ported from the original post-processor.
//! The *default pipeline* differs from it deliberately: the original runs
//! tag-marker removal unconditionally before anything else, but by the time
//! post-processing runs in this crate every chunk has already gone through
//! [`crate::tags::TagPreserver::restore`], so residual `TAGn` markers in the
//! output would indicate an unrestored placeholder rather than ordinary
//! noise to strip. The default pipeline here is HTML-entity cleanup followed
//! by whitespace normalization; [`TagMarkerCleanupRule`] exists and can be
//! added explicitly by a caller that wants the original's more aggressive
//! behaviour.

use std::sync::LazyLock;

use regex::Regex;

/// A single text-cleaning step.
pub trait PostProcessingRule: Send + Sync {
    /// Applies this rule, returning the transformed text.
    fn apply(&self, text: &str) -> String;

    /// Human-readable description, surfaced in logs and [`PostProcessor::rules`].
    fn description(&self) -> &str;

    /// Stable identity used by [`PostProcessor::remove_rule`] to find and
    /// drop a rule by type without needing `Any`/downcasting.
    fn name(&self) -> &'static str;
}

/// Collapses repeated `&nbsp;` runs into real non-breaking spaces and
/// rewrites the other common HTML entities a model might emit.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlEntityCleanupRule;

static NBSP_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:&nbsp;)+").expect("valid regex"));

const ENTITY_REPLACEMENTS: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&mdash;", "—"),
    ("&ndash;", "–"),
    ("&hellip;", "…"),
];

impl PostProcessingRule for HtmlEntityCleanupRule {
    fn apply(&self, text: &str) -> String {
        let mut out = NBSP_RUN
            .replace_all(text, |caps: &regex::Captures| {
                let matched = &caps[0];
                "\u{00A0}".repeat(matched.len() / "&nbsp;".len())
            })
            .into_owned();
        for (entity, replacement) in ENTITY_REPLACEMENTS {
            out = out.replace(entity, replacement);
        }
        out
    }

    fn description(&self) -> &str {
        "Clean up HTML entities"
    }

    fn name(&self) -> &'static str {
        "html_entity_cleanup"
    }
}

/// Collapses repeated spaces, drops spaces before punctuation, collapses
/// runs of 3+ newlines down to a blank line, and trims the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceNormalizationRule;

static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").expect("valid regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +([.,!?;:])").expect("valid regex"));
static TRIPLE_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").expect("valid regex"));

impl PostProcessingRule for WhitespaceNormalizationRule {
    fn apply(&self, text: &str) -> String {
        let out = MULTI_SPACE.replace_all(text, " ");
        let out = SPACE_BEFORE_PUNCT.replace_all(&out, "$1");
        let out = TRIPLE_NEWLINE.replace_all(&out, "\n\n");
        out.trim().to_string()
    }

    fn description(&self) -> &str {
        "Remove extra whitespace and clean punctuation spacing"
    }

    fn name(&self) -> &'static str {
        "whitespace_normalization"
    }
}

/// Strips residual `[[TAGn]]`/`TAGn`/orphaned bracket markers. Not part of
/// the default pipeline (see module docs); useful as a last-resort cleanup
/// when a caller accepts that an unrestored placeholder means lost markup
/// rather than wants to surface it as an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagMarkerCleanupRule;

static DOUBLE_BRACKET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[TAG\d+\]\]").expect("valid regex"));
static BARE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"TAG\d+").expect("valid regex"));
static ORPHAN_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[|\]\]").expect("valid regex"));

impl PostProcessingRule for TagMarkerCleanupRule {
    fn apply(&self, text: &str) -> String {
        let out = DOUBLE_BRACKET_TAG.replace_all(text, "");
        let out = BARE_TAG.replace_all(&out, "");
        ORPHAN_BRACKETS.replace_all(&out, "").into_owned()
    }

    fn description(&self) -> &str {
        "Remove TAG markers and square brackets"
    }

    fn name(&self) -> &'static str {
        "tag_marker_cleanup"
    }
}

/// Runs an ordered list of [`PostProcessingRule`]s over translated text.
pub struct PostProcessor {
    rules: Vec<Box<dyn PostProcessingRule>>,
}

impl Default for PostProcessor {
    /// The default pipeline: HTML-entity cleanup, then whitespace
    /// normalization. Residual tag-marker cleanup is intentionally excluded
    /// (see module docs).
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(HtmlEntityCleanupRule),
                Box::new(WhitespaceNormalizationRule),
            ],
        }
    }
}

impl PostProcessor {
    /// An empty pipeline with no rules registered.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Appends a rule to the end of the pipeline.
    pub fn add_rule(&mut self, rule: Box<dyn PostProcessingRule>) {
        self.rules.push(rule);
    }

    /// Removes every rule whose [`PostProcessingRule::name`] matches `name`.
    pub fn remove_rule(&mut self, name: &str) {
        self.rules.retain(|r| r.name() != name);
    }

    /// Applies every rule in order. Empty input is returned unchanged.
    pub fn process(&self, text: &str) -> String {
        if text.is_empty() {
            return text.to_string();
        }
        let mut result = text.to_string();
        for rule in &self.rules {
            tracing::debug!(rule = rule.description(), "applying post-processing rule");
            result = rule.apply(&result);
        }
        result
    }

    /// Lists the active rules as `(name, description)` pairs.
    pub fn rules(&self) -> Vec<(&'static str, &str)> {
        self.rules.iter().map(|r| (r.name(), r.description())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_cleans_entities_and_whitespace() {
        let pp = PostProcessor::default();
        let input = "Hello&nbsp;&nbsp;&nbsp;&nbsp;&nbsp;&nbsp;world &amp; friends  ,   done.";
        let out = pp.process(input);
        assert!(out.contains('\u{00A0}'));
        assert!(out.contains("world & friends"));
        assert!(!out.contains("  "));
    }

    #[test]
    fn default_pipeline_does_not_strip_tag_markers() {
        let pp = PostProcessor::default();
        let out = pp.process("prefix [[TAG1]] suffix");
        assert!(out.contains("[[TAG1]]"));
    }

    #[test]
    fn tag_marker_cleanup_strips_residual_markers_when_added_explicitly() {
        let mut pp = PostProcessor::default();
        pp.add_rule(Box::new(TagMarkerCleanupRule));
        let out = pp.process("This is [[TAG1]] a test with TAG2 markers and ]] orphans [[ .");
        assert!(!out.contains("TAG"));
        assert!(!out.contains("[["));
        assert!(!out.contains("]]"));
    }

    #[test]
    fn remove_rule_drops_rule_by_name() {
        let mut pp = PostProcessor::default();
        pp.remove_rule("whitespace_normalization");
        assert_eq!(pp.rules().len(), 1);
        assert_eq!(pp.rules()[0].0, "html_entity_cleanup");
    }

    #[test]
    fn empty_pipeline_passes_text_through() {
        let pp = PostProcessor::empty();
        assert_eq!(pp.process("unchanged  text"), "unchanged  text");
    }

    #[test]
    fn empty_input_returns_empty() {
        let pp = PostProcessor::default();
        assert_eq!(pp.process(""), "");
    }

    #[test]
    fn whitespace_rule_collapses_triple_newlines() {
        let rule = WhitespaceNormalizationRule;
        assert_eq!(rule.apply("a\n\n\n\nb"), "a\n\nb");
    }
}
