//! Tag preservation: swap HTML/XML tags for opaque placeholders before a
//! chunk crosses the LLM boundary, then restore them afterwards.
//!
//! The placeholder alphabet (`⟦TAGn⟧`, U+27E6/U+27E7, numbered from 0 in
//! document order) and the `<[^>]+>` extraction regex are a direct port of
//! the original tag preserver. Models sometimes return a placeholder in a
//! mangled form — `[[TAG3]]`, `[TAG3]`, `{TAG3}`, `<TAG3>`, or bare `TAG3` —
//! so [`TagPreserver::validate`] distinguishes those recoverable mutations
//! from placeholders that vanished outright, and [`TagPreserver::fix_mutations`]
//! repairs the former before [`TagPreserver::restore`] runs.

use std::sync::LazyLock;

use regex::Regex;

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

static DOUBLE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[TAG(\d+)\]\]").expect("valid regex"));
static SINGLE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[TAG(\d+)\]").expect("valid regex"));
static BRACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{TAG(\d+)\}").expect("valid regex"));
static ANGLE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<TAG(\d+)>").expect("valid regex"));
static BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^⟦\w])TAG(\d+)(?:[^⟧\w]|$)").expect("valid regex"));

/// Outcome of [`TagPreserver::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// True iff every placeholder appears in its canonical `⟦TAGn⟧` form.
    pub ok: bool,
    /// Tag numbers that appear nowhere at all, not even in a mutated form.
    pub missing: Vec<usize>,
    /// Tag numbers that appear in a recognisable mutated form and can be
    /// repaired by [`TagPreserver::fix_mutations`].
    pub mutated: Vec<usize>,
}

/// Swaps markup for placeholders on the way into the LLM, and back again
/// on the way out.
///
/// One preserver is created per chunk/job-item; tag numbering restarts at 0
/// each time, matching the source's per-call `TagPreserver` lifetime.
#[derive(Debug, Default, Clone)]
pub struct TagPreserver {
    tags: Vec<String>,
}

impl TagPreserver {
    /// Creates an empty preserver with no tags captured yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags captured so far.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if no tags have been captured.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Replaces every `<...>` tag in `text` with a numbered placeholder,
    /// appending the original tag text to the internal table.
    pub fn protect(&mut self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut last_end = 0;
        for m in TAG_REGEX.find_iter(text) {
            result.push_str(&text[last_end..m.start()]);
            let number = self.tags.len();
            self.tags.push(m.as_str().to_string());
            result.push_str(&format!("⟦TAG{number}⟧"));
            last_end = m.end();
        }
        result.push_str(&text[last_end..]);
        result
    }

    /// Replaces every canonical placeholder with its original tag text.
    ///
    /// Iterates tag numbers from highest to lowest so that, for mutated
    /// placeholder forms that have not yet been canonicalised, a shorter
    /// number (`TAG1`) is never mistaken for a prefix of a longer one
    /// (`TAG10`).
    pub fn restore(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (idx, tag) in self.tags.iter().enumerate().rev() {
            let placeholder = format!("⟦TAG{idx}⟧");
            out = out.replace(&placeholder, tag);
        }
        out
    }

    /// Rewrites mangled placeholder forms (`[[TAGn]]`, `[TAGn]`, `{TAGn}`,
    /// `<TAGn>`, bare `TAGn`) back into the canonical `⟦TAGn⟧` form, for
    /// numbers that are actually known to this preserver. Unknown numbers
    /// are left untouched since they cannot be attributed to a captured tag.
    pub fn fix_mutations(&self, text: &str) -> String {
        let mut out = text.to_string();
        out = rewrite_numbered(&out, &DOUBLE_BRACKET, self.tags.len());
        out = rewrite_numbered(&out, &SINGLE_BRACKET, self.tags.len());
        out = rewrite_numbered(&out, &BRACE, self.tags.len());
        out = rewrite_numbered(&out, &ANGLE_BRACKET, self.tags.len());
        out = rewrite_bare(&out, self.tags.len());
        out
    }

    /// Checks every known tag number against `text`: present in canonical
    /// form, present only in a mutated form, or missing outright.
    pub fn validate(&self, text: &str) -> ValidationReport {
        let mut missing = Vec::new();
        let mut mutated = Vec::new();

        for n in 0..self.tags.len() {
            if text.contains(&format!("⟦TAG{n}⟧")) {
                continue;
            }
            if mutation_present(text, n) {
                mutated.push(n);
            } else {
                missing.push(n);
            }
        }

        ValidationReport {
            ok: missing.is_empty() && mutated.is_empty(),
            missing,
            mutated,
        }
    }
}

fn mutation_present(text: &str, n: usize) -> bool {
    DOUBLE_BRACKET
        .captures_iter(text)
        .any(|c| c[1].parse::<usize>() == Ok(n))
        || SINGLE_BRACKET.captures_iter(text).any(|c| c[1].parse::<usize>() == Ok(n))
        || BRACE.captures_iter(text).any(|c| c[1].parse::<usize>() == Ok(n))
        || ANGLE_BRACKET.captures_iter(text).any(|c| c[1].parse::<usize>() == Ok(n))
        || BARE.captures_iter(text).any(|c| c[1].parse::<usize>() == Ok(n))
}

fn rewrite_numbered(text: &str, re: &Regex, known: usize) -> String {
    re.replace_all(text, |caps: &regex::Captures| {
        let n: usize = caps[1].parse().unwrap_or(usize::MAX);
        if n < known {
            format!("⟦TAG{n}⟧")
        } else {
            caps[0].to_string()
        }
    })
    .into_owned()
}

fn rewrite_bare(text: &str, known: usize) -> String {
    // Bare `TAGn` only appears after the bracketed forms have already been
    // canonicalised, so anything still matching here had no delimiter at all.
    BARE.replace_all(text, |caps: &regex::Captures| {
        let n: usize = caps[1].parse().unwrap_or(usize::MAX);
        let whole = &caps[0];
        if n < known {
            whole.replace(&format!("TAG{n}"), &format!("⟦TAG{n}⟧"))
        } else {
            whole.to_string()
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_then_restore_round_trips() {
        let mut tp = TagPreserver::new();
        let protected = tp.protect("<p>Hello <b>world</b></p>");
        assert!(!protected.contains('<'));
        let restored = tp.restore(&protected);
        assert_eq!(restored, "<p>Hello <b>world</b></p>");
    }

    #[test]
    fn protect_numbers_placeholders_from_zero() {
        let mut tp = TagPreserver::new();
        let protected = tp.protect("<p>Hello <strong>world</strong>!<br/>Line2</p>");
        assert_eq!(
            protected,
            "⟦TAG0⟧Hello ⟦TAG1⟧world⟦TAG2⟧!⟦TAG3⟧Line2⟦TAG4⟧"
        );
        assert_eq!(tp.len(), 5);
    }

    #[test]
    fn scenario_placeholder_round_trip_restores_original_structure() {
        let mut tp = TagPreserver::new();
        let protected = tp.protect("<p>Hello <strong>world</strong>!<br/>Line2</p>");
        let simulated_llm_output = "⟦TAG0⟧Salut ⟦TAG1⟧le monde⟦TAG2⟧ !⟦TAG3⟧Ligne 2⟦TAG4⟧";
        assert_eq!(protected.matches("⟦TAG").count(), 5);
        let report = tp.validate(simulated_llm_output);
        assert!(report.ok);
        let restored = tp.restore(simulated_llm_output);
        assert_eq!(restored, "<p>Salut <strong>le monde</strong> !<br/>Ligne 2</p>");
    }

    #[test]
    fn restore_handles_ten_or_more_tags_without_prefix_collision() {
        let mut tp = TagPreserver::new();
        let mut text = String::new();
        for i in 0..12 {
            text.push_str(&format!("<t{i}>"));
        }
        let protected = tp.protect(&text);
        assert_eq!(tp.len(), 12);
        assert_eq!(tp.restore(&protected), text);
    }

    #[test]
    fn fix_mutations_repairs_bracket_variants() {
        let mut tp = TagPreserver::new();
        let protected = tp.protect("<em>hi</em> <i>there</i>");
        assert_eq!(tp.len(), 2);
        let mutated = "[[TAG0]] hi [TAG1]";
        let fixed = tp.fix_mutations(mutated);
        assert_eq!(fixed, "⟦TAG0⟧ hi ⟦TAG1⟧");
    }

    #[test]
    fn fix_mutations_repairs_brace_angle_and_bare_forms() {
        let mut tp = TagPreserver::new();
        tp.protect("<a><b><c>");
        assert_eq!(tp.fix_mutations("{TAG0} <TAG1> TAG2"), "⟦TAG0⟧ ⟦TAG1⟧ ⟦TAG2⟧");
    }

    #[test]
    fn fix_mutations_leaves_unknown_numbers_untouched() {
        let tp = TagPreserver::new();
        assert_eq!(tp.fix_mutations("[TAG99]"), "[TAG99]");
    }

    #[test]
    fn scenario_mutation_repair_detects_and_fixes_all_three_forms() {
        let mut tp = TagPreserver::new();
        tp.protect("<a><b><c>");
        let mutated_text = "[[TAG0]]...{TAG1}...<TAG2>";

        let before = tp.validate(mutated_text);
        assert!(!before.ok);
        assert!(before.missing.is_empty());
        assert_eq!(before.mutated, vec![0, 1, 2]);

        let fixed = tp.fix_mutations(mutated_text);
        let after = tp.validate(&fixed);
        assert!(after.ok);
    }

    #[test]
    fn validate_reports_missing_when_no_recognisable_form_present() {
        let mut tp = TagPreserver::new();
        tp.protect("<a><b>");
        let text = "only ⟦TAG0⟧ present";
        let report = tp.validate(text);
        assert!(!report.ok);
        assert_eq!(report.missing, vec![1]);
        assert!(report.mutated.is_empty());
    }

    #[test]
    fn validate_passes_when_all_placeholders_present() {
        let mut tp = TagPreserver::new();
        let protected = tp.protect("<a><b>");
        assert!(tp.validate(&protected).ok);
    }
}
