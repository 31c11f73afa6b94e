//! Text patterns used when comparing live room text against stored rooms.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

static FOGGY_EXITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Obvious (?:exits|paths): obscured by a thick fog$").expect("static regex")
});

static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s+|\s").expect("static regex"));

static ELLIPSIS_OR_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:\.\.)?").expect("static regex"));

/// Exits hidden by fog carry no information and are not compared.
pub fn exits_obscured(exits: &str) -> bool {
    FOGGY_EXITS.is_match(exits.trim())
}

/// Loose description pattern: every sentence break and space in the live
/// text becomes `.*`, so stored variants with extra words or trailing
/// clauses still match.
pub fn fuzzy_description(description: &str) -> Option<Regex> {
    let trimmed = description.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    let pattern = SENTENCE_BREAK
        .split(trimmed)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&pattern).ok()
}

/// Case-insensitive pattern matching any one sentence of `query`.
pub fn any_sentence(query: &str) -> Option<Regex> {
    let trimmed = query.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    let parts: Vec<String> = ELLIPSIS_OR_PERIOD
        .split(trimmed)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(regex::escape)
        .collect();
    if parts.is_empty() {
        return None;
    }
    RegexBuilder::new(&parts.join("|"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Case-insensitive literal substring test.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
