//! Language-model capability seam.
//!
//! Only the consolidator talks to an LLM, and it never depends on one being
//! up: every call site degrades to the deterministic heuristics in this
//! module. A user-facing operation must not fail because the LLM is down.

/// LLM error type
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Backend unavailable or call failed
    #[error("llm unavailable: {0}")]
    Unavailable(String),
}

/// Capability trait for the consolidator's summarization needs
pub trait LanguageModel: Send + Sync {
    /// Condense `text` to roughly `target_tokens`
    fn summarize(&self, text: &str, target_tokens: usize) -> Result<String, LlmError>;

    /// Distill one principle from a cluster of identity statements
    fn extract_principle(&self, statements: &[String]) -> Result<String, LlmError>;
}

// ============================================================================
// DETERMINISTIC FALLBACKS
// ============================================================================

/// Words ignored when extracting keywords and principles
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has",
    "have", "i", "if", "in", "into", "is", "it", "its", "of", "on", "or", "so", "that",
    "the", "their", "then", "there", "these", "they", "this", "to", "was", "we", "were",
    "what", "when", "which", "while", "will", "with", "you",
];

/// Truncate on a word boundary to roughly `target_tokens`
pub fn truncate_to_tokens(text: &str, target_tokens: usize) -> String {
    let max_chars = target_tokens * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = String::with_capacity(max_chars);
    for word in text.split_whitespace() {
        if out.chars().count() + word.chars().count() + 1 > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Deterministic summary: labeled bullets truncated to the token budget.
///
/// Sections are `(label, text)` pairs; empty texts are skipped.
pub fn bullet_summary(sections: &[(&str, &str)], target_tokens: usize) -> String {
    let non_empty: Vec<_> = sections.iter().filter(|(_, t)| !t.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return String::new();
    }
    let per_section = (target_tokens / non_empty.len()).max(8);
    non_empty
        .iter()
        .map(|(label, text)| format!("- {}: {}", label, truncate_to_tokens(text.trim(), per_section)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First sentence of a text, bounded to `target_tokens`
pub fn first_sentence(text: &str, target_tokens: usize) -> String {
    let sentence = text
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(text)
        .trim();
    truncate_to_tokens(sentence, target_tokens)
}

/// Lowercased, stopword-stripped keywords of a text
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
    {
        let lower = token.to_lowercase();
        if !STOPWORDS.contains(&lower.as_str()) {
            seen.insert(lower);
        }
    }
    seen.into_iter().collect()
}

/// Deterministic principle extraction: the most frequent keywords across the
/// cluster, in frequency order, framed as a recurring theme.
pub fn principle_from_statements(statements: &[String]) -> String {
    use std::collections::HashMap;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for statement in statements {
        for kw in keywords(statement) {
            *counts.entry(kw).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let themes: Vec<String> = ranked.into_iter().take(6).map(|(kw, _)| kw).collect();

    if themes.is_empty() {
        format!("Recurring trajectory across {} sessions", statements.len())
    } else {
        format!(
            "Recurring trajectory across {} sessions: {}",
            statements.len(),
            themes.join(", ")
        )
    }
}

/// The built-in model: pure heuristics, always available
pub struct DeterministicSummarizer;

impl LanguageModel for DeterministicSummarizer {
    fn summarize(&self, text: &str, target_tokens: usize) -> Result<String, LlmError> {
        Ok(truncate_to_tokens(text, target_tokens))
    }

    fn extract_principle(&self, statements: &[String]) -> Result<String, LlmError> {
        Ok(principle_from_statements(statements))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::estimate_tokens;

    #[test]
    fn test_truncate_respects_budget() {
        let text = "word ".repeat(1000);
        let out = truncate_to_tokens(&text, 100);
        assert!(estimate_tokens(&out) <= 100);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_to_tokens("short text", 100), "short text");
    }

    #[test]
    fn test_bullet_summary_labels_sections() {
        let out = bullet_summary(
            &[("experienced", "built things"), ("noticed", ""), ("learned", "stuff")],
            100,
        );
        assert!(out.contains("- experienced: built things"));
        assert!(out.contains("- learned: stuff"));
        assert!(!out.contains("noticed"));
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(
            first_sentence("First thing. Second thing.", 50),
            "First thing."
        );
        assert_eq!(first_sentence("no punctuation here", 50), "no punctuation here");
    }

    #[test]
    fn test_keywords_strip_stopwords() {
        let kws = keywords("the retrieval layer is becoming more continuous");
        assert!(kws.contains(&"retrieval".to_string()));
        assert!(kws.contains(&"continuous".to_string()));
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.contains(&"is".to_string()));
    }

    #[test]
    fn test_principle_mentions_cluster_size_and_themes() {
        let statements = vec![
            "becoming more careful with persistence".to_string(),
            "becoming careful about persistence details".to_string(),
            "persistence work makes me careful".to_string(),
        ];
        let principle = principle_from_statements(&statements);
        assert!(principle.contains("3 sessions"));
        assert!(principle.contains("careful"));
        assert!(principle.contains("persistence"));
    }

    #[test]
    fn test_principle_is_deterministic() {
        let statements = vec!["alpha beta".to_string(), "beta gamma".to_string()];
        assert_eq!(
            principle_from_statements(&statements),
            principle_from_statements(&statements)
        );
    }
}
