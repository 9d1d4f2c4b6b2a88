//! Line-oriented parsing of free-text LLM output.
//!
//! LLM calls that return lists (sub-questions, expanded search queries,
//! related questions) are parsed here. Every parser is lenient: numbering,
//! bullets and markdown emphasis are stripped, and short fragments are
//! discarded.

use crate::models::{QuestionCategory, RelatedQuestion};

/// Maximum sub-questions kept from a decomposition call.
pub const MAX_SUB_QUESTIONS: usize = 5;
/// Maximum queries kept from a DeepSearch expansion call.
pub const MAX_EXPANDED_QUERIES: usize = 8;
/// Maximum related questions attached to a response.
pub const MAX_RELATED_QUESTIONS: usize = 5;

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
    }
}

/// Split one leading list marker (`1.`, `2)`, `-`, `*`, `•`) off a line.
///
/// Returns the text after the marker, or `None` when the line does not
/// start with one. A marker must be followed by whitespace, so `5G` or
/// `3.5 GHz` are left alone.
pub fn split_list_marker(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let rest = if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        rest
    } else {
        let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        line[digits..].strip_prefix(['.', ')'])?
    };
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Strip one leading list marker, keeping the rest of the text intact.
pub fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    split_list_marker(line).unwrap_or(line)
}

/// Parse one query per line, dropping fragments of 10 characters or less.
///
/// Falls back to `[original]` when nothing survives. Duplicates are
/// removed, first occurrence wins.
pub fn parse_query_lines(raw: &str, original: &str, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        let cleaned = strip_list_marker(line).replace("**", "");
        let cleaned = cleaned.trim().trim_matches('"').trim();
        if cleaned.chars().count() <= 10 {
            continue;
        }
        if out.iter().any(|q| q.eq_ignore_ascii_case(cleaned)) {
            continue;
        }
        out.push(cleaned.to_string());
        if out.len() >= max {
            break;
        }
    }
    if out.is_empty() {
        out.push(original.to_string());
    }
    out
}

/// Parse sub-questions from a decomposition call.
pub fn parse_sub_questions(raw: &str, original: &str) -> Vec<String> {
    parse_query_lines(raw, original, MAX_SUB_QUESTIONS)
}

/// Parse expanded search queries from a DeepSearch expansion call.
pub fn parse_expanded_queries(raw: &str, original: &str) -> Vec<String> {
    parse_query_lines(raw, original, MAX_EXPANDED_QUERIES)
}

const CATEGORY_PREFIXES: [(&str, QuestionCategory); 6] = [
    ("DEEPER:", QuestionCategory::Deeper),
    ("RELATED:", QuestionCategory::Related),
    ("BACKGROUND:", QuestionCategory::Background),
    ("PRACTICAL:", QuestionCategory::Background),
    ("COMPARISON:", QuestionCategory::Comparison),
    ("CURRENT:", QuestionCategory::Current),
];

fn is_preamble(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("here")
        || lower.starts_with("okay")
        || lower.starts_with("sure")
        || lower.ends_with("questions:")
}

/// Parse categorized related questions.
///
/// The first pass looks for `CATEGORY: question` lines. If none are found,
/// any line of at least 15 characters ending in `?` becomes an
/// uncategorized follow-up.
pub fn parse_related_questions(raw: &str) -> Vec<RelatedQuestion> {
    let mut out = Vec::new();
    let mut candidates: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || is_preamble(line) {
            continue;
        }
        let cleaned = strip_list_marker(line).replace("**", "").replace('*', "");
        let cleaned = cleaned.trim();
        candidates.push(cleaned.to_string());

        let upper = cleaned.to_ascii_uppercase();
        for (prefix, category) in CATEGORY_PREFIXES {
            if upper.starts_with(prefix) {
                let text = cleaned[prefix.len()..].trim();
                if text.chars().count() > 10 && out.len() < MAX_RELATED_QUESTIONS {
                    out.push(RelatedQuestion {
                        text: text.to_string(),
                        category: Some(category),
                    });
                }
                break;
            }
        }
    }

    if out.is_empty() {
        for c in candidates {
            if c.chars().count() >= 15 && c.ends_with('?') {
                out.push(RelatedQuestion {
                    text: c,
                    category: None,
                });
                if out.len() >= MAX_RELATED_QUESTIONS {
                    break;
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_char_safe() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("1. What is it?"), "What is it?");
        assert_eq!(strip_list_marker("- bullet"), "bullet");
        assert_eq!(strip_list_marker("  12) twelve"), "twelve");
        assert_eq!(strip_list_marker("• dot"), "dot");
    }

    #[test]
    fn test_strip_list_marker_keeps_leading_digits() {
        assert_eq!(strip_list_marker("- 42% of users churn"), "42% of users churn");
        assert_eq!(strip_list_marker("5G rollout"), "5G rollout");
        assert_eq!(strip_list_marker("3.5 GHz chips"), "3.5 GHz chips");
        assert_eq!(strip_list_marker("2. 2024 outlook"), "2024 outlook");
        assert_eq!(strip_list_marker("-5 degrees"), "-5 degrees");
        assert_eq!(split_list_marker("plain prose line"), None);
    }

    #[test]
    fn test_sub_questions_keep_numeric_prefixes() {
        let raw = "2024 election turnout by state\n5G rollout health concerns";
        let qs = parse_sub_questions(raw, "x");
        assert_eq!(
            qs,
            vec![
                "2024 election turnout by state".to_string(),
                "5G rollout health concerns".to_string()
            ]
        );
    }

    #[test]
    fn test_sub_questions_parsed() {
        let raw = "1. What is quantum entanglement?\n2. How do qubits differ from bits?\n3. Who builds quantum computers?";
        let qs = parse_sub_questions(raw, "quantum computing");
        assert_eq!(qs.len(), 3);
        assert_eq!(qs[0], "What is quantum entanglement?");
    }

    #[test]
    fn test_decomposition_falls_back_to_original() {
        let raw = "1. short\n2. tiny\n- 0123456789";
        let qs = parse_sub_questions(raw, "what is quantum computing");
        assert_eq!(qs, vec!["what is quantum computing".to_string()]);
    }

    #[test]
    fn test_expanded_queries_capped_and_deduped() {
        let raw = (0..12)
            .map(|i| format!("{}. search query number {}", i + 1, i))
            .chain(std::iter::once("search query number 0".to_string()))
            .collect::<Vec<_>>()
            .join("\n");
        let qs = parse_expanded_queries(&raw, "x");
        assert_eq!(qs.len(), MAX_EXPANDED_QUERIES);
        assert_eq!(qs[0], "search query number 0");
    }

    #[test]
    fn test_related_questions_categorized() {
        let raw = "Here are some questions:\n\
                   1. **DEEPER:** How does error correction work in qubits?\n\
                   2. RELATED: What is quantum cryptography about?\n\
                   3. PRACTICAL: Where are quantum computers used today?\n\
                   4. COMPARISON: How do quantum and classical computers compare?\n\
                   5. CURRENT: What are the latest quantum breakthroughs?";
        let qs = parse_related_questions(raw);
        assert_eq!(qs.len(), 5);
        assert_eq!(qs[0].category, Some(QuestionCategory::Deeper));
        assert_eq!(qs[0].text, "How does error correction work in qubits?");
        assert_eq!(qs[2].category, Some(QuestionCategory::Background));
    }

    #[test]
    fn test_related_questions_fallback() {
        let raw = "What else should I know about Rust?\nshort?\nNot a question at all";
        let qs = parse_related_questions(raw);
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].category, None);
        assert_eq!(qs[0].text, "What else should I know about Rust?");
    }
}
