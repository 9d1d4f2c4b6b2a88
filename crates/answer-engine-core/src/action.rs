//! Agent action grammar for the research loop.
//!
//! Each loop iteration asks the LLM for exactly one action written as a
//! prefixed line. The first recognised prefix wins; anything else is
//! [`AgentAction::Unknown`], which the loop treats as a no-op.

/// One step proposed by the LLM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAction {
    Search(String),
    Fetch(String),
    Note(String),
    Answer(String),
    Unknown(String),
}

const PREFIXES: [&str; 4] = ["search:", "fetch:", "note:", "answer:"];

impl AgentAction {
    /// Parse raw LLM output into an action.
    ///
    /// Leading blank lines are skipped. `answer:` keeps everything after the
    /// prefix, including following lines; the other actions use only the
    /// rest of the first line. An action with an empty argument is `Unknown`.
    pub fn parse(raw: &str) -> AgentAction {
        let trimmed = raw.trim_start();
        let first_line = trimmed.lines().next().unwrap_or("").trim();
        let lower = first_line.to_ascii_lowercase();

        for prefix in PREFIXES {
            if !lower.starts_with(prefix) {
                continue;
            }
            let arg = if prefix == "answer:" {
                trimmed[prefix.len()..].trim().to_string()
            } else {
                first_line[prefix.len()..].trim().to_string()
            };
            if arg.is_empty() {
                return AgentAction::Unknown(raw.trim().to_string());
            }
            return match prefix {
                "search:" => AgentAction::Search(arg),
                "fetch:" => AgentAction::Fetch(arg),
                "note:" => AgentAction::Note(arg),
                _ => AgentAction::Answer(arg),
            };
        }

        AgentAction::Unknown(raw.trim().to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::Search(_) => "search",
            AgentAction::Fetch(_) => "fetch",
            AgentAction::Note(_) => "note",
            AgentAction::Answer(_) => "answer",
            AgentAction::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_prefix() {
        assert_eq!(
            AgentAction::parse("search: rust async"),
            AgentAction::Search("rust async".into())
        );
        assert_eq!(
            AgentAction::parse("  FETCH: https://a.com "),
            AgentAction::Fetch("https://a.com".into())
        );
        assert_eq!(
            AgentAction::parse("Note: important"),
            AgentAction::Note("important".into())
        );
    }

    #[test]
    fn test_answer_keeps_multiline_body() {
        let a = AgentAction::parse("answer: First line.\nSecond line.");
        assert_eq!(a, AgentAction::Answer("First line.\nSecond line.".into()));
    }

    #[test]
    fn test_unknown_and_empty_argument() {
        assert_eq!(AgentAction::parse("think harder").kind(), "unknown");
        assert_eq!(AgentAction::parse("search:   ").kind(), "unknown");
        assert_eq!(AgentAction::parse("").kind(), "unknown");
    }

    #[test]
    fn test_only_first_line_considered() {
        let a = AgentAction::parse("I will now act.\nsearch: foo");
        assert_eq!(a.kind(), "unknown");
    }
}
