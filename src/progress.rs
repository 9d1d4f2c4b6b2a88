//! CLI rendering of streamed events and results.
//!
//! In human mode answer tokens go to **stdout** as they arrive and every
//! other event is summarised on **stderr**, so stdout holds just the
//! answer. In JSON mode every event is one JSON object per line on stdout.

use std::io::Write;

use crate::events::StreamEvent;

/// Renders stream events. Implementations write to stdout/stderr.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: &StreamEvent);
}

/// Human-friendly output.
pub struct HumanReporter;

impl EventReporter for HumanReporter {
    fn report(&self, event: &StreamEvent) {
        let status = match event {
            StreamEvent::Token { content } => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(content.as_bytes());
                let _ = out.flush();
                return;
            }
            StreamEvent::Start { mode, .. } => format!("[{}] starting", mode),
            StreamEvent::Search {
                query,
                result_count,
            } => format!("search  {}  ({} results)", query, result_count),
            StreamEvent::Thinking { step } => {
                format!("{:<10} {}", step.kind.as_str(), step.output)
            }
            StreamEvent::Progress {
                phase,
                message,
                completed: Some(n),
                total: Some(total),
            } => format!("{:<10} {} ({}/{})", phase, message, n, total),
            StreamEvent::Progress { phase, message, .. } => format!("{:<10} {}", phase, message),
            StreamEvent::Section { title } => format!("section    {}", title),
            StreamEvent::Citation { .. } | StreamEvent::Source { .. } => return,
            StreamEvent::Done { summary } => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out);
                if !summary.citations.is_empty() {
                    let _ = writeln!(out, "\nSources:");
                    for c in &summary.citations {
                        let _ = writeln!(out, "  [{}] {} ({})", c.index, c.title, c.url);
                    }
                }
                if !summary.follow_ups.is_empty() {
                    let _ = writeln!(out, "\nRelated:");
                    for q in &summary.follow_ups {
                        let _ = writeln!(out, "  - {}", q);
                    }
                }
                format!(
                    "done  session={}  tokens={}  {}ms{}",
                    summary.session_id,
                    format_number(summary.usage.total()),
                    summary.duration_ms,
                    if summary.from_cache { "  (cached)" } else { "" }
                )
            }
            StreamEvent::Error { message } => format!("error  {}", message),
        };
        let _ = writeln!(std::io::stderr().lock(), "{}", status);
    }
}

/// Machine-readable output: one JSON object per line on stdout.
pub struct JsonReporter;

impl EventReporter for JsonReporter {
    fn report(&self, event: &StreamEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Output mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    /// Human output when stdout is a TTY, otherwise JSON. `--json` forces JSON.
    pub fn detect(force_json: bool) -> Self {
        if force_json || !atty::is(atty::Stream::Stdout) {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }

    pub fn reporter(&self) -> Box<dyn EventReporter> {
        match self {
            OutputMode::Human => Box::new(HumanReporter),
            OutputMode::Json => Box::new(JsonReporter),
        }
    }
}
