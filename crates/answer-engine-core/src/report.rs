//! DeepSearch report parsing and formatting.
//!
//! The report synthesis call is instructed to emit a fixed markdown-like
//! layout:
//!
//! ```text
//! ## Overview
//! <paragraphs>
//! ## Key Findings
//! - finding
//! ## Detailed Analysis
//! ### <subtopic>
//! <paragraphs>
//! ## Methodology
//! <paragraphs>
//! ```
//!
//! LLMs drift from instructions, so [`parse_report`] is best-effort: it
//! never fails, and content it cannot place goes to the last open heading.

use crate::models::{Citation, DeepSearchReport, ReportSection};
use crate::text::{split_list_marker, strip_list_marker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Preamble,
    Overview,
    KeyFindings,
    Methodology,
    Section,
    Ignored,
}

/// Heading level and title, if `line` is a `##`..`####` heading.
fn heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if !(2..=4).contains(&level) {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    let title = rest
        .trim()
        .trim_matches(|c: char| c == '*' || c == '#')
        .trim_end_matches(':')
        .trim();
    let title = strip_list_marker(title);
    Some((level, title.to_string()))
}

fn classify(title: &str) -> Target {
    let lower = title.to_lowercase();
    if lower.starts_with("overview") || lower == "summary" || lower == "executive summary" {
        Target::Overview
    } else if lower.starts_with("key findings") || lower == "findings" {
        Target::KeyFindings
    } else if lower.starts_with("methodology") {
        Target::Methodology
    } else if lower == "sources" || lower == "references" {
        Target::Ignored
    } else {
        Target::Section
    }
}

struct Parser {
    report: DeepSearchReport,
    preamble: String,
    target: Target,
    title: String,
    buf: Vec<String>,
}

impl Parser {
    fn flush(&mut self) {
        let content = self.buf.join("\n").trim().to_string();
        self.buf.clear();
        match self.target {
            Target::Preamble => self.preamble = content,
            Target::Ignored => {}
            Target::Overview => append_paragraph(&mut self.report.overview, &content),
            Target::Methodology => append_paragraph(&mut self.report.methodology, &content),
            Target::KeyFindings => {
                // Only bullet or numbered lines are findings; intro prose is dropped.
                for line in content.lines() {
                    let Some(item) = split_list_marker(line) else {
                        continue;
                    };
                    let finding = item.replace("**", "");
                    let finding = finding.trim();
                    if !finding.is_empty() {
                        self.report.key_findings.push(finding.to_string());
                    }
                }
            }
            Target::Section => {
                // Container headings such as "Detailed Analysis" carry no
                // body of their own; only headings with content get an order.
                if !content.is_empty() {
                    let order = self.report.sections.len();
                    self.report.sections.push(ReportSection {
                        title: std::mem::take(&mut self.title),
                        content,
                        order,
                    });
                }
            }
        }
    }
}

fn append_paragraph(field: &mut String, content: &str) {
    if content.is_empty() {
        return;
    }
    if !field.is_empty() {
        field.push_str("\n\n");
    }
    field.push_str(content);
}

/// Parse raw report text into a [`DeepSearchReport`].
pub fn parse_report(raw: &str) -> DeepSearchReport {
    let mut p = Parser {
        report: DeepSearchReport::default(),
        preamble: String::new(),
        target: Target::Preamble,
        title: String::new(),
        buf: Vec::new(),
    };

    for line in raw.lines() {
        if let Some((_, title)) = heading(line) {
            p.flush();
            p.target = classify(&title);
            p.title = title;
            continue;
        }
        // A level-1 title line is not report content.
        if line.trim_start().starts_with("# ") && p.target == Target::Preamble {
            continue;
        }
        p.buf.push(line.to_string());
    }
    p.flush();

    if p.report.overview.is_empty() && !p.preamble.is_empty() {
        p.report.overview = p.preamble;
    }
    p.report
}

/// Flatten a report back into a single markdown document.
pub fn format_report_markdown(
    query: &str,
    report: &DeepSearchReport,
    citations: &[Citation],
) -> String {
    let mut out = format!("# {}\n\n", query.trim());

    if !report.overview.is_empty() {
        out.push_str("## Overview\n\n");
        out.push_str(&report.overview);
        out.push_str("\n\n");
    }

    if !report.key_findings.is_empty() {
        out.push_str("## Key Findings\n\n");
        for f in &report.key_findings {
            out.push_str(&format!("- {}\n", f));
        }
        out.push('\n');
    }

    if !report.sections.is_empty() {
        out.push_str("## Detailed Analysis\n\n");
        for s in &report.sections {
            out.push_str(&format!("### {}\n\n{}\n\n", s.title, s.content));
        }
    }

    if !report.methodology.is_empty() {
        out.push_str("## Methodology\n\n");
        out.push_str(&report.methodology);
        out.push_str("\n\n");
    }

    if !citations.is_empty() {
        out.push_str("## Sources\n\n");
        for c in citations {
            out.push_str(&format!("[{}] [{}]({})\n", c.index, c.title, c.url));
        }
    }

    out.trim_end().to_string() + "\n"
}

/// Incremental detector for `## ` headings in a token stream.
///
/// Feed token deltas as they arrive; each completed level-2 heading line
/// is returned once.
#[derive(Debug, Default)]
pub struct SectionTracker {
    partial: String,
    seen: Vec<String>,
}

impl SectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a delta and return any newly completed section titles.
    pub fn feed(&mut self, delta: &str) -> Vec<String> {
        self.partial.push_str(delta);
        let mut found = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            if let Some(title) = self.check_line(&line) {
                found.push(title);
            }
        }
        found
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.partial);
        self.check_line(&line)
    }

    pub fn sections(&self) -> &[String] {
        &self.seen
    }

    fn check_line(&mut self, line: &str) -> Option<String> {
        match heading(line) {
            Some((2, title)) if !title.is_empty() => {
                self.seen.push(title.clone());
                Some(title)
            }
            _ => None,
        }
    }
}
