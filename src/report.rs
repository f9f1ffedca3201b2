//! Study reports and their output formats.

use crate::content::ContentSource;
use crate::llm::AttemptRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

const PART_MARKERS: [&str; 3] = ["[Part 1", "[Part 2", "[Part 3"];

/// Output format for a study report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use text, markdown, or json.", s)),
        }
    }
}

/// A model answer split into its three parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyGuide {
    pub summary: String,
    pub glossary: Option<String>,
    pub questions: Option<String>,
}

impl StudyGuide {
    /// Split an answer at its `[Part N ...]` headings.
    ///
    /// An answer without headings is kept whole as the summary. Text before
    /// the first heading is dropped unless Part 1 is missing, in which case
    /// it becomes the summary.
    pub fn parse(answer: &str) -> Self {
        let positions: Vec<Option<usize>> = PART_MARKERS.iter().map(|m| answer.find(m)).collect();

        if positions.iter().all(Option::is_none) {
            return Self {
                summary: answer.trim().to_string(),
                glossary: None,
                questions: None,
            };
        }

        let section = |part: usize| -> Option<String> {
            let start = positions[part]?;
            let end = positions[part + 1..]
                .iter()
                .flatten()
                .copied()
                .filter(|&p| p > start)
                .min()
                .unwrap_or(answer.len());
            let body = strip_heading(&answer[start..end]).trim();
            (!body.is_empty()).then(|| body.to_string())
        };

        let summary = section(0).unwrap_or_else(|| {
            let first = positions.iter().flatten().copied().min().unwrap_or(0);
            answer[..first].trim().to_string()
        });

        Self {
            summary,
            glossary: section(1),
            questions: section(2),
        }
    }
}

/// Drop the heading line of a section, up to its closing bracket.
fn strip_heading(section: &str) -> &str {
    let line_end = section.find('\n').unwrap_or(section.len());
    match section[..line_end].find(']') {
        Some(close) => &section[close + 1..],
        None => &section[line_end..],
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub run_id: String,
    /// Candidate that produced the answer.
    pub model: String,
    pub source: ContentSource,
    pub truncated: bool,
    /// Raw model answer.
    pub response: String,
    pub guide: StudyGuide,
    pub generated_at: DateTime<Utc>,
    /// Candidates that failed before `model` answered.
    pub attempts_failed: Vec<AttemptRecord>,
}

/// Render a report in the requested format.
pub fn format_report(report: &StudyReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_text(report),
        OutputFormat::Markdown => format_markdown(report),
        OutputFormat::Json => format_json(report),
    }
}

fn format_text(report: &StudyReport) -> String {
    let mut output = report.response.trim().to_string();
    output.push('\n');
    if report.truncated {
        output.push_str("\n(The material was cut to fit the model's character budget.)\n");
    }
    output
}

fn format_markdown(report: &StudyReport) -> String {
    let mut output = String::from("# Study guide\n\n");
    output.push_str(&format!(
        "_Source: {} · Model: {} · {}_\n\n",
        report.source,
        report.model,
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    output.push_str("## Summary\n\n");
    output.push_str(&report.guide.summary);
    output.push_str("\n\n");

    if let Some(glossary) = &report.guide.glossary {
        output.push_str("## Key terms\n\n");
        output.push_str(glossary);
        output.push_str("\n\n");
    }

    if let Some(questions) = &report.guide.questions {
        output.push_str("## Practice questions\n\n");
        output.push_str(questions);
        output.push_str("\n\n");
    }

    if report.truncated {
        output.push_str("> The material was cut to fit the model's character budget.\n");
    }

    output
}

fn format_json(report: &StudyReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}
