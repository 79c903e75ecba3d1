use serde::Deserialize;

use crate::analysis::AnalysisReport;
use crate::models::{Category, Finding, Severity};

/// Report shape the model is asked to produce. Every field is lenient:
/// model output is untrusted and a malformed response must degrade, not
/// fail the review.
#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default, alias = "file", alias = "path")]
    file_path: Option<String>,
    #[serde(default)]
    line_start: Option<i64>,
    #[serde(default)]
    line_end: Option<i64>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    code_snippet: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

const FALLBACK_SUMMARY: &str = "Analysis completed, but the response could not be parsed.";

/// Parse a model response into a report, degrading to an empty issue list
/// with a best-effort summary when the output is not the requested JSON.
pub fn parse_report(raw: &str) -> AnalysisReport {
    let Some(json) = extract_json(raw) else {
        return fallback(raw);
    };
    let Ok(parsed) = serde_json::from_str::<RawReport>(json) else {
        return fallback(raw);
    };

    let issues = parsed
        .issues
        .into_iter()
        .filter_map(convert_issue)
        .collect();

    AnalysisReport {
        summary: parsed
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_SUMMARY.to_string()),
        issues,
    }
}

fn fallback(raw: &str) -> AnalysisReport {
    // Keep a trimmed slice of the response as the summary so the review is
    // still informative when the model answered in prose.
    let text = raw.trim();
    let summary = if text.is_empty() {
        FALLBACK_SUMMARY.to_string()
    } else {
        truncate(text, 1000)
    };
    AnalysisReport {
        summary,
        issues: Vec::new(),
    }
}

fn convert_issue(raw: RawIssue) -> Option<Finding> {
    // A finding without a file or title is unusable; everything else has a
    // lenient default.
    let file_path = raw.file_path?;
    let title = raw.title?;

    let severity = raw
        .severity
        .as_deref()
        .and_then(|s| Severity::parse(&s.to_lowercase()).ok())
        .unwrap_or(Severity::Info);
    let category = raw
        .category
        .as_deref()
        .and_then(|s| Category::parse(&s.to_lowercase()).ok())
        .unwrap_or(Category::Other);

    Some(Finding {
        file_path,
        line_start: raw.line_start,
        line_end: raw.line_end.or(raw.line_start),
        severity,
        category,
        title,
        description: raw.description.unwrap_or_default(),
        suggestion: raw.suggestion,
        code_snippet: raw.code_snippet,
        language: raw.language,
    })
}

/// Locate the JSON object in a response that may wrap it in prose or a
/// ```json fence.
fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(fenced) = trimmed.split("```json").nth(1) {
        if let Some(body) = fenced.split("```").next() {
            let body = body.trim();
            if !body.is_empty() {
                return Some(body);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
