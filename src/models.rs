use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Lifecycle of a review. Transitions are one-directional:
/// pending -> in_progress -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::InProgress => "in_progress",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "in_progress" => Ok(ReviewStatus::InProgress),
            "completed" => Ok(ReviewStatus::Completed),
            "failed" => Ok(ReviewStatus::Failed),
            other => Err(AppError::Internal(format!("Unknown review status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewStatus::Completed | ReviewStatus::Failed)
    }
}

/// Finding severity. Variant order gives the total order info < warning < critical,
/// which the threshold filter relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(AppError::Internal(format!("Unknown severity: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Performance,
    Style,
    Bug,
    BestPractice,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Style => "style",
            Category::Bug => "bug",
            Category::BestPractice => "best_practice",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "security" => Ok(Category::Security),
            "performance" => Ok(Category::Performance),
            "style" => Ok(Category::Style),
            "bug" => Ok(Category::Bug),
            "best_practice" => Ok(Category::BestPractice),
            "other" => Ok(Category::Other),
            unknown => Err(AppError::Internal(format!("Unknown category: {unknown}"))),
        }
    }
}

/// A connected repository. Only lookup is needed here; listing and
/// management live outside this service.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: i64,
    pub github_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub user_id: i64,
    pub auto_review_enabled: bool,
}

/// One analysis attempt for a specific commit of a specific pull request.
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: i64,
    pub repository_id: i64,
    pub user_id: i64,
    pub pr_number: i64,
    pub pr_title: String,
    pub pr_url: String,
    pub pr_author: String,
    pub head_sha: String,
    pub base_sha: String,
    pub status: ReviewStatus,
    pub summary: Option<String>,
    pub total_issues: i64,
    pub critical_issues: i64,
    pub warning_issues: i64,
    pub info_issues: i64,
    pub files_reviewed: i64,
    pub lines_reviewed: i64,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One finding attached to a review. Immutable except the resolved flag.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub id: i64,
    pub review_id: i64,
    pub file_path: String,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub suggestion: Option<String>,
    pub code_snippet: Option<String>,
    pub language: Option<String>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A finding as produced by the analyzer, before it has a row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub file_path: String,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub code_snippet: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    // Rows written by Rust carry RFC 3339; rows from SQLite's datetime('now')
    // default carry "YYYY-MM-DD HH:MM:SS" in UTC.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| AppError::Internal(format!("Bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_total_order() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            ReviewStatus::Pending,
            ReviewStatus::InProgress,
            ReviewStatus::Completed,
            ReviewStatus::Failed,
        ] {
            assert_eq!(ReviewStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ReviewStatus::parse("cancelled").is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(ReviewStatus::Completed.is_terminal());
        assert!(ReviewStatus::Failed.is_terminal());
        assert!(!ReviewStatus::Pending.is_terminal());
        assert!(!ReviewStatus::InProgress.is_terminal());
    }

    #[test]
    fn parses_both_timestamp_forms() {
        assert!(parse_timestamp("2026-08-07T10:00:00+00:00").is_ok());
        assert!(parse_timestamp("2026-08-07 10:00:00").is_ok());
        assert!(parse_timestamp("not a date").is_err());
    }
}
