use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::error::Result;
use crate::models::{parse_timestamp, Category, Issue, Review, ReviewStatus, Severity};
use crate::scm::types::PullRequestInfo;

/// Row access for reviews and issues. Status updates are guarded so a
/// terminal state can never be re-entered regardless of caller bugs.
#[derive(Clone)]
pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a pending review, or return the existing one for the same
    /// (repository, PR number, head commit).
    ///
    /// The unique constraint is the authoritative dedup signal: the insert
    /// uses ON CONFLICT DO NOTHING and the subsequent fetch returns
    /// whichever row won, so two concurrent deliveries of the same commit
    /// cannot create two rows, and at most one caller observes `created`.
    pub async fn create_or_fetch(
        &self,
        repository_id: i64,
        user_id: i64,
        pr: &PullRequestInfo,
    ) -> Result<(Review, bool)> {
        let inserted = sqlx::query(
            "INSERT INTO reviews
                (repository_id, user_id, pr_number, pr_title, pr_url, pr_author,
                 head_sha, base_sha, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
             ON CONFLICT (repository_id, pr_number, head_sha) DO NOTHING",
        )
        .bind(repository_id)
        .bind(user_id)
        .bind(pr.number)
        .bind(&pr.title)
        .bind(&pr.url)
        .bind(&pr.author)
        .bind(&pr.head_sha)
        .bind(&pr.base_sha)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let created = inserted.rows_affected() == 1;

        let row = sqlx::query_as::<_, ReviewRow>(
            "SELECT * FROM reviews
             WHERE repository_id = ? AND pr_number = ? AND head_sha = ?",
        )
        .bind(repository_id)
        .bind(pr.number)
        .bind(&pr.head_sha)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_into()?, created))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Review>> {
        let row = sqlx::query_as::<_, ReviewRow>("SELECT * FROM reviews WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_into()).transpose()
    }

    pub async fn list_for_repository(&self, repository_id: i64) -> Result<Vec<Review>> {
        let rows = sqlx::query_as::<_, ReviewRow>(
            "SELECT * FROM reviews WHERE repository_id = ? ORDER BY created_at DESC",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// pending -> in_progress. Returns false when the row was not pending,
    /// which means another runner took it or it already finished.
    pub async fn mark_in_progress(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reviews SET status = 'in_progress' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Terminal failure write. Guarded against terminal states so a late
    /// failure can never overwrite a completed review.
    pub async fn mark_failed(
        &self,
        id: i64,
        error_message: &str,
        processing_time_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reviews
             SET status = 'failed', error_message = ?, processing_time_ms = ?, completed_at = ?
             WHERE id = ? AND status IN ('pending', 'in_progress')",
        )
        .bind(error_message)
        .bind(processing_time_ms)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_issues(&self, review_id: i64) -> Result<Vec<Issue>> {
        let rows = sqlx::query_as::<_, IssueRow>(
            "SELECT * FROM issues WHERE review_id = ? ORDER BY id",
        )
        .bind(review_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// The one mutation issues permit: flipping the resolved flag. Returns
    /// false for an unknown issue id.
    pub async fn resolve_issue(&self, issue_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE issues SET is_resolved = 1, resolved_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(issue_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReviewRow {
    id: i64,
    repository_id: i64,
    user_id: i64,
    pr_number: i64,
    pr_title: String,
    pr_url: String,
    pr_author: String,
    head_sha: String,
    base_sha: String,
    status: String,
    summary: Option<String>,
    total_issues: i64,
    critical_issues: i64,
    warning_issues: i64,
    info_issues: i64,
    files_reviewed: i64,
    lines_reviewed: i64,
    processing_time_ms: Option<i64>,
    error_message: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl TryFrom<ReviewRow> for Review {
    type Error = crate::error::AppError;

    fn try_from(r: ReviewRow) -> Result<Self> {
        Ok(Review {
            id: r.id,
            repository_id: r.repository_id,
            user_id: r.user_id,
            pr_number: r.pr_number,
            pr_title: r.pr_title,
            pr_url: r.pr_url,
            pr_author: r.pr_author,
            head_sha: r.head_sha,
            base_sha: r.base_sha,
            status: ReviewStatus::parse(&r.status)?,
            summary: r.summary,
            total_issues: r.total_issues,
            critical_issues: r.critical_issues,
            warning_issues: r.warning_issues,
            info_issues: r.info_issues,
            files_reviewed: r.files_reviewed,
            lines_reviewed: r.lines_reviewed,
            processing_time_ms: r.processing_time_ms,
            error_message: r.error_message,
            created_at: parse_timestamp(&r.created_at)?,
            completed_at: r.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct IssueRow {
    id: i64,
    review_id: i64,
    file_path: String,
    line_start: Option<i64>,
    line_end: Option<i64>,
    severity: String,
    category: String,
    title: String,
    description: String,
    suggestion: Option<String>,
    code_snippet: Option<String>,
    language: Option<String>,
    is_resolved: bool,
    resolved_at: Option<String>,
}

impl TryFrom<IssueRow> for Issue {
    type Error = crate::error::AppError;

    fn try_from(r: IssueRow) -> Result<Self> {
        Ok(Issue {
            id: r.id,
            review_id: r.review_id,
            file_path: r.file_path,
            line_start: r.line_start,
            line_end: r.line_end,
            severity: Severity::parse(&r.severity)?,
            category: Category::parse(&r.category)?,
            title: r.title,
            description: r.description,
            suggestion: r.suggestion,
            code_snippet: r.code_snippet,
            language: r.language,
            is_resolved: r.is_resolved,
            resolved_at: r.resolved_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}
