use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::error::{AppError, Result};
use crate::models::{Finding, Severity};

/// Run metrics persisted alongside the findings.
#[derive(Debug, Clone, Copy)]
pub struct ReviewMetrics {
    pub files_reviewed: i64,
    pub lines_reviewed: i64,
    pub processing_time_ms: i64,
}

/// Writes a finished analysis atomically: every issue row, the aggregate
/// counters, and the completed status land in one transaction, so a reader
/// can never observe a completed review with a partial issue set.
#[derive(Clone)]
pub struct IssuePersister {
    pool: SqlitePool,
}

impl IssuePersister {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Commit findings and flip the review to completed. On any failure the
    /// transaction rolls back and the review stays in_progress; the caller
    /// is responsible for marking it failed.
    pub async fn commit(
        &self,
        review_id: i64,
        summary: &str,
        issues: &[Finding],
        metrics: ReviewMetrics,
    ) -> Result<()> {
        // Aggregate counts come from the list being persisted, never from a
        // separate query that could race with the inserts.
        let critical = count_with(issues, Severity::Critical);
        let warning = count_with(issues, Severity::Warning);
        let info = count_with(issues, Severity::Info);

        let mut tx = self.pool.begin().await?;

        for issue in issues {
            sqlx::query(
                "INSERT INTO issues
                    (review_id, file_path, line_start, line_end, severity, category,
                     title, description, suggestion, code_snippet, language, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(review_id)
            .bind(&issue.file_path)
            .bind(issue.line_start)
            .bind(issue.line_end)
            .bind(issue.severity.as_str())
            .bind(issue.category.as_str())
            .bind(&issue.title)
            .bind(&issue.description)
            .bind(&issue.suggestion)
            .bind(&issue.code_snippet)
            .bind(&issue.language)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            "UPDATE reviews
             SET status = 'completed', summary = ?, total_issues = ?,
                 critical_issues = ?, warning_issues = ?, info_issues = ?,
                 files_reviewed = ?, lines_reviewed = ?, processing_time_ms = ?,
                 completed_at = ?
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(summary)
        .bind(issues.len() as i64)
        .bind(critical)
        .bind(warning)
        .bind(info)
        .bind(metrics.files_reviewed)
        .bind(metrics.lines_reviewed)
        .bind(metrics.processing_time_ms)
        .bind(Utc::now().to_rfc3339())
        .bind(review_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Not in_progress: the guarded update found a terminal or
            // pending row. Dropping the transaction rolls the inserts back.
            return Err(AppError::Internal(format!(
                "Review {review_id} is not in_progress, refusing to commit"
            )));
        }

        tx.commit().await?;
        Ok(())
    }
}

fn count_with(issues: &[Finding], severity: Severity) -> i64 {
    issues.iter().filter(|i| i.severity == severity).count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_support::seed_repository, Database};
    use crate::models::{Category, ReviewStatus};
    use crate::review::store::ReviewStore;
    use crate::scm::types::PullRequestInfo;

    fn finding(file: &str, severity: Severity) -> Finding {
        Finding {
            file_path: file.to_string(),
            line_start: Some(1),
            line_end: Some(2),
            severity,
            category: Category::Bug,
            title: format!("Problem in {file}"),
            description: "Something is off".to_string(),
            suggestion: None,
            code_snippet: None,
            language: None,
        }
    }

    fn metrics() -> ReviewMetrics {
        ReviewMetrics {
            files_reviewed: 2,
            lines_reviewed: 40,
            processing_time_ms: 1500,
        }
    }

    async fn in_progress_review() -> (Database, ReviewStore, i64) {
        let db = Database::in_memory().await.unwrap();
        let (user_id, repo_id) = seed_repository(&db, 1, true).await;
        let store = ReviewStore::new(db.pool().clone());
        let (review, _) = store
            .create_or_fetch(
                repo_id,
                user_id,
                &PullRequestInfo {
                    number: 42,
                    title: "Add widget".to_string(),
                    author: "octocat".to_string(),
                    url: "https://example.com/pr/42".to_string(),
                    head_sha: "abc123".to_string(),
                    base_sha: "def456".to_string(),
                },
            )
            .await
            .unwrap();
        store.mark_in_progress(review.id).await.unwrap();
        (db, store, review.id)
    }

    #[tokio::test]
    async fn commit_writes_issues_counts_and_status_together() {
        let (_db, store, review_id) = in_progress_review().await;
        let persister = IssuePersister::new(store.pool().clone());

        let issues = vec![
            finding("a.rs", Severity::Critical),
            finding("b.rs", Severity::Warning),
            finding("b.rs", Severity::Info),
            finding("c.rs", Severity::Info),
        ];
        persister
            .commit(review_id, "Found a few things", &issues, metrics())
            .await
            .unwrap();

        let review = store.get(review_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.summary.as_deref(), Some("Found a few things"));
        assert_eq!(review.total_issues, 4);
        assert_eq!(review.critical_issues, 1);
        assert_eq!(review.warning_issues, 1);
        assert_eq!(review.info_issues, 2);
        assert_eq!(review.files_reviewed, 2);
        assert_eq!(review.lines_reviewed, 40);
        assert!(review.completed_at.is_some());

        assert_eq!(store.list_issues(review_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_issues_and_keeps_in_progress() {
        let (_db, store, review_id) = in_progress_review().await;
        let persister = IssuePersister::new(store.pool().clone());

        // Point the batch at a review that does not exist: the guarded
        // status update misses and the whole transaction rolls back.
        let issues = vec![
            finding("a.rs", Severity::Critical),
            finding("b.rs", Severity::Warning),
            finding("c.rs", Severity::Info),
        ];
        let missing_review = review_id + 100;
        assert!(persister
            .commit(missing_review, "s", &issues, metrics())
            .await
            .is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);

        let review = store.get(review_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::InProgress);
    }

    #[tokio::test]
    async fn commit_refuses_terminal_review() {
        let (_db, store, review_id) = in_progress_review().await;
        store.mark_failed(review_id, "earlier failure", 5).await.unwrap();

        let persister = IssuePersister::new(store.pool().clone());
        assert!(persister
            .commit(review_id, "s", &[finding("a.rs", Severity::Info)], metrics())
            .await
            .is_err());

        let review = store.get(review_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert_eq!(review.total_issues, 0);
    }
}
