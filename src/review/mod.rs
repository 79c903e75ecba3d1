pub mod persist;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

pub use persist::{IssuePersister, ReviewMetrics};
pub use store::ReviewStore;

use crate::analysis::{AnalysisReport, Analyzer, PrContext};
use crate::cache::{cache_key, AnalysisCache};
use crate::error::{AppError, Result};
use crate::models::{Repository, Review};
use crate::scm::types::ChangedFile;
use crate::scm::SourceControl;
use crate::settings::types::{language_for_path, EffectiveSettings};
use crate::settings::SettingsResolver;

/// Fixed summary for reviews whose every changed file was filtered away.
pub const NO_ANALYZABLE_FILES_SUMMARY: &str = "No analyzable files in this pull request.";

/// Outcome of `start`. A duplicate is not an error: repeated deliveries for
/// an already-known commit resolve to the existing review.
#[derive(Debug)]
pub enum StartOutcome {
    /// A new review was created and its background run scheduled.
    Created(Review),
    /// A review for this (repository, PR, head commit) already exists.
    Existing(Review),
}

impl StartOutcome {
    pub fn review(&self) -> &Review {
        match self {
            StartOutcome::Created(r) | StartOutcome::Existing(r) => r,
        }
    }
}

/// Drives a review through pending -> in_progress -> completed | failed.
///
/// `start` is the fast, synchronous half: dedup and row creation. `run` is
/// the slow half, executed on a detached task that owns its own error
/// handling; every path through it ends in a status write.
#[derive(Clone)]
pub struct ReviewOrchestrator {
    store: ReviewStore,
    persister: IssuePersister,
    settings: SettingsResolver,
    cache: AnalysisCache,
    scm: Arc<dyn SourceControl>,
    analyzer: Arc<dyn Analyzer>,
    cache_ttl: Duration,
    analysis_timeout: Duration,
}

impl ReviewOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ReviewStore,
        persister: IssuePersister,
        settings: SettingsResolver,
        cache: AnalysisCache,
        scm: Arc<dyn SourceControl>,
        analyzer: Arc<dyn Analyzer>,
        cache_ttl: Duration,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            store,
            persister,
            settings,
            cache,
            scm,
            analyzer,
            cache_ttl,
            analysis_timeout,
        }
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    /// Create (or find) the review for the PR's current head commit and
    /// schedule its background run. Returns without waiting on analysis.
    pub async fn start(&self, repository: &Repository, pr_number: i64) -> Result<StartOutcome> {
        let pr = self
            .scm
            .get_pull_request(&repository.owner, &repository.name, pr_number)
            .await?;

        let (review, created) = self
            .store
            .create_or_fetch(repository.id, repository.user_id, &pr)
            .await?;

        if !created {
            tracing::debug!(
                repo = %repository.full_name,
                pr = pr_number,
                head_sha = %pr.head_sha,
                review = review.id,
                "Review already exists for this commit"
            );
            return Ok(StartOutcome::Existing(review));
        }

        tracing::info!(
            repo = %repository.full_name,
            pr = pr_number,
            head_sha = %pr.head_sha,
            review = review.id,
            "Review created, scheduling analysis"
        );

        let orchestrator = self.clone();
        let repo = repository.clone();
        let review_id = review.id;
        tokio::spawn(async move {
            orchestrator.run(review_id, repo).await;
        });

        Ok(StartOutcome::Created(review))
    }

    /// Background half of the pipeline. Never returns an error: failures are
    /// converted into the terminal failed state right here.
    pub async fn run(&self, review_id: i64, repository: Repository) {
        let started = Instant::now();

        match self.store.mark_in_progress(review_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(review = review_id, "Review is not pending, skipping run");
                return;
            }
            Err(e) => {
                tracing::error!(review = review_id, error = %e, "Could not claim review");
                return;
            }
        }

        if let Err(e) = self.execute(review_id, &repository, started).await {
            let elapsed = started.elapsed().as_millis() as i64;
            tracing::error!(review = review_id, error = %e, "Review failed");
            match self.store.mark_failed(review_id, &e.to_string(), elapsed).await {
                Ok(_) => {}
                Err(persist_err) => {
                    tracing::error!(
                        review = review_id,
                        error = %persist_err,
                        "Could not record review failure"
                    );
                }
            }
        }
    }

    async fn execute(
        &self,
        review_id: i64,
        repository: &Repository,
        started: Instant,
    ) -> Result<()> {
        let review = self
            .store
            .get(review_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Review {review_id}")))?;

        let files = self
            .scm
            .get_pull_request_files(&repository.owner, &repository.name, review.pr_number)
            .await?;

        let settings = self
            .settings
            .resolve(repository.user_id, Some(repository.id))
            .await?;

        let files = filter_files(files, &settings);

        if files.is_empty() {
            tracing::info!(review = review_id, "No analyzable files, completing early");
            return self
                .persister
                .commit(
                    review_id,
                    NO_ANALYZABLE_FILES_SUMMARY,
                    &[],
                    ReviewMetrics {
                        files_reviewed: 0,
                        lines_reviewed: 0,
                        processing_time_ms: started.elapsed().as_millis() as i64,
                    },
                )
                .await;
        }

        let pr_context = PrContext {
            repo_full_name: repository.full_name.clone(),
            pr_number: review.pr_number,
            pr_title: review.pr_title.clone(),
            pr_author: review.pr_author.clone(),
            head_sha: review.head_sha.clone(),
            base_sha: review.base_sha.clone(),
        };

        let report = self
            .analyze_with_cache(&files, &pr_context, &settings)
            .await?;

        let mut findings = report.issues;
        findings.retain(|f| {
            f.severity >= settings.severity_threshold
                && settings.enabled_categories.contains(&f.category)
        });

        let metrics = ReviewMetrics {
            files_reviewed: files.len() as i64,
            lines_reviewed: files.iter().map(|f| f.changed_lines()).sum(),
            processing_time_ms: started.elapsed().as_millis() as i64,
        };

        self.persister
            .commit(review_id, &report.summary, &findings, metrics)
            .await
    }

    /// Get-or-compute around the analyzer. The cache is best-effort in both
    /// directions; only the analyzer call itself can fail the review.
    async fn analyze_with_cache(
        &self,
        files: &[ChangedFile],
        pr: &PrContext,
        settings: &EffectiveSettings,
    ) -> Result<AnalysisReport> {
        let key = cache_key(files, settings);

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<AnalysisReport>(&cached) {
                Ok(report) => {
                    tracing::info!(pr = pr.pr_number, "Using cached analysis result");
                    return Ok(report);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding undecodable cache entry");
                    self.cache.invalidate(&key).await;
                }
            }
        }

        let report = tokio::time::timeout(
            self.analysis_timeout,
            self.analyzer.analyze(files, pr, settings),
        )
        .await
        .map_err(|_| {
            AppError::Analysis(format!(
                "Analysis timed out after {}s",
                self.analysis_timeout.as_secs()
            ))
        })??;

        if let Ok(json) = serde_json::to_string(&report) {
            self.cache.set(&key, &json, self.cache_ttl).await;
        }

        Ok(report)
    }
}

/// Apply the configured file filters. A file failing any filter is excluded
/// from analysis entirely, not just suppressed in output.
pub fn filter_files(files: Vec<ChangedFile>, settings: &EffectiveSettings) -> Vec<ChangedFile> {
    let patterns: Vec<Regex> = settings
        .ignored_patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "Skipping invalid ignore pattern");
                None
            }
        })
        .collect();

    files
        .into_iter()
        .filter(|file| {
            if file.status == "removed" {
                return false;
            }
            if settings
                .ignored_files
                .iter()
                .any(|ignored| &file.filename == ignored || file.filename.ends_with(&format!("/{ignored}")))
            {
                return false;
            }
            if patterns.iter().any(|re| re.is_match(&file.filename)) {
                return false;
            }
            if let Some(lang) = language_for_path(&file.filename) {
                if let Some(profile) = settings.languages.get(lang) {
                    if !profile.enabled {
                        return false;
                    }
                    let patch_len = file.patch.as_ref().map_or(0, |p| p.len());
                    if patch_len > profile.max_file_size_bytes {
                        return false;
                    }
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::{test_support::seed_repository, Database};
    use crate::models::{Category, Finding, ReviewStatus, Severity};
    use crate::scm::types::PullRequestInfo;
    use crate::settings::types::SettingsPatch;

    struct MockScm {
        head_sha: String,
        files: Vec<ChangedFile>,
        fail_files: bool,
    }

    #[async_trait]
    impl SourceControl for MockScm {
        async fn get_pull_request(
            &self,
            _owner: &str,
            _repo: &str,
            number: i64,
        ) -> Result<PullRequestInfo> {
            Ok(PullRequestInfo {
                number,
                title: "Add widget".to_string(),
                author: "octocat".to_string(),
                url: format!("https://example.com/pr/{number}"),
                head_sha: self.head_sha.clone(),
                base_sha: "base000".to_string(),
            })
        }

        async fn get_pull_request_files(
            &self,
            _owner: &str,
            _repo: &str,
            _number: i64,
        ) -> Result<Vec<ChangedFile>> {
            if self.fail_files {
                return Err(AppError::GitHubApi("file listing exploded".to_string()));
            }
            Ok(self.files.clone())
        }
    }

    struct MockAnalyzer {
        issues: Vec<Finding>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Analyzer for MockAnalyzer {
        async fn analyze(
            &self,
            _files: &[ChangedFile],
            _pr: &PrContext,
            _settings: &EffectiveSettings,
        ) -> Result<AnalysisReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AnalysisReport {
                summary: "Looked at the diff".to_string(),
                issues: self.issues.clone(),
            })
        }
    }

    fn finding(severity: Severity) -> Finding {
        Finding {
            file_path: "src/lib.rs".to_string(),
            line_start: Some(1),
            line_end: Some(1),
            severity,
            category: Category::Bug,
            title: format!("{} problem", severity.as_str()),
            description: "details".to_string(),
            suggestion: None,
            code_snippet: None,
            language: Some("rust".to_string()),
        }
    }

    fn source_file(name: &str) -> ChangedFile {
        ChangedFile {
            filename: name.to_string(),
            status: "modified".to_string(),
            patch: Some("@@ -1 +1 @@\n-old\n+new".to_string()),
        }
    }

    fn pr_info(head_sha: &str) -> PullRequestInfo {
        PullRequestInfo {
            number: 42,
            title: "Add widget".to_string(),
            author: "octocat".to_string(),
            url: "https://example.com/pr/42".to_string(),
            head_sha: head_sha.to_string(),
            base_sha: "base000".to_string(),
        }
    }

    struct Fixture {
        db: Database,
        orchestrator: ReviewOrchestrator,
        analyzer: Arc<MockAnalyzer>,
        repository: Repository,
    }

    async fn fixture(scm: MockScm, issues: Vec<Finding>) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let (_user_id, repo_id) = seed_repository(&db, 1, true).await;
        let repository = db
            .find_repository_by_github_id(1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repository.id, repo_id);

        let analyzer = Arc::new(MockAnalyzer {
            issues,
            calls: AtomicUsize::new(0),
        });
        let orchestrator = ReviewOrchestrator::new(
            ReviewStore::new(db.pool().clone()),
            IssuePersister::new(db.pool().clone()),
            SettingsResolver::new(db.pool().clone()),
            AnalysisCache::unconnected(16),
            Arc::new(scm),
            analyzer.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );

        Fixture {
            db,
            orchestrator,
            analyzer,
            repository,
        }
    }

    #[tokio::test]
    async fn run_persists_findings_above_threshold() {
        let scm = MockScm {
            head_sha: "abc123".to_string(),
            files: vec![source_file("src/lib.rs")],
            fail_files: false,
        };
        let fx = fixture(
            scm,
            vec![
                finding(Severity::Critical),
                finding(Severity::Warning),
                finding(Severity::Info),
            ],
        )
        .await;

        // The user admits warnings and above
        SettingsResolver::new(fx.db.pool().clone())
            .update(
                fx.repository.user_id,
                &SettingsPatch {
                    severity_threshold: Some(Severity::Warning),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Create the row directly and drive the run synchronously, instead
        // of racing the task start() would spawn
        let (review, _) = fx
            .orchestrator
            .store()
            .create_or_fetch(fx.repository.id, fx.repository.user_id, &pr_info("abc123"))
            .await
            .unwrap();
        let review_id = review.id;
        fx.orchestrator.run(review_id, fx.repository.clone()).await;

        let review = fx.orchestrator.store().get(review_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.total_issues, 2);
        assert_eq!(review.critical_issues, 1);
        assert_eq!(review.warning_issues, 1);
        assert_eq!(review.info_issues, 0);
        assert_eq!(review.files_reviewed, 1);
        assert_eq!(review.lines_reviewed, 2);
    }

    #[tokio::test]
    async fn start_is_idempotent_per_head_commit() {
        let scm = MockScm {
            head_sha: "abc123".to_string(),
            files: vec![],
            fail_files: false,
        };
        let fx = fixture(scm, vec![]).await;

        let first = fx.orchestrator.start(&fx.repository, 42).await.unwrap();
        let second = fx.orchestrator.start(&fx.repository, 42).await.unwrap();

        assert!(matches!(first, StartOutcome::Created(_)));
        assert!(matches!(second, StartOutcome::Existing(_)));
        assert_eq!(first.review().id, second.review().id);
    }

    #[tokio::test]
    async fn all_files_filtered_short_circuits_to_completed() {
        let scm = MockScm {
            head_sha: "abc123".to_string(),
            files: vec![
                ChangedFile {
                    filename: "package-lock.json".to_string(),
                    status: "modified".to_string(),
                    patch: Some("+lockfile churn".to_string()),
                },
                ChangedFile {
                    filename: "web/node_modules/lib/index.js".to_string(),
                    status: "modified".to_string(),
                    patch: Some("+vendored".to_string()),
                },
            ],
            fail_files: false,
        };
        let fx = fixture(scm, vec![finding(Severity::Critical)]).await;

        let (review, _) = fx
            .orchestrator
            .store()
            .create_or_fetch(fx.repository.id, fx.repository.user_id, &pr_info("abc123"))
            .await
            .unwrap();
        let review_id = review.id;
        fx.orchestrator.run(review_id, fx.repository.clone()).await;

        let review = fx.orchestrator.store().get(review_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.summary.as_deref(), Some(NO_ANALYZABLE_FILES_SUMMARY));
        assert_eq!(review.total_issues, 0);
        assert_eq!(review.files_reviewed, 0);
        // The expensive call never happened
        assert_eq!(fx.analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn collaborator_failure_marks_review_failed() {
        let scm = MockScm {
            head_sha: "abc123".to_string(),
            files: vec![],
            fail_files: true,
        };
        let fx = fixture(scm, vec![]).await;

        let (review, _) = fx
            .orchestrator
            .store()
            .create_or_fetch(fx.repository.id, fx.repository.user_id, &pr_info("abc123"))
            .await
            .unwrap();
        let review_id = review.id;
        fx.orchestrator.run(review_id, fx.repository.clone()).await;

        let review = fx.orchestrator.store().get(review_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        let message = review.error_message.unwrap();
        assert!(message.contains("file listing exploded"));
        assert!(review.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn identical_diffs_reuse_the_cached_analysis() {
        let scm = MockScm {
            head_sha: "abc123".to_string(),
            files: vec![source_file("src/lib.rs")],
            fail_files: false,
        };
        let fx = fixture(scm, vec![finding(Severity::Warning)]).await;

        let (first_review, _) = fx
            .orchestrator
            .store()
            .create_or_fetch(fx.repository.id, fx.repository.user_id, &pr_info("abc123"))
            .await
            .unwrap();
        let first = first_review.id;
        fx.orchestrator.run(first, fx.repository.clone()).await;

        // Same PR content lands again under a new head commit
        let scm2 = MockScm {
            head_sha: "def456".to_string(),
            files: vec![source_file("src/lib.rs")],
            fail_files: false,
        };
        let orchestrator2 = ReviewOrchestrator::new(
            ReviewStore::new(fx.db.pool().clone()),
            IssuePersister::new(fx.db.pool().clone()),
            SettingsResolver::new(fx.db.pool().clone()),
            fx.orchestrator.cache.clone(),
            Arc::new(scm2),
            fx.analyzer.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let (second_review, _) = orchestrator2
            .store()
            .create_or_fetch(fx.repository.id, fx.repository.user_id, &pr_info("def456"))
            .await
            .unwrap();
        let second = second_review.id;
        assert_ne!(first, second);
        orchestrator2.run(second, fx.repository.clone()).await;

        let review = orchestrator2.store().get(second).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.total_issues, 1);
        // One upstream call served both reviews
        assert_eq!(fx.analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filter_excludes_each_kind_of_ignored_file() {
        let mut settings = EffectiveSettings::default();
        settings
            .languages
            .insert("go".to_string(), crate::settings::types::LanguageProfile {
                enabled: false,
                max_file_size_bytes: 1024,
            });
        if let Some(rust) = settings.languages.get_mut("rust") {
            rust.max_file_size_bytes = 10;
        }

        let files = vec![
            source_file("src/kept.py"),
            source_file("Cargo.lock"),                  // ignored file
            source_file("dist/bundle.js"),              // ignored pattern
            source_file("pkg/server.go"),               // language disabled
            ChangedFile {
                filename: "src/huge.rs".to_string(),    // over language size cap
                status: "modified".to_string(),
                patch: Some("x".repeat(100)),
            },
            ChangedFile {
                filename: "src/old.py".to_string(),     // deleted file
                status: "removed".to_string(),
                patch: None,
            },
        ];

        let kept = filter_files(files, &settings);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].filename, "src/kept.py");
    }

    #[test]
    fn invalid_ignore_pattern_is_skipped_not_fatal() {
        let settings = EffectiveSettings {
            ignored_patterns: vec!["([unclosed".to_string()],
            ..EffectiveSettings::default()
        };
        let kept = filter_files(vec![source_file("src/kept.py")], &settings);
        assert_eq!(kept.len(), 1);
    }
}
