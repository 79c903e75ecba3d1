pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// Source-control collaborator. The orchestrator only needs PR metadata and
/// the changed-file set; everything else about the hosting platform stays
/// behind this seam.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fetch current metadata for a pull request. A missing PR surfaces as
    /// `AppError::NotFound`, distinct from transport or API failures.
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestInfo>;

    /// Fetch the changed files of a pull request, with unified diff patches
    /// where the platform provides them.
    async fn get_pull_request_files(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<ChangedFile>>;
}
