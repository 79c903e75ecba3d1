pub mod claude;
pub mod parse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Finding;
use crate::scm::types::ChangedFile;
use crate::settings::types::EffectiveSettings;

/// Pull request context handed to the analyzer alongside the diffs.
#[derive(Debug, Clone)]
pub struct PrContext {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub pr_title: String,
    pub pr_author: String,
    pub head_sha: String,
    pub base_sha: String,
}

/// What one analysis call produces. Serializable so cached results can be
/// replayed without another upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: String,
    pub issues: Vec<Finding>,
}

/// AI analysis collaborator. Implementations own their transport and
/// prompt shape; the orchestrator only sees the parsed report.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        files: &[ChangedFile],
        pr: &PrContext,
        settings: &EffectiveSettings,
    ) -> Result<AnalysisReport>;
}
