use serde::{Deserialize, Serialize};

/// Pull request metadata snapshot taken when a review starts.
#[derive(Debug, Clone)]
pub struct PullRequestInfo {
    pub number: i64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub head_sha: String,
    pub base_sha: String,
}

/// One changed file in a pull request. `patch` is absent for binary files
/// and for very large diffs the platform truncates away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    pub patch: Option<String>,
}

impl ChangedFile {
    /// Count of changed lines in the patch (added + removed), ignoring hunk
    /// headers and file markers.
    pub fn changed_lines(&self) -> i64 {
        let Some(patch) = &self.patch else { return 0 };
        patch
            .lines()
            .filter(|l| {
                (l.starts_with('+') && !l.starts_with("+++"))
                    || (l.starts_with('-') && !l.starts_with("---"))
            })
            .count() as i64
    }
}
