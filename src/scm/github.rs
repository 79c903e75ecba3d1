use async_trait::async_trait;
use octocrab::Octocrab;

use crate::error::{AppError, Result};
use crate::scm::types::*;
use crate::scm::SourceControl;

/// GitHub implementation over octocrab, authenticated with a personal
/// access or installation token from configuration.
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestInfo> {
        let url = format!("/repos/{owner}/{repo}/pulls/{number}");
        let pr: serde_json::Value = self.client.get(&url, None::<&()>).await?;

        let head_sha = pr["head"]["sha"]
            .as_str()
            .ok_or_else(|| AppError::GitHubApi("No head sha in PR response".to_string()))?
            .to_string();
        let base_sha = pr["base"]["sha"]
            .as_str()
            .ok_or_else(|| AppError::GitHubApi("No base sha in PR response".to_string()))?
            .to_string();

        Ok(PullRequestInfo {
            number,
            title: pr["title"].as_str().unwrap_or("").to_string(),
            author: pr["user"]["login"].as_str().unwrap_or("unknown").to_string(),
            url: pr["html_url"].as_str().unwrap_or("").to_string(),
            head_sha,
            base_sha,
        })
    }

    async fn get_pull_request_files(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<ChangedFile>> {
        // One page covers GitHub's 3000-file cap at per_page=100 in pages;
        // loop until a short page.
        let mut files = Vec::new();
        let mut page = 1u32;
        loop {
            let url = format!(
                "/repos/{owner}/{repo}/pulls/{number}/files?per_page=100&page={page}"
            );
            let batch: Vec<serde_json::Value> = self.client.get(&url, None::<&()>).await?;
            let len = batch.len();

            for f in batch {
                let Some(filename) = f["filename"].as_str() else {
                    continue;
                };
                files.push(ChangedFile {
                    filename: filename.to_string(),
                    status: f["status"].as_str().unwrap_or("modified").to_string(),
                    patch: f["patch"].as_str().map(|s| s.to_string()),
                });
            }

            if len < 100 {
                break;
            }
            page += 1;
        }
        Ok(files)
    }
}
