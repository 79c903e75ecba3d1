use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::analysis::{parse, AnalysisReport, Analyzer, PrContext};
use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};
use crate::scm::types::ChangedFile;
use crate::settings::types::EffectiveSettings;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Keep individual patches bounded so one giant file cannot crowd the rest
/// of the PR out of the prompt.
const MAX_PATCH_CHARS: usize = 20_000;

pub struct ClaudeAnalyzer {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeAnalyzer {
    pub fn new(config: &ClaudeConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ClaudeApi(format!("API returned {status}: {body}")));
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze(
        &self,
        files: &[ChangedFile],
        pr: &PrContext,
        settings: &EffectiveSettings,
    ) -> Result<AnalysisReport> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system_prompt(settings),
            messages: vec![Message {
                role: "user".to_string(),
                content: user_prompt(files, pr),
            }],
        };

        let response = self.send_message(&request).await?;

        let text = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Unknown => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!(
            pr = pr.pr_number,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Claude analysis call finished"
        );

        // Defensive parse: a malformed response becomes an empty issue list
        // with a best-effort summary, never a failed review.
        Ok(parse::parse_report(&text))
    }
}

fn system_prompt(settings: &EffectiveSettings) -> String {
    let categories = settings
        .enabled_categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are a code reviewer. Analyze the pull request diff and report \
         findings as JSON only, no prose, matching:\n\
         {{\"summary\": \"...\", \"issues\": [{{\"file_path\": \"...\", \
         \"line_start\": 1, \"line_end\": 2, \"severity\": \
         \"critical|warning|info\", \"category\": \"{categories}\", \
         \"title\": \"...\", \"description\": \"...\", \"suggestion\": \
         \"...\", \"code_snippet\": \"...\", \"language\": \"...\"}}]}}\n\
         Only report findings in categories: {categories}. Report at most \
         one issue per distinct problem."
    )
}

fn user_prompt(files: &[ChangedFile], pr: &PrContext) -> String {
    let mut prompt = format!(
        "Review PR #{} \"{}\" by {} in {} ({} -> {}).\n\nChanged files:\n",
        pr.pr_number, pr.pr_title, pr.pr_author, pr.repo_full_name, pr.base_sha, pr.head_sha
    );

    for file in files {
        prompt.push_str(&format!("\n### {} ({})\n", file.filename, file.status));
        match &file.patch {
            Some(patch) if patch.len() > MAX_PATCH_CHARS => {
                let mut end = MAX_PATCH_CHARS;
                while !patch.is_char_boundary(end) {
                    end -= 1;
                }
                prompt.push_str("```diff\n");
                prompt.push_str(&patch[..end]);
                prompt.push_str("\n[patch truncated]\n```\n");
            }
            Some(patch) => {
                prompt.push_str("```diff\n");
                prompt.push_str(patch);
                prompt.push_str("\n```\n");
            }
            None => prompt.push_str("(no textual diff available)\n"),
        }
    }

    prompt
}

// --- Request types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
