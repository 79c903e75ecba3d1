use serde::Deserialize;

/// Top-level webhook event parsed from the payload based on the
/// X-GitHub-Event header.
#[derive(Debug)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    Ping,
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: i64,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: i64,
    pub title: String,
    pub html_url: String,
    pub user: UserPayload,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub login: String,
}

/// PR actions that trigger a review. Everything else (closed, edited,
/// labeled, ...) is accepted and ignored.
pub const TRIGGER_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

impl WebhookEvent {
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match event_type {
            "pull_request" => {
                let event: PullRequestEvent = serde_json::from_slice(payload)?;
                Ok(WebhookEvent::PullRequest(event))
            }
            "ping" => Ok(WebhookEvent::Ping),
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }
}

/// Best-effort extraction of the `action` field for the audit log, tolerant
/// of payloads that fail full parsing.
pub fn extract_action(payload: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()?
        .get("action")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PR_PAYLOAD: &str = r#"{
        "action": "opened",
        "number": 42,
        "pull_request": {
            "number": 42,
            "title": "Add widget",
            "html_url": "https://github.com/acme/widgets/pull/42",
            "user": {"login": "octocat"},
            "head": {"ref": "feature/widget", "sha": "abc123"},
            "base": {"ref": "main", "sha": "def456"}
        },
        "repository": {"id": 7, "full_name": "acme/widgets"}
    }"#;

    #[test]
    fn parses_pull_request_event() {
        let event = WebhookEvent::parse("pull_request", PR_PAYLOAD.as_bytes()).unwrap();
        match event {
            WebhookEvent::PullRequest(pr) => {
                assert_eq!(pr.action, "opened");
                assert_eq!(pr.pull_request.head.sha, "abc123");
                assert_eq!(pr.repository.id, 7);
            }
            other => panic!("expected pull_request event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_unsupported_not_an_error() {
        let event = WebhookEvent::parse("workflow_run", b"{}").unwrap();
        assert!(matches!(event, WebhookEvent::Unsupported(t) if t == "workflow_run"));
    }

    #[test]
    fn extracts_action_from_unparseable_event() {
        // Missing most pull_request fields, but action is still loggable
        let action = extract_action(br#"{"action": "synchronize"}"#);
        assert_eq!(action.as_deref(), Some("synchronize"));
        assert_eq!(extract_action(b"not json"), None);
    }
}
