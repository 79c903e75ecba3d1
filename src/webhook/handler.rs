use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::server::AppState;
use crate::webhook::events::{extract_action, WebhookEvent, TRIGGER_ACTIONS};
use crate::webhook::signature::verify_signature;
use crate::webhook::store::RecordOutcome;

/// Webhook intake. Signature verification fails closed; non-qualifying
/// conditions past it return 2xx so the at-least-once sender does not
/// retry them.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = match headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED;
        }
    };

    let event_type = match headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        Some(et) => et.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Event header");
            return StatusCode::BAD_REQUEST;
        }
    };

    let delivery_id = match headers.get("x-github-delivery").and_then(|v| v.to_str().ok()) {
        Some(id) => id.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Delivery header");
            return StatusCode::BAD_REQUEST;
        }
    };

    // Verify before looking at the payload at all
    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, &signature) {
        tracing::warn!(error = %e, delivery = %delivery_id, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    // Audit log entry goes in regardless of whether a review is triggered
    let event_id = match state
        .events
        .record(&delivery_id, &event_type, extract_action(&body).as_deref(), &body)
        .await
    {
        Ok(RecordOutcome::Recorded { event_id }) => event_id,
        Ok(RecordOutcome::Duplicate) => {
            tracing::info!(delivery = %delivery_id, "Duplicate delivery, skipping");
            return StatusCode::OK;
        }
        Err(e) => {
            tracing::error!(error = %e, delivery = %delivery_id, "Failed to record webhook event");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let event = match WebhookEvent::parse(&event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, event_type = %event_type, "Failed to parse webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(event_type = %event_type, delivery = %delivery_id, "Received webhook event");

    let status = match event {
        WebhookEvent::PullRequest(pr_event) => handle_pull_request_event(&state, pr_event).await,
        WebhookEvent::Ping => {
            tracing::info!("Received ping event");
            StatusCode::OK
        }
        WebhookEvent::Unsupported(event_type) => {
            tracing::debug!(event_type = %event_type, "Ignoring unsupported event");
            StatusCode::OK
        }
    };

    if let Err(e) = state.events.mark_processed(event_id).await {
        tracing::warn!(error = %e, delivery = %delivery_id, "Failed to mark event processed");
    }

    status
}

async fn handle_pull_request_event(
    state: &AppState,
    event: crate::webhook::events::PullRequestEvent,
) -> StatusCode {
    // Only opened/synchronize/reopened trigger analysis; everything else is
    // accepted and ignored
    if !TRIGGER_ACTIONS.contains(&event.action.as_str()) {
        tracing::debug!(action = %event.action, "Ignoring pull_request action");
        return StatusCode::OK;
    }

    let repository = match state
        .db
        .find_repository_by_github_id(event.repository.id)
        .await
    {
        Ok(Some(repo)) => repo,
        Ok(None) => {
            // A valid, common outcome: the sender knows repositories this
            // deployment never connected
            tracing::debug!(
                repo = %event.repository.full_name,
                "Repository not connected, dropping event"
            );
            return StatusCode::OK;
        }
        Err(e) => {
            tracing::error!(error = %e, "Repository lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    if !repository.auto_review_enabled {
        tracing::debug!(
            repo = %repository.full_name,
            "Auto-review disabled, dropping event"
        );
        return StatusCode::OK;
    }

    tracing::info!(
        repo = %repository.full_name,
        pr = event.number,
        action = %event.action,
        "Qualifying pull_request event, starting review"
    );

    // The response must not wait on PR metadata fetches or analysis. The
    // sender already gets its 2xx; failures past this point are logged, not
    // surfaced, so they cannot cause spurious retries.
    let orchestrator = state.orchestrator.clone();
    let pr_number = event.number;
    tokio::spawn(async move {
        match orchestrator.start(&repository, pr_number).await {
            Ok(outcome) => {
                tracing::debug!(
                    repo = %repository.full_name,
                    pr = pr_number,
                    review = outcome.review().id,
                    created = matches!(outcome, crate::review::StartOutcome::Created(_)),
                    "Review start handled"
                );
            }
            Err(e) => {
                tracing::error!(
                    repo = %repository.full_name,
                    pr = pr_number,
                    error = %e,
                    "Failed to start review from webhook"
                );
            }
        }
    });

    StatusCode::ACCEPTED
}
