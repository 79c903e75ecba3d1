use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::models::{Issue, Review};
use crate::server::AppState;
use crate::settings::types::{EffectiveSettings, SettingsPatch};

/// A review plus its findings, as returned by the query surface.
#[derive(Serialize)]
pub struct ReviewResponse {
    #[serde(flatten)]
    pub review: Review,
    pub issues: Vec<Issue>,
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ReviewResponse>, StatusCode> {
    let store = state.orchestrator.store();
    let review = match store.get(id).await {
        Ok(Some(review)) => review,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(review = id, error = %e, "Failed to load review");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let issues = match store.list_issues(id).await {
        Ok(issues) => issues,
        Err(e) => {
            tracing::error!(review = id, error = %e, "Failed to load issues");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    Ok(Json(ReviewResponse { review, issues }))
}

pub async fn list_repository_reviews(
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<i64>,
) -> Result<Json<Vec<Review>>, StatusCode> {
    match state
        .orchestrator
        .store()
        .list_for_repository(repository_id)
        .await
    {
        Ok(reviews) => Ok(Json(reviews)),
        Err(e) => {
            tracing::error!(repository = repository_id, error = %e, "Failed to list reviews");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn resolve_issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.orchestrator.store().resolve_issue(id).await {
        Ok(true) => Ok(Json(json!({ "resolved": true }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(issue = id, error = %e, "Failed to resolve issue");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_user_settings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<EffectiveSettings>, StatusCode> {
    match state.settings.resolve(user_id, None).await {
        Ok(effective) => Ok(Json(effective)),
        Err(e) => {
            tracing::error!(user = user_id, error = %e, "Failed to resolve settings");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn update_user_settings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(partial): Json<SettingsPatch>,
) -> Result<Json<EffectiveSettings>, StatusCode> {
    match state.settings.update(user_id, &partial).await {
        Ok(effective) => Ok(Json(effective)),
        Err(e) => {
            tracing::error!(user = user_id, error = %e, "Failed to update settings");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn update_repository_settings(
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<i64>,
    Json(partial): Json<SettingsPatch>,
) -> Result<StatusCode, StatusCode> {
    match state
        .settings
        .update_for_repository(repository_id, &partial)
        .await
    {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            tracing::error!(repository = repository_id, error = %e, "Failed to update settings");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
