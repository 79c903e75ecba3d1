use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::analysis::claude::ClaudeAnalyzer;
use crate::cache::AnalysisCache;
use crate::config::AppConfig;
use crate::db::Database;
use crate::review::{IssuePersister, ReviewOrchestrator, ReviewStore};
use crate::scm::github::GitHubClient;
use crate::settings::SettingsResolver;
use crate::webhook::store::WebhookEventStore;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub events: WebhookEventStore,
    pub settings: SettingsResolver,
    pub cache: AnalysisCache,
    pub orchestrator: ReviewOrchestrator,
}

impl AppState {
    pub async fn new(config: AppConfig) -> crate::error::Result<Self> {
        let db = Database::connect(&config.database.url).await?;
        let cache = AnalysisCache::connect(&config.cache).await;
        cache.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));

        let settings = SettingsResolver::new(db.pool().clone());
        let scm = Arc::new(GitHubClient::new(&config.github.token)?);
        let analyzer = Arc::new(ClaudeAnalyzer::new(&config.claude));

        let orchestrator = ReviewOrchestrator::new(
            ReviewStore::new(db.pool().clone()),
            IssuePersister::new(db.pool().clone()),
            settings.clone(),
            cache.clone(),
            scm,
            analyzer,
            Duration::from_secs(config.cache.ttl_secs),
            Duration::from_secs(config.review.analysis_timeout_secs),
        );

        Ok(Self {
            events: WebhookEventStore::new(db.pool().clone()),
            settings,
            cache,
            orchestrator,
            db,
            config,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(crate::webhook::handler::handle_webhook))
        .route("/health", get(health_check))
        .route("/reviews/:id", get(crate::api::get_review))
        .route(
            "/repositories/:id/reviews",
            get(crate::api::list_repository_reviews),
        )
        .route("/issues/:id/resolve", patch(crate::api::resolve_issue))
        .route(
            "/users/:id/settings",
            get(crate::api::get_user_settings).put(crate::api::update_user_settings),
        )
        .route(
            "/repositories/:id/settings",
            put(crate::api::update_repository_settings),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
