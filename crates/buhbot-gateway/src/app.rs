use std::sync::Arc;

use axum::{routing::get, Router};
use buhbot_classifier::ClassifierClient;
use buhbot_core::config::BotConfig;
use buhbot_scheduler::SchedulerEngine;
use buhbot_settings::ConfigResolver;
use buhbot_store::Db;

/// Central shared state — passed as `Arc<AppState>` to every Axum handler.
pub struct AppState {
    pub config: BotConfig,
    pub db: Db,
    pub resolver: Arc<ConfigResolver>,
    pub classifier: Arc<ClassifierClient>,
    pub scheduler: Arc<SchedulerEngine>,
}

impl AppState {
    pub fn new(config: BotConfig, db: Db, resolver: Arc<ConfigResolver>, classifier: Arc<ClassifierClient>, scheduler: Arc<SchedulerEngine>) -> Self {
        Self { config, db, resolver, classifier, scheduler }
    }
}

/// Assemble the full Axum router. `/health` is the only HTTP surface this
/// engine exposes — everything else happens through the Telegram adapter and
/// the scheduler's job queues.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
