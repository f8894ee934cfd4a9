pub mod handlers;
pub(crate) mod payload;
pub(crate) mod uploads;
pub(crate) mod util;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;

use crate::config::Settings;
use crate::gateway::LlmGateway;
use crate::llm_config::LlmConfigStore;
use crate::prompts::{FavoriteStore, PromptStore, TaxonomyStore};
use crate::runner::RunOrchestrator;
use crate::sessions::SessionManager;
use crate::stats::StatsAggregator;
use crate::storage::Database;
use crate::usage::{UsageLogStore, UsageLogger};
use crate::users::UserStore;
use uploads::UploadStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<SessionManager>,
    pub taxonomy: Arc<dyn TaxonomyStore>,
    pub prompts: Arc<dyn PromptStore>,
    pub favorites: Arc<dyn FavoriteStore>,
    pub llm_configs: Arc<dyn LlmConfigStore>,
    pub usage_logs: Arc<dyn UsageLogStore>,
    pub runner: RunOrchestrator,
    pub stats: StatsAggregator,
    pub uploads: UploadStore,
}

impl AppState {
    /// Wires every store to the one database handle.
    pub fn new(config: Settings, db: Arc<Database>, gateway: Arc<dyn LlmGateway>) -> Self {
        let usage = UsageLogger::new(db.clone());
        let runner = RunOrchestrator::new(gateway, db.clone(), usage.clone(), config.llm.timeout());
        let stats = StatsAggregator::new(usage, db.clone());
        let sessions = Arc::new(SessionManager::new(
            db.clone(),
            db.clone(),
            config.auth.session_ttl_hours,
        ));
        let uploads = UploadStore::new(config.uploads.dir_path());
        Self {
            users: db.clone(),
            sessions,
            taxonomy: db.clone(),
            prompts: db.clone(),
            favorites: db.clone(),
            llm_configs: db.clone(),
            usage_logs: db,
            runner,
            stats,
            uploads,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.uploads.max_bytes;
    let mut app = handlers::routes().with_state(Arc::new(state));

    // CORS（开发环境便于前端联调；生产应收敛来源并仅 HTTPS）
    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        // 反射请求来源（便于 dev server 代理转发携带 Cookie）
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);
    app = app
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    app
}
