pub mod api;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::MergeConfig;
use crate::services::merge_service::MergeService;
use crate::services::session::SessionStore;
use axum::{
    Router,
    middleware::from_fn,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::sessions::create_session,
        api::handlers::sessions::get_session,
        api::handlers::sessions::delete_session,
        api::handlers::sessions::upload_files,
        api::handlers::sessions::remove_file,
        api::handlers::sessions::fold_session,
        api::handlers::sessions::merge_session,
        api::handlers::sessions::download_artifact,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            models::SessionResponse,
            models::StagedFileResponse,
            models::AccumulatorResponse,
            models::UploadResponse,
            models::MergeOptions,
            models::FoldOptions,
            models::ArtifactResponse,
            models::Delivery,
            models::MergeOutcome,
            services::merger::Inspection,
            services::manifest::Manifest,
            services::manifest::PartEntry,
            config::MergeOrder,
            config::ReduceStrategy,
            config::SplitMode,
        )
    ),
    tags(
        (name = "sessions", description = "Staging, merging and downloading"),
        (name = "system", description = "Health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub merges: Arc<MergeService>,
    pub sessions: Arc<SessionStore>,
    pub config: MergeConfig,
}

impl AppState {
    pub fn new(merges: MergeService) -> Self {
        let config = merges.config().clone();
        Self {
            merges: Arc::new(merges),
            sessions: Arc::new(SessionStore::new()),
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_file_size.saturating_add(10 * 1024 * 1024); // multipart overhead

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/sessions", post(api::handlers::sessions::create_session))
        .route(
            "/sessions/:id",
            get(api::handlers::sessions::get_session)
                .delete(api::handlers::sessions::delete_session),
        )
        .route(
            "/sessions/:id/files",
            post(api::handlers::sessions::upload_files),
        )
        .route(
            "/sessions/:id/files/:file_id",
            delete(api::handlers::sessions::remove_file),
        )
        .route(
            "/sessions/:id/fold",
            post(api::handlers::sessions::fold_session),
        )
        .route(
            "/sessions/:id/merge",
            post(api::handlers::sessions::merge_session),
        )
        .route(
            "/sessions/:id/artifacts/:name",
            get(api::handlers::sessions::download_artifact),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
