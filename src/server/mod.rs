mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::index_handler,
        api::query_handler,
        api::stats_handler,
        api::reset_handler,
        api::delete_images_handler,
        api::cleanup_handler,
    ),
    components(schemas(
        types::IndexForm,
        types::IndexResponse,
        types::QueryForm,
        types::QueryMatch,
        types::QueryResponse,
        types::StatsResponse,
        types::ResetRequest,
        types::DeleteImagesRequest,
        types::MaintenanceResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/index", post(api::index_handler))
        .route("/query", post(api::query_handler))
        .route("/stats", get(api::stats_handler))
        .route("/reset", post(api::reset_handler))
        .route("/delete-images", post(api::delete_images_handler))
        .route("/cleanup-orphans", post(api::cleanup_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：100M，与入库文件大小上限一致
        .layer(RequestBodyLimitLayer::new(100 * 1024 * 1024))
        .with_state(state)
}
