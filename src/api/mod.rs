pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{db::store::Store, ingest::Progress};
use handlers::ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub progress: Arc<Progress>,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/data-collection/status", get(handlers::get_status))
        .route("/data-collection/statistics", get(handlers::get_statistics))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
