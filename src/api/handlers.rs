use axum::{extract::State, Json};
use utoipa::OpenApi;

use super::{
    dto::{CollectionStatusDto, StatisticsDto},
    errors::AppError,
    AppState,
};

/// Live progress of the ingestion pipeline.
#[utoipa::path(
    get,
    path = "/data-collection/status",
    responses(
        (status = 200, description = "Ingestion progress", body = CollectionStatusDto),
    ),
    tag = "data-collection"
)]
pub async fn get_status(State(state): State<AppState>) -> Json<CollectionStatusDto> {
    Json(state.progress.snapshot().into())
}

/// Totals of stored channels, sensors and sensor values.
#[utoipa::path(
    get,
    path = "/data-collection/statistics",
    responses(
        (status = 200, description = "Stored totals", body = StatisticsDto),
        (status = 500, description = "Internal server error"),
    ),
    tag = "data-collection"
)]
pub async fn get_statistics(State(state): State<AppState>) -> Result<Json<StatisticsDto>, AppError> {
    let stats = state.store.statistics().await?;
    Ok(Json(stats.into()))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_statistics, health),
    components(schemas(CollectionStatusDto, StatisticsDto)),
    tags(
        (name = "data-collection", description = "Ingestion status endpoints"),
        (name = "system",  description = "System endpoints"),
    ),
    info(
        title = "Sensor Relay Service API",
        version = "0.1.0",
        description = "Status of the sensor harvesting and forwarding pipeline"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
