//! SOW Extraction Service
//!
//! Extracts payment milestones and deliverables from Statement-of-Work PDFs
//! and optionally forwards the milestones to TargetProcess.

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, Method, StatusCode},
    response::Json,
    routing::{get, post},
    serve, Router,
};
use serde::Deserialize;
use serde_json::json;
use sow_models::{DebugReport, ExtractionResult, Milestone, SyncStatus};
use sow_utils::{init_logging, AppConfig, ErrorResponse, SowError, SowResult};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use validator::Validate;

mod classifier;
mod completion_client;
mod extraction;
mod markdown;
mod metrics;
mod middleware;
mod pdf_processor;
mod pipeline;
mod segmenter;
mod targetprocess_client;
mod upload;

#[cfg(test)]
mod test_support;

use metrics::ServiceMetrics;
use middleware::request_id_middleware;
use pipeline::SowPipeline;
use targetprocess_client::{MilestoneSink, TargetProcessClient};
use upload::{decode_base64, stage_upload};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration ({}), using defaults and environment credentials", e);
        AppConfig::fallback()
    });

    init_logging(&config.logging)?;
    info!("Starting SOW Extraction Service");
    config.validate()?;

    let metrics = ServiceMetrics::new()?;
    let pipeline = SowPipeline::from_config(&config)?.with_metrics(metrics.clone());
    let sink = TargetProcessClient::new(&config.targetprocess)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = create_app(AppState {
        pipeline: Arc::new(pipeline),
        sink: Arc::new(sink),
        metrics,
        config: Arc::new(config),
    });

    let listener = TcpListener::bind(&addr).await?;
    info!("SOW Extraction Service listening on {}", addr);

    serve(listener, app).await?;

    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SowPipeline>,
    pub sink: Arc<dyn MilestoneSink>,
    pub metrics: ServiceMetrics,
    pub config: Arc<AppConfig>,
}

fn create_app(state: AppState) -> Router {
    let server = &state.config.server;
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(server.timeout_seconds)))
        .layer(DefaultBodyLimit::max(server.max_request_size))
        .layer(axum::middleware::from_fn(request_id_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/extract-sow", post(extract_sow))
        .route("/extract-sow/base64", post(extract_sow_base64))
        .route("/debug-sow", post(debug_sow))
        .route("/sync-milestones", post(sync_milestones))
        .layer(middleware)
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(error: SowError) -> ApiError {
    let status = StatusCode::from_u16(error.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(error)))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "sow-extraction",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Default, Deserialize)]
struct SyncQuery {
    #[serde(default)]
    sync: bool,
}

/// Pull the `file` field out of a multipart upload.
async fn read_file_field(multipart: &mut Multipart) -> SowResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SowError::validation("file", format!("Upload error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| SowError::validation("file", "No file selected"))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| SowError::validation("file", format!("Read error: {}", e)))?;
        return Ok((filename, data.to_vec()));
    }
    Err(SowError::validation("file", "No file provided"))
}

async fn run_extraction(state: &AppState, path: &Path, sync: bool) -> SowResult<ExtractionResult> {
    let result = match state.pipeline.process_sow_document(path).await {
        Ok(result) => result,
        Err(e) => {
            state.metrics.document_failures.inc();
            return Err(e);
        }
    };

    state.metrics.documents_processed.inc();
    state.metrics.milestones_extracted.inc_by(result.milestones.len() as u64);
    state.metrics.deliverables_extracted.inc_by(result.deliverables.len() as u64);

    if sync || state.config.targetprocess.auto_sync {
        let status = state.sink.send_milestones_batch(&result.milestones).await;
        state.metrics.milestones_synced.inc_by(status.succeeded as u64);
        return Ok(result.with_sync_status(status));
    }
    Ok(result)
}

/// Extract milestones and deliverables from an uploaded PDF
async fn extract_sow(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
    mut multipart: Multipart,
) -> Result<Json<ExtractionResult>, ApiError> {
    let (filename, data) = read_file_field(&mut multipart).await.map_err(api_error)?;
    let staged = stage_upload(&filename, &data).map_err(api_error)?;
    info!(filename = %filename, bytes = data.len(), "Received SOW upload");

    run_extraction(&state, staged.path(), query.sync)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize, Validate)]
struct Base64Upload {
    #[validate(length(min = 1))]
    filename: String,
    #[validate(length(min = 1))]
    content_base64: String,
    #[serde(default)]
    sync: bool,
}

/// Same as `/extract-sow`, for clients that send the PDF inline as base64
async fn extract_sow_base64(
    State(state): State<AppState>,
    Json(request): Json<Base64Upload>,
) -> Result<Json<ExtractionResult>, ApiError> {
    request
        .validate()
        .map_err(|e| api_error(SowError::validation("request", e.to_string())))?;

    let data = decode_base64(&request.content_base64).map_err(api_error)?;
    let staged = stage_upload(&request.filename, &data).map_err(api_error)?;
    info!(filename = %request.filename, bytes = data.len(), "Received base64 SOW upload");

    run_extraction(&state, staged.path(), request.sync)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Show which tables were detected and which scored as milestone tables
async fn debug_sow(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DebugReport>, ApiError> {
    let (filename, data) = read_file_field(&mut multipart).await.map_err(api_error)?;
    let staged = stage_upload(&filename, &data).map_err(api_error)?;

    state
        .pipeline
        .debug_report(staged.path())
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    milestones: Vec<Milestone>,
}

/// Forward previously extracted milestones to TargetProcess
async fn sync_milestones(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncStatus>, ApiError> {
    for milestone in &request.milestones {
        milestone
            .validate()
            .map_err(|e| api_error(SowError::validation("milestones", e.to_string())))?;
    }

    let status = state.sink.send_milestones_batch(&request.milestones).await;
    state.metrics.milestones_synced.inc_by(status.succeeded as u64);
    Ok(Json(status))
}
