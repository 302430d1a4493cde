mod config;
mod evidence;
mod extract;
mod fusion;
mod genai;
mod http;
mod market;
mod metrics;
mod models;
mod pipeline;
mod pricing;
mod quality;
mod retry;
mod stockimage;
mod websearch;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    extract::State,
};
use models::{
    AnalyzeRequest, AnalyzeResponse, ApiError, EnrichRequest, EnrichResponse, QualityRequest,
    QualityResponse,
};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde_json::json;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "snaplist.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = Pipeline::from_env();
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/photos/quality", post(photo_quality))
        .route("/listings/analyze", post(analyze_listing))
        .route("/listings/enrich", post(enrich_listing))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "snaplist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "snaplist-api",
    }))
}

/// Run the quality gate alone: blur check plus AI scoring per photo.
/// Both verdicts are advisory; a caller that only wants to proceed can
/// ignore them.
///
/// - Method: `POST`
/// - Path: `/photos/quality`
async fn photo_quality(
    State(state): State<AppState>,
    Json(payload): Json<QualityRequest>,
) -> Result<Json<QualityResponse>, AppError> {
    crate::metrics::inc_requests("/photos/quality");
    let assessments = state
        .pipeline
        .quality_only(&payload.photos, CancellationToken::new())
        .await?;
    Ok(Json(QualityResponse { assessments }))
}

/// Run photos through the identification pipeline: quality gate, both
/// evidence extractors, then fusion into ranked candidates. The response
/// state says whether the top candidate was auto-accepted or the caller
/// must pick from the list before enriching.
///
/// - Method: `POST`
/// - Path: `/listings/analyze`
async fn analyze_listing(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    crate::metrics::inc_requests("/listings/analyze");
    let response = state
        .pipeline
        .analyze(payload, CancellationToken::new())
        .await?;
    info!(
        target = "snaplist.api",
        request_id = %response.request_id,
        candidates = response.candidates.len(),
        "analyze completed"
    );
    Ok(Json(response))
}

/// Enrich a fixed candidate with market pricing and a stock image.
///
/// - Method: `POST`
/// - Path: `/listings/enrich`
async fn enrich_listing(
    State(state): State<AppState>,
    Json(payload): Json<EnrichRequest>,
) -> Result<Json<EnrichResponse>, AppError> {
    crate::metrics::inc_requests("/listings/enrich");
    let response = state
        .pipeline
        .enrich(payload, CancellationToken::new())
        .await?;
    Ok(Json(response))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                    PipelineErrorKind::Cancelled => {
                        StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(25 * 1024 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
