//! Axum entry point: report-processing notifications start ingestion runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fbaops_sync::{
    build_pipeline, connect_store, IngestionSummary, ReportOrigin, SyncConfig, SyncPipeline,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fbaops-web";

const RETAINED_RUNS: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed { summary: IngestionSummary },
    Failed { error: String },
}

/// Status of the most recent runs started through the endpoint.
#[derive(Debug, Default)]
struct RunRegistry {
    statuses: HashMap<Uuid, RunStatus>,
    order: VecDeque<Uuid>,
}

impl RunRegistry {
    fn set(&mut self, run_id: Uuid, status: RunStatus) {
        if self.statuses.insert(run_id, status).is_none() {
            self.order.push_back(run_id);
        }
        while self.order.len() > RETAINED_RUNS {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<SyncPipeline>,
    runs: Arc<RwLock<RunRegistry>>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        Self {
            pipeline,
            runs: Arc::new(RwLock::new(RunRegistry::default())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProcessingFinished {
    pub report_document_id: String,
    pub country_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: Uuid,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unprocessable(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(err) => {
                error!(error = %format!("{err:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route(
            "/notifications/report-processing-finished",
            post(report_processing_finished_handler),
        )
        .route("/runs/{run_id}", get(run_status_handler))
        .with_state(state)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env()?;
    let store = connect_store(&config).await?;
    let pipeline = build_pipeline(&config, store, ReportOrigin::SpApi).await?;
    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    info!(addr = %config.bind_addr, "listening for report notifications");
    axum::serve(listener, app(AppState::new(Arc::new(pipeline)))).await?;
    Ok(())
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn report_processing_finished_handler(
    State(state): State<AppState>,
    payload: Result<Json<ReportProcessingFinished>, JsonRejection>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let Json(notification) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let document_id = notification.report_document_id.trim().to_string();
    if document_id.is_empty() {
        return Err(ApiError::BadRequest("reportDocumentId must not be empty".into()));
    }
    let country_code = notification.country_code.trim().to_ascii_uppercase();
    if state
        .pipeline
        .reconciler()
        .marketplaces()
        .get(&country_code)
        .is_none()
    {
        return Err(ApiError::Unprocessable(format!(
            "no marketplace configured for countryCode {country_code}"
        )));
    }

    let run_id = Uuid::new_v4();
    state.runs.write().await.set(run_id, RunStatus::Running);
    info!(%run_id, document_id = %document_id, country_code = %country_code, "accepted report notification");

    let task_state = state.clone();
    tokio::spawn(async move {
        let status = match task_state
            .pipeline
            .run_document_with_id(run_id, &document_id, &country_code)
            .await
        {
            Ok(summary) => RunStatus::Completed { summary },
            Err(err) => {
                error!(%run_id, document_id = %document_id, country_code = %country_code, error = %err, "ingestion run failed");
                RunStatus::Failed {
                    error: err.to_string(),
                }
            }
        };
        task_state.runs.write().await.set(run_id, status);
    });

    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

async fn run_status_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|_| ApiError::BadRequest(format!("{run_id} is not a run id")))?;
    state
        .runs
        .read()
        .await
        .statuses
        .get(&run_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} is unknown")))
}
