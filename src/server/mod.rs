//! HTTP trigger and status API
//!
//! - `POST /api/orchestrators/trip-speeds?path=<uri>` starts an instance and
//!   answers `202 Accepted` with where to poll
//! - `GET /api/instances/{id}` returns the status snapshot; `202` while the
//!   instance runs, `200` once it finished
//! - `GET /api/instances` lists every known instance
//! - `GET /health`

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::mapreduce::{parse_trigger_path, OrchestrationState, TRIP_SPEEDS};
use crate::orchestration::{
    HistoryError, InstanceStatus, OrchestrationEngine, OrchestrationError, RuntimeStatus,
};

/// API server over a shared engine
pub struct ApiServer {
    engine: Arc<OrchestrationEngine>,
    result_container: Option<String>,
}

#[derive(Clone)]
struct ApiState {
    engine: Arc<OrchestrationEngine>,
    result_container: Option<String>,
}

impl ApiServer {
    pub fn new(engine: Arc<OrchestrationEngine>) -> Self {
        Self {
            engine,
            result_container: None,
        }
    }

    /// Attach a result container to every instance started through the API
    pub fn with_result_container(mut self, container: Option<String>) -> Self {
        self.result_container = container;
        self
    }

    /// Resume unfinished instances, then serve until the process stops
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        self.resume_unfinished().await?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Starting trip-speed API server on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Pick up instances whose previous driver stopped before they finished
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let mut resumed = 0;
        for status in self.engine.list_instances().await? {
            if !status.runtime_status.is_terminal() {
                info!("Resuming unfinished instance {}", status.instance_id);
                self.engine.spawn(&status.instance_id);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(ApiState {
            engine: Arc::clone(&self.engine),
            result_container: self.result_container.clone(),
        });

        Router::new()
            .route("/health", get(health_check))
            .route("/api/orchestrators/trip-speeds", post(start_trip_speeds))
            .route("/api/instances", get(list_instances))
            .route("/api/instances/{id}", get(get_instance))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        let status = match &err {
            OrchestrationError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::History(HistoryError::InvalidInstanceId(_)) => {
                StatusCode::BAD_REQUEST
            }
            OrchestrationError::AlreadyRunning(_) | OrchestrationError::InstanceExists(_) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    path: Option<String>,
}

/// Where to poll a started instance
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusResponse {
    pub id: String,
    pub status_query_get_uri: String,
}

/// Status snapshot plus map-reduce progress
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub status: InstanceStatus,
    pub progress: OrchestrationState,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn start_trip_speeds(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<StartQuery>,
) -> Result<Response, ApiError> {
    let request = parse_trigger_path(query.path.as_deref())
        .map_err(|e| {
            warn!("Rejected trigger: {}", e);
            ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
        })?
        .with_result_container(state.result_container.clone());

    let input = serde_json::to_value(&request)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let instance_id = state.engine.start_instance(TRIP_SPEEDS, input).await?;
    state.engine.spawn(&instance_id);

    let status_path = format!("/api/instances/{}", instance_id);
    let status_query_get_uri = match headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{}{}", host, status_path),
        None => status_path.clone(),
    };

    info!("Started instance {} for {}", instance_id, request.container);
    let body = CheckStatusResponse {
        id: instance_id,
        status_query_get_uri,
    };
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, status_path)],
        Json(body),
    )
        .into_response())
}

async fn get_instance(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let history = state.engine.history(&id).await?;
    let status = InstanceStatus::from_history(&history)
        .ok_or_else(|| OrchestrationError::InstanceNotFound(id.clone()))?;

    let code = if status.runtime_status.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let body = InstanceResponse {
        progress: OrchestrationState::from_history(&history),
        status,
    };
    Ok((code, Json(body)).into_response())
}

/// One line per instance in the listing
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub instance_id: String,
    pub runtime_status: RuntimeStatus,
    pub created_time: chrono::DateTime<chrono::Utc>,
    pub last_updated_time: chrono::DateTime<chrono::Utc>,
}

impl From<InstanceStatus> for InstanceSummary {
    fn from(status: InstanceStatus) -> Self {
        Self {
            instance_id: status.instance_id,
            runtime_status: status.runtime_status,
            created_time: status.created_time,
            last_updated_time: status.last_updated_time,
        }
    }
}

async fn list_instances(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<InstanceSummary>>, ApiError> {
    let statuses = state.engine.list_instances().await?;
    Ok(Json(statuses.into_iter().map(InstanceSummary::from).collect()))
}
