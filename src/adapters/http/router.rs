//! HTTP surface for the control plane.
//!
//! The adapter's only responsibilities are routing, CORS, and request-id
//! propagation; every handler is a one-call wrapper around a component
//! operation. Error bodies are `{error, message}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::domain::error::{JobError, SyncError};
use crate::domain::models::{Job, JobPatch, NewJob, RepoData, ServerConfig};
use crate::services::{HealthService, JobCoordinator, JobFilter, SelfHealer, SyncEngine};

/// Error body shape shared by every failing route.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A domain error mapped onto an HTTP status.
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match &err {
            JobError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", err.to_string()),
            JobError::InvalidStatusTransition { .. } | JobError::Validation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "validation", err.to_string())
            }
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match &err {
            SyncError::SyncInProgress => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            SyncError::RepoNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }
}

/// Shared handler state.
pub struct AppState {
    pub coordinator: Arc<JobCoordinator>,
    pub engine: Arc<SyncEngine>,
    pub healer: Arc<SelfHealer>,
    pub health: Arc<HealthService>,
}

pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/api/v1/jobs", get(list_jobs).post(create_job))
            .route("/api/v1/jobs/metrics", get(job_metrics))
            .route("/api/v1/jobs/cleanup", post(cleanup_jobs))
            .route(
                "/api/v1/jobs/{id}",
                get(get_job).patch(update_job).delete(delete_job),
            )
            .route("/api/v1/repos", get(list_repos).put(update_repo))
            .route("/api/v1/repos/status", get(repo_status))
            .route("/api/v1/repos/sync", post(trigger_full_sync))
            .route("/api/v1/repos/{name}/sync", post(sync_repo))
            .route(
                "/api/v1/repos/cohesiveness",
                get(cohesiveness_report).post(trigger_cohesiveness_check),
            )
            .route("/api/v1/health", get(healer_health).post(healing_check))
            .with_state(self.state.clone());

        let router = if self.config.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        };

        // Request-id first in, propagated last out.
        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until the shutdown future resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.build_router();

        tracing::info!(%addr, "http adapter listening");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
) -> impl IntoResponse {
    Json(state.coordinator.list_jobs(filter).await)
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewJob>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.coordinator.create_job(new).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.coordinator.get_job(&id).await?))
}

async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.coordinator.update_job(&id, patch).await?))
}

async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn job_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.metrics().await)
}

async fn cleanup_jobs(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let outcome = state.coordinator.cleanup().await?;
    Ok(Json(outcome).into_response())
}

async fn list_repos(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.list_repos().await)
}

async fn update_repo(
    State(state): State<Arc<AppState>>,
    Json(data): Json<RepoData>,
) -> Result<Json<RepoData>, ApiError> {
    Ok(Json(state.engine.update_repo(data).await?))
}

async fn repo_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status().await)
}

async fn trigger_full_sync(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let receipt = state.engine.trigger_full_sync().await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)).into_response())
}

async fn sync_repo(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let task = state.engine.sync_repo(&name).await?;
    Ok((StatusCode::ACCEPTED, Json(task)).into_response())
}

async fn trigger_cohesiveness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let outcome = state.engine.trigger_cohesiveness_check().await?;
    Ok(Json(outcome).into_response())
}

async fn cohesiveness_report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.cohesiveness_report().await)
}

async fn healer_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.healer.health_check().await)
}

async fn healing_check(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let report = state.health.healing_check().await?;
    Ok(Json(report).into_response())
}
