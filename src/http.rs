//! Admin HTTP surface under `/api/admin`.
//!
//! - GET  /tables                 table names with row counts
//! - GET  /schema                 tables, views, triggers and routines
//! - POST /schema/refresh         reload the table registry
//! - POST /export                 file download (json, csv, excel, sql)
//! - POST /import                 MutationReport
//! - POST /wipe                   WipeOutcome
//! - POST /backup-project/{id}    file download scoped to one project
//! - POST /wipe-project/{id}      WipeOutcome

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Request, State},
    http::{header, HeaderName, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::export::{BackupRequest, ExportFile, ExportRequest};
use crate::import::ImportRequest;
use crate::state::AppState;
use crate::wipe::{WipeProjectRequest, WipeRequest};
use crate::{AppError, ErrorClass};

const IMPORT_BODY_LIMIT: usize = 64 * 1024 * 1024;
static CONTENT_SHA256: HeaderName = HeaderName::from_static("x-content-sha256");

/// Error body is the serialized [`AppError`]; status follows its class.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.class());
        if status.is_server_error() {
            error!(target: "faena", event = "request_failed", code = %self.0.code, error = %self.0);
        } else {
            warn!(target: "faena", event = "request_rejected", code = %self.0.code, status = status.as_u16());
        }
        (status, Json(self.0)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        ApiError(AppError::validation("BODY", rejection.body_text()))
    })
}

fn file_response(file: ExportFile) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (CONTENT_SHA256.clone(), file.sha256),
        ],
        file.body,
    )
        .into_response()
}

async fn list_tables(State(state): State<AppState>) -> ApiResult<Response> {
    let tables = state.tables().await?;
    Ok(Json(tables).into_response())
}

async fn schema(State(state): State<AppState>) -> ApiResult<Response> {
    let catalog = state.schema().await?;
    Ok(Json(catalog).into_response())
}

async fn refresh_schema(State(state): State<AppState>) -> ApiResult<Response> {
    let tables = state.refresh_registry().await?;
    Ok(Json(json!({ "tables": tables })).into_response())
}

async fn export(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let file = state.export(&request).await?;
    Ok(file_response(file))
}

async fn import(
    State(state): State<AppState>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let report = state.import(&request).await?;
    Ok(Json(report).into_response())
}

async fn wipe(
    State(state): State<AppState>,
    payload: Result<Json<WipeRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let outcome = state.wipe(&request).await?;
    Ok(Json(outcome).into_response())
}

async fn backup_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    payload: Result<Json<BackupRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let file = state.backup_project(project_id, &request).await?;
    Ok(file_response(file))
}

async fn wipe_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    payload: Result<Json<WipeProjectRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let outcome = state.wipe_project(project_id, &request).await?;
    Ok(Json(outcome).into_response())
}

async fn require_token(State(token): State<Arc<str>>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented == Some(&*token) {
        return next.run(request).await;
    }
    warn!(target: "faena", event = "auth_rejected", path = %request.uri().path());
    let err = AppError::new("AUTH/UNAUTHORIZED", "Missing or invalid admin token");
    (StatusCode::UNAUTHORIZED, Json(err)).into_response()
}

pub fn router(state: AppState, admin_token: Option<String>) -> Router {
    let api = Router::new()
        .route("/tables", get(list_tables))
        .route("/schema", get(schema))
        .route("/schema/refresh", post(refresh_schema))
        .route("/export", post(export))
        .route(
            "/import",
            post(import).layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT)),
        )
        .route("/wipe", post(wipe))
        .route("/backup-project/{id}", post(backup_project))
        .route("/wipe-project/{id}", post(wipe_project))
        .with_state(state);

    let api = match admin_token {
        Some(token) => api.layer(middleware::from_fn_with_state(
            Arc::<str>::from(token),
            require_token,
        )),
        None => api,
    };
    Router::new().nest("/api/admin", api)
}

pub async fn serve(state: AppState, config: &Config) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(
        target: "faena",
        event = "http_listening",
        addr = %config.bind_addr,
        auth = config.admin_token.is_some()
    );
    axum::serve(listener, router(state, config.admin_token.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve admin api")?;
    info!(target: "faena", event = "http_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "faena", event = "signal_listener_failed", error = %err);
        std::future::pending::<()>().await;
    }
    info!(target: "faena", event = "shutdown_requested");
}
