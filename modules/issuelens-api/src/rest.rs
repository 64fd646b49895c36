use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::{error, warn};

use issuelens_pipeline::StatusQuery;

use crate::AppState;

#[derive(Deserialize)]
pub struct ProcessQuery {
    project_id: Option<String>,
    stage: Option<u8>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    project_id: Option<String>,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn api_process(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProcessQuery>,
) -> impl IntoResponse {
    match state
        .service
        .submit(params.project_id.as_deref(), params.stage)
        .await
    {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(e) => {
            warn!(error = %e, "Process request rejected");
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

pub async fn api_process_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.service.get_status(&task_id).await {
        StatusQuery::Found(record) => Json(record).into_response(),
        StatusQuery::NotFound { task_id } => {
            error_body(StatusCode::NOT_FOUND, format!("task {task_id} not found"))
        }
    }
}

pub async fn api_report(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReportQuery>,
) -> impl IntoResponse {
    let Some(project_id) = params.project_id.filter(|p| !p.trim().is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "project_id is required");
    };

    match state.service.get_report(&project_id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => error_body(
            StatusCode::NOT_FOUND,
            format!("no report for project {project_id}"),
        ),
        Err(e) => {
            error!(error = %e, project_id = project_id.as_str(), "Failed to load report");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to load report")
        }
    }
}
