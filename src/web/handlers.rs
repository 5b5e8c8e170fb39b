// flowlink — Web handlers

use super::templates::{INDEX_HTML, WORKFLOW_PATH_SLOT};
use super::WebState;
use crate::connector::ConnectorFactory;
use crate::workflow::parser::validate;
use crate::workflow::{load_definition, DefinitionError, WorkflowDefinition, WorkflowExecutor};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Escape HTML special characters to prevent XSS.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// JSON error body: `{"status": "error", "error_message", "details"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: details.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "error_message": self.message,
            "details": self.details,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<DefinitionError> for ApiError {
    fn from(err: DefinitionError) -> Self {
        let status = match &err {
            DefinitionError::NotFound(_) => StatusCode::NOT_FOUND,
            DefinitionError::Read(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DefinitionError::Json(_) | DefinitionError::Yaml(_) | DefinitionError::Invalid(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        let message = match &err {
            DefinitionError::NotFound(_) => "workflow definition not found",
            _ => "invalid workflow definition",
        };
        ApiError::new(status, message, err.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub workflow_path: Option<String>,
    #[serde(default)]
    pub definition: Option<Value>,
}

pub async fn index(State(state): State<Arc<WebState>>) -> Html<String> {
    let path = state.workflow_path.display().to_string();
    Html(INDEX_HTML.replace(WORKFLOW_PATH_SLOT, &html_escape(&path)))
}

pub async fn status(State(state): State<Arc<WebState>>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "version": crate::VERSION,
        "workflow_path": state.workflow_path.display().to_string(),
        "services": state.registry.services(),
    }))
}

pub async fn api_metrics(State(state): State<Arc<WebState>>) -> Json<Value> {
    let report = state.metrics.report().await;
    Json(serde_json::to_value(report).unwrap_or_else(|_| json!({})))
}

/// Accept only `application/json` requests. Browsers cannot send that
/// cross-origin without a preflight, and preflights are only answered for
/// `web.allowed_origins`.
fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if mime.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported content type",
            format!("expected application/json, got '{}'", content_type),
        ))
    }
}

/// Run a workflow and return its step cache.
///
/// Requests must be `application/json`. An empty body or `{}` runs the
/// configured workflow, `{"workflow_path": "..."}` runs another file and
/// `{"definition": {...}}` runs an inline definition.
pub async fn run_workflow(
    State(state): State<Arc<WebState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    require_json(&headers)?;
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, "invalid request body", e.to_string())
        })?
    };

    let definition = match request {
        RunRequest {
            definition: Some(inline),
            ..
        } => {
            let definition: WorkflowDefinition =
                serde_json::from_value(inline).map_err(DefinitionError::from)?;
            validate(&definition)?;
            definition
        }
        RunRequest {
            workflow_path: Some(path),
            ..
        } => load_definition(&PathBuf::from(path))?,
        RunRequest { .. } => load_definition(&state.workflow_path)?,
    };

    let factory: Arc<dyn ConnectorFactory> = state.registry.clone();
    let executor = WorkflowExecutor::new(factory).with_metrics(state.metrics.clone());

    let cache = tokio::spawn(async move { executor.run(&definition).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Workflow task failed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "workflow execution failed",
                e.to_string(),
            )
        })?;

    let failed = cache.failures();
    if !failed.is_empty() {
        tracing::warn!(failed = failed.len(), "Workflow finished with failed steps");
    }

    Ok(Json(cache.into_value()))
}
