// flowlink — Web wrapper (Axum)
//
// Minimal HTTP front end: a page with a run button, a status probe and a
// JSON endpoint that executes a workflow and returns its step cache.

pub mod handlers;
pub mod templates;

use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::metrics::Metrics;
use crate::config::WebConfig;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Shared state for web handlers.
pub struct WebState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectorRegistry>,
    pub metrics: Metrics,
    /// Workflow run when a request does not name one.
    pub workflow_path: PathBuf,
}

impl WebState {
    pub fn new(config: Arc<Config>, metrics: Metrics) -> Self {
        let registry = Arc::new(ConnectorRegistry::with_defaults(config.clone()));
        let workflow_path = PathBuf::from(&config.web.workflow_path);
        Self {
            config,
            registry,
            metrics,
            workflow_path,
        }
    }
}

pub fn router(state: Arc<WebState>) -> Router {
    let cors = cors_layer(&state.config.web);
    let app = Router::new()
        .route("/", get(handlers::index))
        .route("/status", get(handlers::status))
        .route("/api/workflow/run", post(handlers::run_workflow))
        .route("/api/metrics", get(handlers::api_metrics));

    match cors {
        Some(cors) => app.layer(cors).with_state(state),
        None => app.with_state(state),
    }
}

/// CORS for the configured origins only. Without any, browsers get no
/// cross-origin access at all.
fn cors_layer(web: &WebConfig) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = web
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            if origin.trim() == "*" {
                tracing::warn!("Ignoring wildcard entry in web.allowed_origins");
                return None;
            }
            HeaderValue::from_str(origin.trim())
                .map_err(|e| tracing::warn!(origin = %origin, error = %e, "Ignoring invalid origin"))
                .ok()
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

/// Start the web server and serve until the process exits.
pub async fn start_web_server(addr: SocketAddr, state: WebState) -> anyhow::Result<()> {
    let app = router(Arc::new(state));

    tracing::info!(addr = %addr, "Starting web server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
