use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use issuelens_common::Config;
use issuelens_pipeline::bootstrap::{build_pipeline, connect_backend};
use issuelens_pipeline::ProcessService;

mod rest;

pub struct AppState {
    pub service: ProcessService,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/api/process", post(rest::api_process))
        .route("/api/process/status/{task_id}", get(rest::api_process_status))
        .route("/api/reports", get(rest::api_report))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // method + path only, query strings carry project ids
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("issuelens=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let backend = connect_backend(&config).await?;
    let pipeline = build_pipeline(&config, &backend)?;
    let state = Arc::new(AppState {
        service: ProcessService::new(Arc::new(pipeline)),
    });

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("IssueLens API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
