//! HTTP boundary: `POST /query`, `GET /health`, `GET /suggestions`, `GET /operations`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use askdb_core::planner::PlanError;
use askdb_runtime::{QueryError, QueryResponse, QueryService, RuntimeApp, RuntimeOptions};

#[derive(Clone)]
struct AppState {
    service: Arc<QueryService>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    input: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub async fn run_server(config: PathBuf, listen: SocketAddr) -> anyhow::Result<()> {
    let app = RuntimeApp::from_config_path(&config, RuntimeOptions::new())
        .await
        .with_context(|| format!("failed to start askdb from {}", config.display()))?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    println!("askdb-server listening on http://{}", listen);
    axum::serve(listener, router(app.service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated with error")
}

/// Routes over a ready query service.
pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/suggestions", get(suggestions))
        .route("/operations", get(operations))
        .route("/query", post(query))
        .with_state(AppState { service })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status":"ok"}))
}

async fn suggestions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "suggestions": state.service.suggestions() }))
}

async fn operations(State(state): State<AppState>) -> Json<serde_json::Value> {
    let operations: Vec<_> = state
        .service
        .catalog()
        .into_iter()
        .map(|meta| {
            serde_json::json!({
                "name": meta.reference.to_string(),
                "kind": meta.kind,
                "description": meta.description,
                "parameters": meta.parameters,
            })
        })
        .collect();
    Json(serde_json::json!({ "operations": operations }))
}

async fn query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    state
        .service
        .submit_query(&payload.input)
        .await
        .map(Json)
        .map_err(map_query_error)
}

fn map_query_error(err: QueryError) -> ApiError {
    let status = match &err {
        QueryError::EmptyInput => StatusCode::BAD_REQUEST,
        QueryError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        QueryError::Planning(PlanError::Completion(_)) => StatusCode::BAD_GATEWAY,
        QueryError::Planning(PlanError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        QueryError::Planning(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::Execution { .. } | QueryError::Output { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    tracing::warn!(code = err.code(), error = %err, "query request failed");
    (
        status,
        Json(ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
            trace: err.trace().map(str::to_string),
        }),
    )
}
