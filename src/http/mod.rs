//! HTTP/JSON control plane over the supervisor.

mod client;
mod protocol;

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::{
    config::WorkerId,
    health::{Health, HealthChecker},
    runner::Supervisor,
};

pub use client::{ApiClient, DEFAULT_CONTROL_URL};
pub use protocol::{ExitDetails, OkResponse, ToggleAllResponse, WorkerSummary};

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

#[derive(Debug, Clone)]
pub struct AppState {
    supervisor: Arc<Supervisor>,
    health: HealthChecker,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, health: HealthChecker) -> Self {
        Self { supervisor, health }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(status))
        .route("/workers", get(workers))
        .route("/toggle/{id}", post(toggle))
        .route("/restart/{id}", post(restart))
        .route("/toggleAll", post(toggle_all))
        .route("/stopAll", post(stop_all));

    Router::new()
        .route("/", get(dashboard))
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

/// Serves the control plane until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("control plane server failed")
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn status(State(state): State<AppState>) -> Json<Vec<Health>> {
    let ports = state.supervisor.ports();
    Json(state.health.probe_all(&ports).await)
}

async fn workers(State(state): State<AppState>) -> Json<Vec<WorkerSummary>> {
    let handles = state.supervisor.snapshot().await;
    let ports = handles.iter().map(|handle| handle.port).collect::<Vec<_>>();
    let health = state.health.probe_all(&ports).await;
    let max_attempts = state.supervisor.max_restart_attempts();

    let summaries = handles
        .iter()
        .zip(health)
        .map(|(handle, health)| WorkerSummary::from_handle(handle, health, max_attempts))
        .collect();
    Json(summaries)
}

async fn toggle(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let Some(id) = known_worker(&state, &raw_id) else {
        return not_found();
    };
    match state.supervisor.toggle(id).await {
        Ok(action) => {
            tracing::info!(worker = id, %action, "toggled worker");
            ok()
        }
        Err(_) => not_found(),
    }
}

async fn restart(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let Some(id) = known_worker(&state, &raw_id) else {
        return not_found();
    };
    match state.supervisor.restart(id).await {
        Ok(outcome) => {
            tracing::info!(worker = id, %outcome, "restarted worker");
            ok()
        }
        Err(_) => not_found(),
    }
}

async fn toggle_all(State(state): State<AppState>) -> Json<ToggleAllResponse> {
    let action = state.supervisor.toggle_all().await;
    tracing::info!(%action, "toggled all workers");
    Json(ToggleAllResponse { ok: true, action })
}

async fn stop_all(State(state): State<AppState>) -> Json<OkResponse> {
    state.supervisor.stop_all().await;
    tracing::info!("stopped all workers");
    Json(OkResponse::OK)
}

fn known_worker(state: &AppState, raw_id: &str) -> Option<WorkerId> {
    raw_id
        .parse::<WorkerId>()
        .ok()
        .filter(|id| state.supervisor.contains(*id))
}

fn ok() -> Response {
    Json(OkResponse::OK).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(OkResponse::NOT_FOUND)).into_response()
}
