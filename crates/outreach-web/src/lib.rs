//! Read-only HTTP surface over stored vacancies and pipeline counters.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use outreach_pipeline::PipelineStats;
use outreach_storage::{StoreError, VacancyQuery, VacancyStore};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "outreach-web";

#[derive(Clone)]
pub struct AppState {
    pub vacancies: Arc<dyn VacancyStore>,
    pub stats: Arc<PipelineStats>,
}

impl AppState {
    pub fn new(vacancies: Arc<dyn VacancyStore>, stats: Arc<PipelineStats>) -> Self {
        Self { vacancies, stats }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/stats", get(stats_handler))
        .route("/vacancies", get(vacancies_handler))
        .route("/vacancies/{id}", get(vacancy_detail_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "web surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.stats.snapshot()).into_response()
}

async fn vacancies_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VacancyQuery>,
) -> Response {
    match state.vacancies.list(&query).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error(err),
    }
}

async fn vacancy_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.vacancies.find_by_id(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => not_found(id),
        Err(err) => store_error(err),
    }
}

fn not_found(id: Uuid) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("vacancy {id} not found") })),
    )
        .into_response()
}

fn store_error(err: StoreError) -> Response {
    if let StoreError::NotFound(id) = err {
        return not_found(id);
    }
    error!(error = %err, "vacancy store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
