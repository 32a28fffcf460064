//! HTTP surface of the hub: the ingestion endpoint and read-only views over
//! the record log.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | POST | /sensor/data | 200 + stored record, 400/500 on error |
//! | GET | /sensor/status | endpoint list + record count |
//! | GET | /sensor/latest | latest record, 404 if empty |
//! | GET | /sensor/readings | one page of the log |
//! | DELETE | /sensor/readings | clears the log |
//! | GET | /sensor/stats | per-field statistics, 404 if empty |
//! | GET | /sensor/activity | readings per hour |
//! | GET | /sensor/export | CSV download |

use crate::analytics;
use crate::config::ServerConfig;
use crate::error::{ErrorKind, HubError};
use crate::record::Record;
use crate::types::{BoundedLog, DEFAULT_PER_PAGE};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

pub type SharedLog = Arc<Mutex<BoundedLog<Record>>>;

const ENDPOINTS: &[(&str, &str)] = &[
    ("POST /sensor/data", "Receive sensor data"),
    ("GET /sensor/status", "Check API status"),
    ("GET /sensor/latest", "Get latest sensor reading"),
    ("GET /sensor/readings", "Page through stored readings (page, per_page)"),
    ("DELETE /sensor/readings", "Clear all stored readings"),
    ("GET /sensor/stats", "Per-field statistics and trends"),
    ("GET /sensor/activity", "Readings per hour"),
    ("GET /sensor/export", "Download readings as CSV"),
];

pub fn new_log(max_readings: usize) -> SharedLog {
    Arc::new(Mutex::new(BoundedLog::new(max_readings)))
}

#[derive(Clone)]
pub struct AppState {
    pub log: SharedLog,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response(),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response(),
            ErrorKind::Transport | ErrorKind::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sensor/data", post(receive_data))
        .route("/sensor/status", get(status))
        .route("/sensor/latest", get(latest))
        .route("/sensor/readings", get(list_readings).delete(clear_readings))
        .route("/sensor/stats", get(stats))
        .route("/sensor/activity", get(activity))
        .route("/sensor/export", get(export_csv))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn run<F>(config: &ServerConfig, log: SharedLog, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Sensor API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(AppState { log }))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Sensor API stopped");
    Ok(())
}

async fn receive_data(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, HubError> {
    let record = Record::parse(&body, Local::now()).map_err(|e| {
        warn!("Rejected sensor payload: {}", e);
        e
    })?;
    let received = record.stored_view();

    // Store, evicting the oldest reading past capacity
    let total = {
        let mut log = state.log.lock().await;
        if let Some(evicted) = log.push(record) {
            debug!("Evicted reading from {}", evicted.timestamp());
        }
        log.len()
    };
    info!("Received sensor data ({} fields, {} stored)", received.len() - 2, total);

    Ok(Json(json!({
        "status": "success",
        "message": "Data received successfully",
        "received_data": received,
    })))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let (total, capacity) = {
        let log = state.log.lock().await;
        (log.len(), log.capacity())
    };
    let endpoints: Map<String, Value> = ENDPOINTS
        .iter()
        .map(|(route, description)| (route.to_string(), Value::String(description.to_string())))
        .collect();

    Json(json!({
        "status": "running",
        "message": "Sensor API is running",
        "endpoints": endpoints,
        "total_readings": total,
        "max_readings": capacity,
    }))
}

async fn latest(State(state): State<AppState>) -> Result<Json<Map<String, Value>>, HubError> {
    let log = state.log.lock().await;
    log.latest()
        .map(|r| Json(r.public_view()))
        .ok_or_else(|| HubError::NotFound("No data available".to_string()))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn list_readings(
    State(state): State<AppState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Value>, HubError> {
    let Query(params) = params.map_err(|e| HubError::validation(e.body_text()))?;
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);

    let log = state.log.lock().await;
    let page = log.page(params.page, per_page)?.map(|r| r.public_view());
    Ok(Json(serde_json::to_value(page)?))
}

async fn clear_readings(State(state): State<AppState>) -> Json<Value> {
    let removed = state.log.lock().await.clear();
    info!("Cleared {} readings", removed);
    Json(json!({ "status": "cleared", "removed": removed }))
}

async fn stats(State(state): State<AppState>) -> Result<Json<analytics::LogStats>, HubError> {
    let log = state.log.lock().await;
    let records: Vec<&Record> = log.iter().collect();
    Ok(Json(analytics::summarize(&records)?))
}

async fn activity(State(state): State<AppState>) -> Json<Vec<analytics::HourlyCount>> {
    let log = state.log.lock().await;
    let records: Vec<&Record> = log.iter().collect();
    Json(analytics::hourly_activity(&records))
}

async fn export_csv(State(state): State<AppState>) -> impl IntoResponse {
    let csv = {
        let log = state.log.lock().await;
        let records: Vec<&Record> = log.iter().collect();
        analytics::to_csv(&records)
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        analytics::export_file_name(analytics::SENSOR_EXPORT, &Local::now())
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
}
