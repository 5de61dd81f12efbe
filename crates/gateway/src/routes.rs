//! HTTP handlers. Every error body is `{"error": "..."}`.

use {
    axum::{
        Json,
        extract::{Path, Query, State, rejection::JsonRejection},
        http::StatusCode,
        response::IntoResponse,
    },
    chrono::{NaiveDate, NaiveDateTime},
    serde::{Deserialize, Serialize},
};

use crate::{
    error::{GatewayError, Result},
    room_store::Room,
    run_service::{BroadcastRequest, CustomRequest, RunStarted},
    run_store::{AttemptQuery, AttemptRecord, AttemptStats, RunRecord},
    sender_store::Sender,
    server::AppState,
};

const DEFAULT_RUN_LIMIT: u32 = 50;

/// Unwrap a JSON body, reporting malformed input as a 400 with our error shape.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| GatewayError::invalid_input(e.body_text()))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "channels": state.gateway.registry.len(),
        "active_runs": state.gateway.runs.active_runs(),
    }))
}

// ── Rooms ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRoom {
    pub name: String,
    pub website_url: String,
}

pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<Room>>> {
    Ok(Json(state.gateway.rooms.list().await?))
}

pub async fn create_room(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateRoom>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    let name = req.name.trim();
    let website_url = req.website_url.trim();
    if name.is_empty() || website_url.is_empty() {
        return Err(GatewayError::invalid_input(
            "name and website_url are required",
        ));
    }
    let room = state.gateway.rooms.create(name, website_url).await?;
    tracing::info!(room_id = %room.id, name, "room created");
    Ok((StatusCode::CREATED, Json(room)))
}

async fn require_room(state: &AppState, id: &str) -> Result<Room> {
    state
        .gateway
        .rooms
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("room", id))
}

#[derive(Debug, Serialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    pub senders: Vec<Sender>,
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoomDetail>> {
    let room = require_room(&state, &id).await?;
    let senders = state.gateway.senders.list_by_room(&id).await?;
    Ok(Json(RoomDetail { room, senders }))
}

pub async fn list_room_senders(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Sender>>> {
    require_room(&state, &id).await?;
    Ok(Json(state.gateway.senders.list_by_room(&id).await?))
}

pub async fn add_sender(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let sender = state.gateway.sender_service.add(&id).await?;
    Ok((StatusCode::CREATED, Json(sender)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsParams {
    pub limit: Option<u32>,
}

pub async fn list_room_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RunsParams>,
) -> Result<Json<Vec<RunRecord>>> {
    require_room(&state, &id).await?;
    let limit = params.limit.unwrap_or(DEFAULT_RUN_LIMIT);
    Ok(Json(state.gateway.run_log.list_runs(&id, limit).await?))
}

// ── Analytics ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sender_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Analytics {
    pub stats: AttemptStats,
    pub logs: Vec<AttemptRecord>,
}

/// Empty query values count as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        GatewayError::invalid_input(format!("{field} must be YYYY-MM-DD, got {value:?}"))
    })
}

fn millis(at: Option<NaiveDateTime>) -> Option<i64> {
    at.map(|t| t.and_utc().timestamp_millis())
}

/// Inclusive millisecond bounds for a date range, in UTC. The end date
/// covers its whole day.
fn date_range(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<(Option<i64>, Option<i64>)> {
    let from = start_date
        .map(|d| parse_date("start_date", d))
        .transpose()?
        .and_then(|d| millis(d.and_hms_opt(0, 0, 0)));
    let to = end_date
        .map(|d| parse_date("end_date", d))
        .transpose()?
        .and_then(|d| millis(d.and_hms_milli_opt(23, 59, 59, 999)));
    Ok((from, to))
}

pub async fn room_analytics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<Analytics>> {
    require_room(&state, &id).await?;
    let start = non_empty(params.start_date);
    let end = non_empty(params.end_date);
    let (from_ms, to_ms) = date_range(start.as_deref(), end.as_deref())?;

    let query = AttemptQuery {
        room_id: id,
        from_ms,
        to_ms,
        sender_id: non_empty(params.sender_id),
    };
    let stats = state.gateway.run_log.attempt_stats(&query).await?;
    let logs = state.gateway.run_log.query_attempts(&query).await?;
    Ok(Json(Analytics { stats, logs }))
}

// ── Senders ──────────────────────────────────────────────────────────────────

pub async fn sender_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.gateway.sender_service.status(&id).await?))
}

pub async fn toggle_sender(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Sender>> {
    Ok(Json(state.gateway.sender_service.toggle(&id).await?))
}

pub async fn delete_sender(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.gateway.sender_service.delete(&id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ── Runs ─────────────────────────────────────────────────────────────────────

pub async fn send_messages(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<RunStarted>> {
    let req = body(payload)?;
    Ok(Json(state.gateway.runs.start_broadcast(req).await?))
}

pub async fn send_custom_messages(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CustomRequest>, JsonRejection>,
) -> Result<Json<RunStarted>> {
    let req = body(payload)?;
    Ok(Json(state.gateway.runs.start_custom(req).await?))
}

#[derive(Debug, Serialize)]
pub struct RunView {
    #[serde(flatten)]
    pub run: RunRecord,
    /// Still executing in this process.
    pub active: bool,
}

async fn require_run(state: &AppState, id: &str) -> Result<RunRecord> {
    state
        .gateway
        .run_log
        .get_run(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("run", id))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunView>> {
    let run = require_run(&state, &id).await?;
    let active = state.gateway.runs.is_active(&id);
    Ok(Json(RunView { run, active }))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    if state.gateway.runs.cancel_run(&id) {
        return Ok(Json(serde_json::json!({ "status": "cancelling", "run_id": id })));
    }
    require_run(&state, &id).await?;
    Err(GatewayError::invalid_input(format!(
        "run {id} has already finished"
    )))
}

// ── Metrics ──────────────────────────────────────────────────────────────────

/// Prometheus text exposition. Unauthenticated so scrapers can reach it.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    #[cfg(feature = "metrics")]
    {
        if let Some(handle) = state.gateway.metrics_handle.as_ref() {
            return (
                StatusCode::OK,
                [(
                    axum::http::header::CONTENT_TYPE,
                    "text/plain; version=0.0.4; charset=utf-8",
                )],
                handle.render(),
            )
                .into_response();
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = state;

    (StatusCode::SERVICE_UNAVAILABLE, "Metrics not enabled").into_response()
}
