use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use chrono::NaiveDate;
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;

use super::error::ApiError;
use super::extract::{AppJson, AppPath, AppQuery};

/// Dates travel as `YYYY-MM-DD` strings and are checked here, before the engine sees them.
pub fn parse_date(s: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("date must be YYYY-MM-DD, got {s:?}")))
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: String,
    pub therapist_id: Option<Ulid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTherapistRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DayOffRequest {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct SuppressSlotRequest {
    pub date: String,
    pub slot: SlotIndex,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub therapist_id: Ulid,
    pub date: String,
    pub slot: SlotIndex,
    pub client_name: String,
    pub client_phone: String,
}

pub async fn health(State(engine): State<Arc<Engine>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "therapists": engine.state.len(),
    }))
}

pub async fn list_slots(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let slots: Vec<Value> = engine
        .catalog
        .iter()
        .map(|(index, slot)| {
            json!({
                "slot": index,
                "label": slot.label,
                "start": slot.start,
                "end": slot.end,
            })
        })
        .collect();
    Json(json!({ "slots": slots }))
}

// ── Roster ───────────────────────────────────────────────

pub async fn list_therapists(State(engine): State<Arc<Engine>>) -> Json<Vec<TherapistInfo>> {
    Json(engine.list_therapists().await)
}

pub async fn create_therapist(
    State(engine): State<Arc<Engine>>,
    AppJson(request): AppJson<CreateTherapistRequest>,
) -> Result<(StatusCode, Json<TherapistInfo>), ApiError> {
    let therapist = engine.create_therapist(Ulid::new(), &request.name).await?;
    Ok((StatusCode::CREATED, Json(therapist)))
}

pub async fn remove_therapist(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<StatusCode, ApiError> {
    engine.remove_therapist(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Overrides ────────────────────────────────────────────

pub async fn get_overrides(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<Json<Overrides>, ApiError> {
    Ok(Json(engine.overrides(id).await?))
}

pub async fn toggle_day_off(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
    AppJson(request): AppJson<DayOffRequest>,
) -> Result<Json<Value>, ApiError> {
    let date = parse_date(&request.date)?;
    let days_off = engine.toggle_day_off(id, date).await?;
    info!("day-off toggle for therapist {id} on {date}");
    Ok(Json(json!({
        "therapist_id": id,
        "off": days_off.contains(&date),
        "days_off": days_off,
    })))
}

pub async fn toggle_slot(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
    AppJson(request): AppJson<SuppressSlotRequest>,
) -> Result<Json<Value>, ApiError> {
    let date = parse_date(&request.date)?;
    let suppressed = engine.toggle_slot(id, date, request.slot).await?;
    info!("slot toggle for therapist {id}: slot {} on {date}", request.slot);
    let now_suppressed = suppressed
        .iter()
        .any(|s| s.date == date && s.slot == request.slot);
    Ok(Json(json!({
        "therapist_id": id,
        "suppressed": now_suppressed,
        "suppressed_slots": suppressed,
    })))
}

/// Server-sent stream of committed events for one therapist.
/// A `lagged` event means some were dropped and the client should re-fetch.
pub async fn therapist_events(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if engine.get_therapist(&id).is_none() {
        return Err(EngineError::NotFound(id).into());
    }
    let rx = engine.notify.subscribe(id);
    let stream = futures::stream::unfold(rx, move |mut rx| async move {
        let sse = match rx.recv().await {
            Ok(event) => {
                let data = serde_json::to_string(&event).unwrap_or_default();
                SseEvent::default().event(event.kind()).data(data)
            }
            Err(RecvError::Lagged(n)) => {
                warn!("event stream for therapist {id} lagged by {n}");
                SseEvent::default().event("lagged").data(n.to_string())
            }
            Err(RecvError::Closed) => return None,
        };
        Some((Ok(sse), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Availability & bookings ──────────────────────────────

pub async fn availability(
    State(engine): State<Arc<Engine>>,
    AppQuery(query): AppQuery<DayQuery>,
) -> Result<Json<Vec<TherapistDay>>, ApiError> {
    let date = parse_date(&query.date)?;
    Ok(Json(engine.query_day(query.therapist_id, date).await?))
}

pub async fn list_bookings(
    State(engine): State<Arc<Engine>>,
    AppQuery(query): AppQuery<DayQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let date = parse_date(&query.date)?;
    Ok(Json(engine.list_bookings(date, query.therapist_id).await?))
}

pub async fn reserve(
    State(engine): State<Arc<Engine>>,
    AppJson(request): AppJson<ReserveRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let date = parse_date(&request.date)?;
    let client = ClientInfo {
        name: request.client_name,
        phone: request.client_phone,
    };
    let booking = engine
        .reserve(request.therapist_id, date, request.slot, client)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get_booking(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<Json<Booking>, ApiError> {
    Ok(Json(engine.get_booking(id).await?))
}

pub async fn cancel_booking(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<Json<Booking>, ApiError> {
    Ok(Json(engine.cancel(id).await?))
}

pub async fn confirm_booking(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<Json<Booking>, ApiError> {
    Ok(Json(engine.confirm(id).await?))
}

pub async fn delete_booking(
    State(engine): State<Arc<Engine>>,
    AppPath(id): AppPath<Ulid>,
) -> Result<StatusCode, ApiError> {
    engine.delete_booking(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
