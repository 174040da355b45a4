use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tower::ServiceExt;

use slotbook::api;
use slotbook::catalog::SlotCatalog;
use slotbook::clock::ManualClock;
use slotbook::engine::Engine;
use slotbook::notify::NotifyHub;

const DAY: &str = "2026-03-02";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn create_test_app(name: &str) -> (Router, Arc<ManualClock>) {
    let catalog = SlotCatalog::parse("08:00-09:30,09:30-11:00,11:00-12:30").unwrap();
    let start = NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(7, 0, 0)
        .unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let engine = Engine::new(
        test_wal_path(name),
        Arc::new(catalog),
        clock.clone(),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();
    (api::router(Arc::new(engine)), clock)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_therapist(app: &Router, name: &str) -> String {
    let (status, json) = send(app, "POST", "/therapists", Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

async fn reserve(app: &Router, therapist_id: &str, slot: u16, client: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/bookings",
        Some(json!({
            "therapist_id": therapist_id,
            "date": DAY,
            "slot": slot,
            "client_name": client,
            "client_phone": "555-0100",
        })),
    )
    .await
}

#[tokio::test]
async fn test_health_and_slots() {
    let (app, _) = create_test_app("health_slots.wal");

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["therapists"], 0);

    let (status, json) = send(&app, "GET", "/slots", None).await;
    assert_eq!(status, StatusCode::OK);
    let slots = json["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[1]["slot"], 1);
    assert_eq!(slots[1]["label"], "09:30-11:00");
}

#[tokio::test]
async fn test_therapist_roster() {
    let (app, _) = create_test_app("roster.wal");
    let id = create_therapist(&app, "Dana").await;

    let (status, json) = send(&app, "GET", "/therapists", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([{ "id": id, "name": "Dana" }]));

    let (status, json) = send(&app, "POST", "/therapists", Some(json!({ "name": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    let (status, _) = send(&app, "DELETE", &format!("/therapists/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, json) = send(&app, "DELETE", &format!("/therapists/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");
}

#[tokio::test]
async fn test_reserve_and_lifecycle() {
    let (app, clock) = create_test_app("reserve_lifecycle.wal");
    let tid = create_therapist(&app, "Dana").await;

    let (status, booking) = reserve(&app, &tid, 0, "Alice").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["date"], DAY);
    assert_eq!(booking["client"]["name"], "Alice");
    let bid = booking["id"].as_str().unwrap().to_string();

    clock.set(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(8, 30, 0).unwrap());
    let (status, json) = send(&app, "GET", &format!("/bookings/{bid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "in_progress");

    clock.set(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(9, 31, 0).unwrap());
    let (_, json) = send(&app, "GET", &format!("/bookings/{bid}"), None).await;
    assert_eq!(json["status"], "completed");

    let (status, json) = send(&app, "POST", &format!("/bookings/{bid}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "invalid_transition");
}

#[tokio::test]
async fn test_double_booking_conflict() {
    let (app, _) = create_test_app("double_booking.wal");
    let tid = create_therapist(&app, "Dana").await;

    let (first, second) = tokio::join!(reserve(&app, &tid, 1, "Alice"), reserve(&app, &tid, 1, "Bob"));
    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
    let loser = if first.0 == StatusCode::CONFLICT { first.1 } else { second.1 };
    assert_eq!(loser["kind"], "slot_taken");

    let (status, json) = send(&app, "GET", &format!("/bookings?date={DAY}&therapist_id={tid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_day_off_toggle() {
    let (app, _) = create_test_app("day_off_toggle.wal");
    let tid = create_therapist(&app, "Dana").await;
    let uri = format!("/therapists/{tid}/days-off");

    let (status, json) = send(&app, "POST", &uri, Some(json!({ "date": DAY }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["off"], true);
    assert_eq!(json["days_off"], json!([DAY]));

    let (status, json) = reserve(&app, &tid, 0, "Alice").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "therapist_off");

    let (_, json) = send(&app, "GET", &format!("/availability?date={DAY}&therapist_id={tid}"), None).await;
    assert_eq!(json[0]["off"], true);
    assert_eq!(json[0]["slots"][0]["state"]["kind"], "suppressed");

    let (_, json) = send(&app, "POST", &uri, Some(json!({ "date": DAY }))).await;
    assert_eq!(json["off"], false);
    let (status, _) = reserve(&app, &tid, 0, "Alice").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_suppressed_slot_and_availability() {
    let (app, _) = create_test_app("suppressed_slot.wal");
    let tid = create_therapist(&app, "Dana").await;
    let (_, booking) = reserve(&app, &tid, 0, "Alice").await;

    let uri = format!("/therapists/{tid}/suppressed-slots");
    for slot in [0, 2] {
        let (status, json) = send(&app, "POST", &uri, Some(json!({ "date": DAY, "slot": slot }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["suppressed"], true);
    }

    let (status, json) = send(&app, "GET", &format!("/availability?date={DAY}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let slots = json[0]["slots"].as_array().unwrap();
    assert_eq!(slots[0]["state"]["kind"], "booked");
    assert_eq!(slots[0]["state"]["id"], booking["id"]);
    assert_eq!(slots[0]["state"]["client_name"], "Alice");
    assert_eq!(slots[1]["state"]["kind"], "free");
    assert_eq!(slots[2]["state"]["kind"], "suppressed");

    let (_, json) = send(&app, "GET", &format!("/therapists/{tid}/overrides"), None).await;
    assert_eq!(json["suppressed"].as_array().unwrap().len(), 2);

    let (status, json) = send(&app, "POST", &uri, Some(json!({ "date": DAY, "slot": 9 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
}

#[tokio::test]
async fn test_cancel_confirm_delete() {
    let (app, clock) = create_test_app("cancel_confirm_delete.wal");
    let tid = create_therapist(&app, "Dana").await;
    let (_, a) = reserve(&app, &tid, 0, "Alice").await;
    let (_, b) = reserve(&app, &tid, 1, "Bob").await;
    let a = a["id"].as_str().unwrap().to_string();
    let b = b["id"].as_str().unwrap().to_string();

    // Slot 1 has not started at 07:00.
    let (status, json) = send(&app, "POST", &format!("/bookings/{b}/confirm"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "invalid_transition");

    let (status, json) = send(&app, "DELETE", &format!("/bookings/{a}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "invalid_transition");

    let (status, json) = send(&app, "POST", &format!("/bookings/{a}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");

    let (status, _) = send(&app, "DELETE", &format!("/bookings/{a}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/bookings/{a}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    clock.set(
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap(),
    );
    let (status, json) = send(&app, "POST", &format!("/bookings/{b}/confirm"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");

    // Therapist still holds the confirmed booking.
    let (status, json) = send(&app, "DELETE", &format!("/therapists/{tid}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "has_live_bookings");
}

#[tokio::test]
async fn test_bad_dates_rejected() {
    let (app, _) = create_test_app("bad_dates.wal");
    let tid = create_therapist(&app, "Dana").await;

    let (status, json) = send(&app, "GET", "/availability?date=02-03-2026", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    let (status, json) = send(
        &app,
        "POST",
        "/bookings",
        Some(json!({
            "therapist_id": tid,
            "date": "2026-02-30",
            "slot": 0,
            "client_name": "Alice",
            "client_phone": "555-0100",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
}

#[tokio::test]
async fn test_unknown_therapist() {
    let (app, _) = create_test_app("unknown_therapist.wal");
    let ghost = ulid::Ulid::new().to_string();

    let (status, _) = send(&app, "GET", &format!("/availability?date={DAY}&therapist_id={ghost}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = reserve(&app, &ghost, 0, "Alice").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");

    let (status, _) = send(&app, "GET", &format!("/therapists/{ghost}/events"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_rejected() {
    let (app, _) = create_test_app("malformed.wal");
    let tid = create_therapist(&app, "Dana").await;

    // Missing field.
    let (status, json) = send(
        &app,
        "POST",
        "/bookings",
        Some(json!({
            "therapist_id": tid,
            "date": DAY,
            "slot": 0,
            "client_name": "Alice",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert!(json["error"].as_str().unwrap().contains("client_phone"));

    // Wrong type, and a therapist id that is not a ULID.
    let (status, json) = send(
        &app,
        "POST",
        "/bookings",
        Some(json!({
            "therapist_id": "nope",
            "date": DAY,
            "slot": "first",
            "client_name": "Alice",
            "client_phone": "555-0100",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    // No body at all.
    let (status, json) = send(&app, "POST", "/therapists", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    // Malformed ULID in the path.
    let (status, json) = send(&app, "GET", "/bookings/not-a-ulid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    let (status, json) = send(&app, "POST", "/therapists/123/days-off", Some(json!({ "date": DAY }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");

    // Query without the required date.
    let (status, json) = send(&app, "GET", "/availability", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
}
