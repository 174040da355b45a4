//! HTTP front end: thin JSON handlers over [`Engine`].

mod error;
mod extract;
mod handlers;

pub use error::ApiError;
pub use handlers::parse_date;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/slots", get(handlers::list_slots))
        .route(
            "/therapists",
            get(handlers::list_therapists).post(handlers::create_therapist),
        )
        .route("/therapists/{id}", axum::routing::delete(handlers::remove_therapist))
        .route("/therapists/{id}/overrides", get(handlers::get_overrides))
        .route("/therapists/{id}/days-off", post(handlers::toggle_day_off))
        .route("/therapists/{id}/suppressed-slots", post(handlers::toggle_slot))
        .route("/therapists/{id}/events", get(handlers::therapist_events))
        .route("/availability", get(handlers::availability))
        .route(
            "/bookings",
            get(handlers::list_bookings).post(handlers::reserve),
        )
        .route(
            "/bookings/{id}",
            get(handlers::get_booking).delete(handlers::delete_booking),
        )
        .route("/bookings/{id}/cancel", post(handlers::cancel_booking))
        .route("/bookings/{id}/confirm", post(handlers::confirm_booking))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(req).await;
    crate::observability::record_request(route, response.status().as_u16(), started.elapsed());
    response
}
