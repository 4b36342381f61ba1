//! JSON-over-HTTP surface of the scheduler.

mod auth;
pub mod dto;
pub mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::scheduler::Scheduler;
use crate::session::SessionRegistry;

pub use auth::ISSUER_KEY_HEADER;
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    /// `issuer_key` is the credential `POST /sessions` demands; with none,
    /// no session can be opened.
    pub fn new(scheduler: Arc<Scheduler>, issuer_key: Option<&str>) -> Self {
        Self {
            scheduler,
            sessions: Arc::new(SessionRegistry::with_issuer_key(issuer_key)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/users", post(handlers::register_user))
        .route(
            "/sessions",
            post(handlers::open_session).delete(handlers::close_session),
        )
        .route(
            "/services",
            get(handlers::list_services).post(handlers::create_service),
        )
        .route(
            "/services/{id}",
            get(handlers::get_service)
                .put(handlers::update_service)
                .delete(handlers::delete_service),
        )
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/my-bookings", get(handlers::my_bookings))
        .route("/bookings/events", get(handlers::booking_events))
        .route(
            "/bookings/{id}",
            get(handlers::get_booking).put(handlers::update_status),
        )
        .route("/bookings/{id}/cancel", put(handlers::cancel_booking))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
