use std::convert::Infallible;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use ulid::Ulid;

use crate::model::{BookingRequest, BookingStatus, ServiceDraft};
use crate::scheduler::SchedulerError;
use crate::session::Session;

use super::AppState;
use super::auth::issuer_key;
use super::dto::*;
use super::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ── Directory and sessions ───────────────────────────────────────

/// Anonymous sign-up, or registration by a signed-in administrator.
pub async fn register_user(
    State(state): State<AppState>,
    registrar: Option<Session>,
    payload: Result<Json<RegisterUserBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserView>)> {
    let Json(body) = payload?;
    let user = match registrar {
        Some(session) => {
            state
                .scheduler
                .register_by(session.user_id, body.name, body.role, body.phone)
                .await?
        }
        None => state.scheduler.register_user(body.name, body.role, body.phone).await?,
    };
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Binds a token to the user. Only the credential-checking front end holds
/// the issuer key.
pub async fn open_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<OpenSessionBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    if !issuer_key(&headers).is_some_and(|key| state.sessions.verify_issuer(key)) {
        return Err(ApiError::Unauthorized);
    }
    let Json(body) = payload?;
    let user = state
        .scheduler
        .user(&body.user_id)
        .ok_or(SchedulerError::NotFound("user", body.user_id))?;
    let session = state.sessions.open(user.id, user.role, state.scheduler.now_ms())?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn close_session(State(state): State<AppState>, session: Session) -> StatusCode {
    state.sessions.close(&session.token);
    StatusCode::NO_CONTENT
}

// ── Catalog ──────────────────────────────────────────────────────

pub async fn list_services(
    State(state): State<AppState>,
    query: Result<Query<ListServicesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ServiceView>>> {
    let Query(q) = query?;
    let services = state.scheduler.list_services(q.provider);
    Ok(Json(services.into_iter().map(ServiceView::from).collect()))
}

pub async fn get_service(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<ServiceView>> {
    let Path(id) = id?;
    let service = state.scheduler.service(&id).ok_or(SchedulerError::NotFound("service", id))?;
    Ok(Json(service.into()))
}

pub async fn create_service(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<ServiceBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ServiceView>)> {
    let Json(body) = payload?;
    let service = state
        .scheduler
        .create_service(session.user_id, ServiceDraft::from(body))
        .await?;
    Ok((StatusCode::CREATED, Json(service.into())))
}

pub async fn update_service(
    State(state): State<AppState>,
    session: Session,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<ServiceBody>, JsonRejection>,
) -> ApiResult<Json<ServiceView>> {
    let Path(id) = id?;
    let Json(body) = payload?;
    let service = state
        .scheduler
        .update_service(session.user_id, id, ServiceDraft::from(body))
        .await?;
    Ok(Json(service.into()))
}

pub async fn delete_service(
    State(state): State<AppState>,
    session: Session,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    state.scheduler.delete_service(session.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Bookings ─────────────────────────────────────────────────────

pub async fn create_booking(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<CreateBookingBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BookingView>)> {
    let Json(body) = payload?;
    let request = BookingRequest {
        requester_id: session.user_id,
        service_id: body.service_id,
        start: body.booking_date.timestamp_millis(),
        address: body.address,
        contact_phone: body.phone_number,
    };
    let booking = state.scheduler.request_booking(request).await?;
    Ok((StatusCode::CREATED, Json(BookingView::populate(&state.scheduler, booking))))
}

pub async fn my_bookings(State(state): State<AppState>, session: Session) -> Json<Vec<BookingView>> {
    let bookings = state.scheduler.bookings_for(session.user_id).await;
    Json(
        bookings
            .into_iter()
            .map(|b| BookingView::populate(&state.scheduler, b))
            .collect(),
    )
}

pub async fn get_booking(
    State(state): State<AppState>,
    session: Session,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<BookingView>> {
    let Path(id) = id?;
    let booking = state.scheduler.get_booking(id, session.user_id).await?;
    Ok(Json(BookingView::populate(&state.scheduler, booking)))
}

/// `pending` is the initial state only, so it is not accepted as a target.
fn parse_target_status(raw: &str) -> Result<BookingStatus, SchedulerError> {
    match raw.parse::<BookingStatus>() {
        Ok(BookingStatus::Pending) => Err(SchedulerError::invalid("status cannot be set to pending")),
        Ok(status) => Ok(status),
        Err(e) => Err(SchedulerError::invalid(e)),
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    session: Session,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<UpdateStatusBody>, JsonRejection>,
) -> ApiResult<Json<BookingView>> {
    let Path(id) = id?;
    let Json(body) = payload?;
    let status = parse_target_status(&body.status)?;
    let booking = state.scheduler.update_status(id, session.user_id, status).await?;
    Ok(Json(BookingView::populate(&state.scheduler, booking)))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    session: Session,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<BookingView>> {
    let Path(id) = id?;
    let booking = state.scheduler.cancel(id, session.user_id).await?;
    Ok(Json(BookingView::populate(&state.scheduler, booking)))
}

/// Server-sent events for every booking the caller is a party to. Each
/// event is named after the change and carries a [`FeedEvent`]. Lagging
/// subscribers skip what they missed.
pub async fn booking_events(
    State(state): State<AppState>,
    session: Session,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.scheduler.notify.subscribe(session.user_id);
    metrics::gauge!(crate::observability::FEED_SUBSCRIBERS)
        .set(state.scheduler.notify.listeners() as f64);
    tracing::debug!(user = %session.user_id, "change feed opened");

    let scheduler = state.scheduler.clone();
    let stream = BroadcastStream::new(rx)
        .filter_map(|res| async move { res.ok() })
        .map(move |notice| {
            let label = notice.label();
            let payload = FeedEvent::populate(&scheduler, notice);
            let event = Event::default()
                .event(label)
                .json_data(&payload)
                .unwrap_or_else(|_| Event::default().event(label).data("serialization_error"));
            Ok(event)
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
