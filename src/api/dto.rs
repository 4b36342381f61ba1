//! Wire shapes of the HTTP API. Field names are camelCase; instants are
//! RFC 3339 strings; money is an integer count of minor units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Ms, Role, Service, ServiceDraft, UserProfile};
use crate::notify::{BookingNotice, NoticeKind};
use crate::scheduler::Scheduler;
use crate::session::Session;

pub fn to_instant(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterUserBody {
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionBody {
    pub user_id: Ulid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: u64,
    /// Minutes.
    pub duration: u32,
    pub category: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl From<ServiceBody> for ServiceDraft {
    fn from(body: ServiceBody) -> Self {
        ServiceDraft {
            name: body.name,
            description: body.description,
            price: body.price,
            duration_min: body.duration,
            category: body.category,
            images: body.images,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListServicesQuery {
    pub provider: Option<Ulid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    pub service_id: Ulid,
    pub booking_date: DateTime<Utc>,
    pub address: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: String,
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: Ulid,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
}

impl From<UserProfile> for UserView {
    fn from(user: UserProfile) -> Self {
        UserView {
            id: user.id,
            name: user.name,
            role: user.role,
            phone: user.phone,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub token: String,
    pub user_id: Ulid,
    pub role: Role,
    pub opened_at: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        SessionView {
            token: session.token,
            user_id: session.user_id,
            role: session.role,
            opened_at: to_instant(session.opened_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub name: String,
    pub description: String,
    pub price: u64,
    pub duration: u32,
    pub category: Option<String>,
    pub images: Vec<String>,
}

impl From<Service> for ServiceView {
    fn from(s: Service) -> Self {
        ServiceView {
            id: s.id,
            provider_id: s.provider_id,
            name: s.name,
            description: s.description,
            price: s.price,
            duration: s.duration_min,
            category: s.category,
            images: s.images,
        }
    }
}

/// A booking with its service and both parties resolved. References that
/// no longer resolve are left out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub service_id: Ulid,
    pub service: Option<ServiceView>,
    pub user: Option<UserView>,
    pub provider: Option<UserView>,
    pub booking_date: DateTime<Utc>,
    pub address: String,
    pub status: BookingStatus,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingView {
    pub fn populate(scheduler: &Scheduler, b: Booking) -> Self {
        BookingView {
            id: b.id,
            service_id: b.service_id,
            service: scheduler.service(&b.service_id).map(ServiceView::from),
            user: scheduler.user(&b.requester_id).map(UserView::from),
            provider: scheduler.user(&b.provider_id).map(UserView::from),
            booking_date: to_instant(b.start),
            address: b.address,
            status: b.status,
            amount: b.amount,
            created_at: to_instant(b.created_at),
            updated_at: to_instant(b.updated_at),
        }
    }
}

/// Payload of one change-feed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub previous_status: Option<BookingStatus>,
    pub booking: BookingView,
}

impl FeedEvent {
    pub fn populate(scheduler: &Scheduler, notice: BookingNotice) -> Self {
        let previous_status = match notice.kind {
            NoticeKind::Requested => None,
            NoticeKind::StatusChanged { from } => Some(from),
        };
        FeedEvent {
            previous_status,
            booking: BookingView::populate(scheduler, notice.booking),
        }
    }
}
