use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span covering `minutes` from `start`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

/// What a role is allowed to do beyond acting on its own bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Publish services to the catalog.
    OfferServices,
    /// Edit or delete services owned by someone else.
    ManageAnyService,
    /// Read bookings the caller is not a party to.
    ViewAnyBooking,
    /// Register accounts on someone else's behalf, administrators included.
    ManageUsers,
}

impl Role {
    pub fn can(self, capability: Capability) -> bool {
        match capability {
            Capability::OfferServices => matches!(self, Role::Provider | Role::Admin),
            Capability::ManageAnyService | Capability::ViewAnyBooking | Capability::ManageUsers => {
                self == Role::Admin
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Ulid,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
}

// ── Catalog ──────────────────────────────────────────────────────

/// A service offered by exactly one provider. `price` is in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub name: String,
    pub description: String,
    pub price: u64,
    pub duration_min: u32,
    pub category: Option<String>,
    pub images: Vec<String>,
}

/// The caller-editable part of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDraft {
    pub name: String,
    pub description: String,
    pub price: u64,
    pub duration_min: u32,
    pub category: Option<String>,
    pub images: Vec<String>,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings hold their slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub requester_id: Ulid,
    /// Copied from the service when the booking is made.
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
    pub address: String,
    pub status: BookingStatus,
    /// Service price at booking time; never follows later price edits.
    pub amount: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Input to `Scheduler::request_booking`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub requester_id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
    pub address: String,
    pub contact_phone: Option<String>,
}

/// Where a booking lives inside its lane.
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// In `active`; the start locates it by binary search.
    Active(Ms),
    /// Index into `settled`, which is append-only.
    Settled(usize),
}

/// Every booking of one provider, whatever the service. The lane is the
/// unit of locking for conflict checks.
///
/// Only pending and confirmed bookings take part in overlap checks, so they
/// are kept apart from completed and cancelled ones. Terminal states are
/// final; a settled booking never moves back.
#[derive(Debug, Clone)]
pub struct ProviderLane {
    pub provider_id: Ulid,
    /// Pending and confirmed, sorted by `start`.
    active: Vec<Booking>,
    /// Completed and cancelled, in the order they settled.
    settled: Vec<Booking>,
    slots: HashMap<Ulid, Slot>,
}

impl ProviderLane {
    pub fn new(provider_id: Ulid) -> Self {
        Self {
            provider_id,
            active: Vec::new(),
            settled: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// Insert maintaining sort order by start; equal starts keep arrival order.
    pub fn insert_booking(&mut self, booking: Booking) {
        if booking.status.is_active() {
            let pos = self.active.partition_point(|b| b.start <= booking.start);
            self.slots.insert(booking.id, Slot::Active(booking.start));
            self.active.insert(pos, booking);
        } else {
            self.slots.insert(booking.id, Slot::Settled(self.settled.len()));
            self.settled.push(booking);
        }
    }

    fn active_index(&self, id: &Ulid, start: Ms) -> Option<usize> {
        let from = self.active.partition_point(|b| b.start < start);
        self.active[from..]
            .iter()
            .take_while(|b| b.start == start)
            .position(|b| b.id == *id)
            .map(|i| from + i)
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        match *self.slots.get(id)? {
            Slot::Active(start) => self.active_index(id, start).map(|i| &self.active[i]),
            Slot::Settled(i) => self.settled.get(i),
        }
    }

    /// Record a status change. A booking reaching a terminal state leaves
    /// the active set. Returns false if the booking is not in this lane.
    pub fn set_status(&mut self, id: &Ulid, status: BookingStatus, at: Ms) -> bool {
        match self.slots.get(id).copied() {
            Some(Slot::Active(start)) => {
                let Some(i) = self.active_index(id, start) else { return false };
                if status.is_active() {
                    let b = &mut self.active[i];
                    b.status = status;
                    b.updated_at = at;
                } else {
                    let mut b = self.active.remove(i);
                    b.status = status;
                    b.updated_at = at;
                    self.slots.insert(b.id, Slot::Settled(self.settled.len()));
                    self.settled.push(b);
                }
                true
            }
            Some(Slot::Settled(i)) => match self.settled.get_mut(i) {
                Some(b) => {
                    b.status = status;
                    b.updated_at = at;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Pending and confirmed bookings, by start.
    pub fn active(&self) -> &[Booking] {
        &self.active
    }

    /// Every booking, active first.
    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.active.iter().chain(self.settled.iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Active bookings starting strictly before `end`. Anything at or after
    /// `end` cannot overlap a window ending there.
    pub fn active_starting_before(&self, end: Ms) -> impl Iterator<Item = &Booking> {
        let right_bound = self.active.partition_point(|b| b.start < end);
        self.active[..right_bound].iter()
    }

    pub fn has_active_for_service(&self, service_id: &Ulid) -> bool {
        self.active.iter().any(|b| b.service_id == *service_id)
    }
}

/// Journal record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
        role: Role,
        phone: Option<String>,
    },
    PhoneSaved {
        user_id: Ulid,
        phone: String,
    },
    /// Create or replace.
    ServiceSaved {
        service: Service,
    },
    ServiceDeleted {
        id: Ulid,
        provider_id: Ulid,
    },
    BookingRequested {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        provider_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
}

impl Event {
    /// Provider lane touched by this event, if any.
    pub fn lane(&self) -> Option<Ulid> {
        match self {
            Event::BookingRequested { booking } => Some(booking.provider_id),
            Event::BookingStatusChanged { provider_id, .. } => Some(*provider_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_at(start: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            requester_id: Ulid::new(),
            provider_id: Ulid::nil(),
            service_id: Ulid::new(),
            start,
            address: "1 Main St".into(),
            status,
            amount: 500,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_from_minutes() {
        let s = Span::from_minutes(1_000, 60);
        assert_eq!(s.end, 1_000 + 3_600_000);
        assert_eq!(s.duration_ms(), 3_600_000);
    }

    #[test]
    fn role_capabilities() {
        assert!(!Role::Customer.can(Capability::OfferServices));
        assert!(Role::Provider.can(Capability::OfferServices));
        assert!(Role::Admin.can(Capability::OfferServices));

        assert!(!Role::Provider.can(Capability::ManageAnyService));
        assert!(Role::Admin.can(Capability::ManageAnyService));
        assert!(!Role::Customer.can(Capability::ViewAnyBooking));
        assert!(Role::Admin.can(Capability::ViewAnyBooking));
        assert!(!Role::Provider.can(Capability::ManageUsers));
        assert!(Role::Admin.can(Capability::ManageUsers));
    }

    #[test]
    fn status_activity() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_parses_its_own_rendering() {
        for s in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<BookingStatus>(), Ok(s));
        }
        assert!("canceled".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn lane_keeps_start_order() {
        let mut lane = ProviderLane::new(Ulid::nil());
        lane.insert_booking(booking_at(300, BookingStatus::Pending));
        lane.insert_booking(booking_at(100, BookingStatus::Pending));
        lane.insert_booking(booking_at(200, BookingStatus::Confirmed));
        let starts: Vec<Ms> = lane.active().iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn lookup_among_equal_starts() {
        let mut lane = ProviderLane::new(Ulid::nil());
        let first = booking_at(100, BookingStatus::Pending);
        let second = booking_at(100, BookingStatus::Pending);
        let (a, b) = (first.id, second.id);
        lane.insert_booking(first);
        lane.insert_booking(second);
        lane.insert_booking(booking_at(50, BookingStatus::Confirmed));

        assert_eq!(lane.get(&a).map(|x| x.id), Some(a));
        assert_eq!(lane.get(&b).map(|x| x.id), Some(b));
        assert!(lane.get(&Ulid::new()).is_none());
    }

    #[test]
    fn settling_leaves_the_active_set() {
        let mut lane = ProviderLane::new(Ulid::nil());
        let kept = booking_at(100, BookingStatus::Pending);
        let done = booking_at(200, BookingStatus::Pending);
        let (kept_id, done_id) = (kept.id, done.id);
        lane.insert_booking(kept);
        lane.insert_booking(done);

        assert!(lane.set_status(&kept_id, BookingStatus::Confirmed, 5));
        assert!(lane.set_status(&done_id, BookingStatus::Cancelled, 7));

        assert_eq!(lane.active().len(), 1);
        assert_eq!(lane.len(), 2);
        let settled = lane.get(&done_id).unwrap();
        assert_eq!(settled.status, BookingStatus::Cancelled);
        assert_eq!(settled.updated_at, 7);
        assert_eq!(lane.get(&kept_id).unwrap().status, BookingStatus::Confirmed);
        assert!(!lane.set_status(&Ulid::new(), BookingStatus::Cancelled, 9));
    }

    #[test]
    fn active_starting_before_skips_terminal_and_later() {
        let mut lane = ProviderLane::new(Ulid::nil());
        lane.insert_booking(booking_at(100, BookingStatus::Cancelled));
        lane.insert_booking(booking_at(200, BookingStatus::Pending));
        lane.insert_booking(booking_at(300, BookingStatus::Completed));
        lane.insert_booking(booking_at(400, BookingStatus::Confirmed));
        lane.insert_booking(booking_at(500, BookingStatus::Pending));

        let hits: Vec<Ms> = lane.active_starting_before(500).map(|b| b.start).collect();
        assert_eq!(hits, vec![200, 400]);
    }

    #[test]
    fn active_for_service() {
        let mut lane = ProviderLane::new(Ulid::nil());
        let b = booking_at(100, BookingStatus::Completed);
        let sid = b.service_id;
        lane.insert_booking(b);
        assert!(!lane.has_active_for_service(&sid));

        let mut live = booking_at(200, BookingStatus::Pending);
        live.service_id = sid;
        lane.insert_booking(live);
        assert!(lane.has_active_for_service(&sid));
    }

    #[test]
    fn event_lane() {
        let b = booking_at(0, BookingStatus::Pending);
        let provider = b.provider_id;
        assert_eq!(Event::BookingRequested { booking: b }.lane(), Some(provider));
        assert_eq!(
            Event::PhoneSaved { user_id: Ulid::new(), phone: "1".into() }.lane(),
            None
        );
    }

    #[test]
    fn event_bincode_roundtrip() {
        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            status: BookingStatus::Confirmed,
            at: 42,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
