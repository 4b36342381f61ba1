use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{BookingNotice, NoticeKind};

use super::conflict::{find_conflict, find_overlap, validate_start};
use super::lifecycle::{self, Party, party_of};
use super::{Scheduler, SchedulerError};

fn validate_phone(phone: &str) -> Result<(), SchedulerError> {
    if phone.trim().is_empty() {
        return Err(SchedulerError::invalid("phone number is empty"));
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(SchedulerError::invalid("phone number too long"));
    }
    Ok(())
}

fn validate_draft(draft: &ServiceDraft) -> Result<(), SchedulerError> {
    if draft.name.trim().is_empty() {
        return Err(SchedulerError::invalid("service name is empty"));
    }
    if draft.name.len() > MAX_NAME_LEN {
        return Err(SchedulerError::invalid("service name too long"));
    }
    if draft.description.len() > MAX_DESCRIPTION_LEN {
        return Err(SchedulerError::invalid("description too long"));
    }
    if draft.duration_min == 0 {
        return Err(SchedulerError::invalid("duration must be positive"));
    }
    if draft.duration_min > MAX_SERVICE_DURATION_MIN {
        return Err(SchedulerError::invalid("duration too long"));
    }
    if let Some(c) = &draft.category
        && c.len() > MAX_CATEGORY_LEN {
            return Err(SchedulerError::invalid("category too long"));
        }
    if draft.images.len() > MAX_IMAGES {
        return Err(SchedulerError::invalid("too many images"));
    }
    if draft.images.iter().any(|uri| uri.is_empty() || uri.len() > MAX_IMAGE_URI_LEN) {
        return Err(SchedulerError::invalid("invalid image uri"));
    }
    Ok(())
}

impl Scheduler {
    // ── Directory ────────────────────────────────────────────

    /// Self-service sign-up. Administrators cannot be created this way.
    pub async fn register_user(
        &self,
        name: String,
        role: Role,
        phone: Option<String>,
    ) -> Result<UserProfile, SchedulerError> {
        if role == Role::Admin {
            return Err(SchedulerError::Forbidden("admins are created by an administrator"));
        }
        self.insert_user(name, role, phone).await
    }

    /// Account created by an existing user holding `ManageUsers`.
    pub async fn register_by(
        &self,
        registrar: Ulid,
        name: String,
        role: Role,
        phone: Option<String>,
    ) -> Result<UserProfile, SchedulerError> {
        let allowed = self
            .user(&registrar)
            .ok_or(SchedulerError::NotFound("user", registrar))?
            .role
            .can(Capability::ManageUsers);
        if !allowed {
            return Err(SchedulerError::Forbidden("only administrators register other users"));
        }
        self.insert_user(name, role, phone).await
    }

    /// First administrator, created from configuration at startup. Returns
    /// `None` when an administrator already exists.
    pub async fn bootstrap_admin(&self, name: String) -> Result<Option<UserProfile>, SchedulerError> {
        if self.users.iter().any(|u| u.role == Role::Admin) {
            return Ok(None);
        }
        self.insert_user(name, Role::Admin, None).await.map(Some)
    }

    async fn insert_user(
        &self,
        name: String,
        role: Role,
        phone: Option<String>,
    ) -> Result<UserProfile, SchedulerError> {
        if name.trim().is_empty() {
            return Err(SchedulerError::invalid("name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(SchedulerError::invalid("name too long"));
        }
        if let Some(p) = &phone {
            validate_phone(p)?;
        }

        let id = Ulid::new();
        let event = Event::UserRegistered { id, name: name.clone(), role, phone: phone.clone() };
        self.persist_directory(&event).await?;
        info!(user = %id, role = role.as_str(), "user registered");
        Ok(UserProfile { id, name, role, phone })
    }

    /// Store `phone` on the user's profile unless one is already on file.
    /// Returns whether anything was written.
    pub async fn save_contact_phone(&self, user_id: Ulid, phone: &str) -> Result<bool, SchedulerError> {
        validate_phone(phone)?;
        let has_phone = self
            .users
            .get(&user_id)
            .map(|u| u.phone.is_some())
            .ok_or(SchedulerError::NotFound("user", user_id))?;
        if has_phone {
            return Ok(false);
        }
        let event = Event::PhoneSaved { user_id, phone: phone.to_string() };
        self.persist_directory(&event).await?;
        Ok(true)
    }

    // ── Catalog ──────────────────────────────────────────────

    pub async fn create_service(&self, caller: Ulid, draft: ServiceDraft) -> Result<Service, SchedulerError> {
        let role = self.role_of(caller)?;
        lifecycle::require(role, Capability::OfferServices, "role cannot offer services")?;
        validate_draft(&draft)?;

        let service = Service {
            id: Ulid::new(),
            provider_id: caller,
            name: draft.name,
            description: draft.description,
            price: draft.price,
            duration_min: draft.duration_min,
            category: draft.category,
            images: draft.images,
        };
        self.persist_directory(&Event::ServiceSaved { service: service.clone() }).await?;
        info!(service = %service.id, provider = %caller, "service created");
        Ok(service)
    }

    /// Owner or an administrator may edit. Bookings already made keep their
    /// amount; intervals of active bookings follow the new duration.
    pub async fn update_service(
        &self,
        caller: Ulid,
        service_id: Ulid,
        draft: ServiceDraft,
    ) -> Result<Service, SchedulerError> {
        let current = self.service_owned_by(caller, &service_id)?;
        validate_draft(&draft)?;

        // Serialize with booking checks that read this service's duration.
        let lane = self.lane_write(current.provider_id).await;
        if draft.duration_min > current.duration_min {
            let stretched = |sid: &Ulid| {
                if *sid == service_id { draft.duration_min } else { self.service_duration_min(sid) }
            };
            if let Some((earlier, later)) = find_overlap(&lane, stretched) {
                debug!(service = %service_id, %earlier, %later, "longer duration would double-book");
                return Err(SchedulerError::Conflict(
                    "duration change would overlap existing bookings".into(),
                ));
            }
        }
        let service = Service {
            id: service_id,
            provider_id: current.provider_id,
            name: draft.name,
            description: draft.description,
            price: draft.price,
            duration_min: draft.duration_min,
            category: draft.category,
            images: draft.images,
        };
        self.persist_directory(&Event::ServiceSaved { service: service.clone() }).await?;
        info!(service = %service_id, "service updated");
        Ok(service)
    }

    /// Rejected while any pending or confirmed booking references the service.
    pub async fn delete_service(&self, caller: Ulid, service_id: Ulid) -> Result<(), SchedulerError> {
        let current = self.service_owned_by(caller, &service_id)?;

        let lane = self.lane_write(current.provider_id).await;
        if lane.has_active_for_service(&service_id) {
            return Err(SchedulerError::Conflict("service has active bookings".into()));
        }
        let event = Event::ServiceDeleted { id: service_id, provider_id: current.provider_id };
        self.persist_directory(&event).await?;
        info!(service = %service_id, "service deleted");
        Ok(())
    }

    fn role_of(&self, user_id: Ulid) -> Result<Role, SchedulerError> {
        self.users
            .get(&user_id)
            .map(|u| u.role)
            .ok_or(SchedulerError::NotFound("user", user_id))
    }

    fn service_owned_by(&self, caller: Ulid, service_id: &Ulid) -> Result<Service, SchedulerError> {
        let service = self
            .services
            .get(service_id)
            .map(|s| s.value().clone())
            .ok_or(SchedulerError::NotFound("service", *service_id))?;
        if service.provider_id != caller {
            let role = self.role_of(caller)?;
            lifecycle::require(role, Capability::ManageAnyService, "not the owner of this service")?;
        }
        Ok(service)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Validate and place a booking.
    ///
    /// Checks run in order, first failure wins: service exists, start is not
    /// in the past, requester is not the provider, no active booking of the
    /// same provider overlaps. The overlap check and the insert happen under
    /// the provider's lane lock.
    pub async fn request_booking(&self, req: BookingRequest) -> Result<Booking, SchedulerError> {
        let result = self.try_request_booking(req).await;
        metrics::counter!(
            crate::observability::BOOKING_REQUESTS_TOTAL,
            "outcome" => crate::observability::outcome_label(&result)
        )
        .increment(1);
        result
    }

    async fn try_request_booking(&self, req: BookingRequest) -> Result<Booking, SchedulerError> {
        if req.address.len() > MAX_ADDRESS_LEN {
            return Err(SchedulerError::invalid("address too long"));
        }
        let requester_has_phone = self
            .users
            .get(&req.requester_id)
            .map(|u| u.phone.is_some())
            .ok_or(SchedulerError::NotFound("user", req.requester_id))?;

        let service = self
            .services
            .get(&req.service_id)
            .map(|s| s.value().clone())
            .ok_or(SchedulerError::NotFound("service", req.service_id))?;
        let now = self.now_ms();
        validate_start(req.start, now)?;
        if req.requester_id == service.provider_id {
            return Err(SchedulerError::invalid("cannot book own service"));
        }

        let candidate = Span::from_minutes(req.start, service.duration_min);
        let mut lane = self.lane_write(service.provider_id).await;
        if lane.active().len() >= MAX_ACTIVE_BOOKINGS_PER_PROVIDER {
            return Err(SchedulerError::invalid("provider has too many bookings"));
        }
        if let Some(clash) = find_conflict(&lane, &candidate, |sid| self.service_duration_min(sid)) {
            debug!(provider = %service.provider_id, %clash, "slot taken");
            return Err(SchedulerError::Conflict("slot already booked".into()));
        }

        if let Some(phone) = req.contact_phone.as_deref()
            && !requester_has_phone
            && let Err(e) = self.save_contact_phone(req.requester_id, phone).await {
                warn!(user = %req.requester_id, "could not save contact phone: {e}");
            }

        let booking = Booking {
            id: Ulid::new(),
            requester_id: req.requester_id,
            provider_id: service.provider_id,
            service_id: service.id,
            start: req.start,
            address: req.address,
            status: BookingStatus::Pending,
            amount: service.price,
            created_at: now,
            updated_at: now,
        };
        self.persist_lane(&mut lane, &Event::BookingRequested { booking: booking.clone() })
            .await?;
        drop(lane);

        info!(booking = %booking.id, provider = %booking.provider_id, "booking requested");
        self.notify.publish(BookingNotice { kind: NoticeKind::Requested, booking: booking.clone() });
        Ok(booking)
    }

    /// Provider-driven transition: accept, reject or complete.
    pub async fn update_status(
        &self,
        booking_id: Ulid,
        caller: Ulid,
        new_status: BookingStatus,
    ) -> Result<Booking, SchedulerError> {
        let mut lane = self.resolve_booking_write(&booking_id).await?;
        let current = lane
            .get(&booking_id)
            .cloned()
            .ok_or(SchedulerError::NotFound("booking", booking_id))?;
        if party_of(&current, caller) != Party::Provider {
            return Err(SchedulerError::Forbidden("only the provider can change booking status"));
        }
        // Status is re-read under the lane lock, so this is a compare-and-swap.
        let next = lifecycle::provider_transition(current.status, new_status)?;
        self.commit_transition(&mut lane, current, next).await
    }

    /// Either party may cancel a booking that is still pending or confirmed.
    pub async fn cancel(&self, booking_id: Ulid, caller: Ulid) -> Result<Booking, SchedulerError> {
        let mut lane = self.resolve_booking_write(&booking_id).await?;
        let current = lane
            .get(&booking_id)
            .cloned()
            .ok_or(SchedulerError::NotFound("booking", booking_id))?;
        if party_of(&current, caller) == Party::Outsider {
            return Err(SchedulerError::Forbidden("only the requester or provider can cancel"));
        }
        let next = lifecycle::cancellation(current.status)?;
        self.commit_transition(&mut lane, current, next).await
    }

    async fn commit_transition(
        &self,
        lane: &mut ProviderLane,
        current: Booking,
        next: BookingStatus,
    ) -> Result<Booking, SchedulerError> {
        let at = self.now_ms();
        let event = Event::BookingStatusChanged {
            id: current.id,
            provider_id: current.provider_id,
            status: next,
            at,
        };
        self.persist_lane(lane, &event).await?;
        metrics::counter!(crate::observability::STATUS_TRANSITIONS_TOTAL, "to" => next.as_str())
            .increment(1);
        info!(booking = %current.id, from = %current.status, to = %next, "booking status changed");

        let from = current.status;
        let booking = Booking { status: next, updated_at: at, ..current };
        self.notify.publish(BookingNotice {
            kind: NoticeKind::StatusChanged { from },
            booking: booking.clone(),
        });
        Ok(booking)
    }
}
