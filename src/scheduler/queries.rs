use ulid::Ulid;

use crate::model::*;

use super::lifecycle::{Party, party_of};
use super::{Scheduler, SchedulerError};

impl Scheduler {
    pub fn user(&self, id: &Ulid) -> Option<UserProfile> {
        self.users.get(id).map(|u| u.value().clone())
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|s| s.value().clone())
    }

    /// Catalog listing, optionally for one provider, oldest first.
    pub fn list_services(&self, provider: Option<Ulid>) -> Vec<Service> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|s| provider.is_none_or(|p| s.provider_id == p))
            .map(|s| s.value().clone())
            .collect();
        services.sort_by_key(|s| s.id);
        services
    }

    /// A booking, visible to its parties and to roles that may view any.
    pub async fn get_booking(&self, booking_id: Ulid, caller: Ulid) -> Result<Booking, SchedulerError> {
        let provider_id = self
            .booking_to_provider
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(SchedulerError::NotFound("booking", booking_id))?;
        let lane = self.lane(provider_id);
        let guard = lane.read().await;
        let booking = guard
            .get(&booking_id)
            .cloned()
            .ok_or(SchedulerError::NotFound("booking", booking_id))?;
        drop(guard);

        if party_of(&booking, caller) == Party::Outsider
            && !self.user(&caller).is_some_and(|u| u.role.can(Capability::ViewAnyBooking))
        {
            return Err(SchedulerError::Forbidden("not a party to this booking"));
        }
        Ok(booking)
    }

    /// Every booking where `user_id` is requester or provider, by start.
    pub async fn bookings_for(&self, user_id: Ulid) -> Vec<Booking> {
        let mut out: Vec<Booking> = Vec::new();

        if let Some(lane) = self.lanes.get(&user_id).map(|e| e.value().clone()) {
            out.extend(lane.read().await.iter().cloned());
        }

        let requested: Vec<Ulid> = self
            .requester_index
            .get(&user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        let mut by_provider: Vec<(Ulid, Ulid)> = requested
            .into_iter()
            .filter_map(|id| self.booking_to_provider.get(&id).map(|p| (*p.value(), id)))
            .filter(|(provider, _)| *provider != user_id)
            .collect();
        by_provider.sort();

        let mut i = 0;
        while i < by_provider.len() {
            let provider = by_provider[i].0;
            let lane = self.lane(provider);
            let guard = lane.read().await;
            while i < by_provider.len() && by_provider[i].0 == provider {
                if let Some(b) = guard.get(&by_provider[i].1) {
                    out.push(b.clone());
                }
                i += 1;
            }
        }

        out.sort_by_key(|b| (b.start, b.id));
        out
    }

    /// Number of bookings on record, any status.
    pub fn booking_count(&self) -> usize {
        self.booking_to_provider.len()
    }
}
