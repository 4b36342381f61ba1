//! Booking status state machine and who may drive it.
//!
//! ```text
//! pending   --(provider accepts)-->  confirmed
//! pending   --(provider rejects)-->  cancelled
//! confirmed --(provider completes)--> completed
//! pending | confirmed --(either party cancels)--> cancelled
//! ```

use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Capability, Role};

use super::SchedulerError;

/// How a caller relates to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Requester,
    Provider,
    Outsider,
}

pub fn party_of(booking: &Booking, caller: Ulid) -> Party {
    if caller == booking.provider_id {
        Party::Provider
    } else if caller == booking.requester_id {
        Party::Requester
    } else {
        Party::Outsider
    }
}

/// Transition requested by the provider through `update_status`.
pub fn provider_transition(
    from: BookingStatus,
    to: BookingStatus,
) -> Result<BookingStatus, SchedulerError> {
    use BookingStatus::*;
    match (from, to) {
        (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) => Ok(to),
        _ => Err(SchedulerError::InvalidTransition { from, to }),
    }
}

/// Transition taken by `cancel`, by either party.
pub fn cancellation(from: BookingStatus) -> Result<BookingStatus, SchedulerError> {
    if from.is_terminal() {
        return Err(SchedulerError::InvalidTransition {
            from,
            to: BookingStatus::Cancelled,
        });
    }
    Ok(BookingStatus::Cancelled)
}

pub fn require(role: Role, capability: Capability, msg: &'static str) -> Result<(), SchedulerError> {
    if role.can(capability) {
        Ok(())
    } else {
        Err(SchedulerError::Forbidden(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const ALL: [BookingStatus; 4] = [Pending, Confirmed, Completed, Cancelled];

    #[test]
    fn provider_transitions_match_state_machine() {
        let allowed = [(Pending, Confirmed), (Pending, Cancelled), (Confirmed, Completed)];
        for from in ALL {
            for to in ALL {
                let result = provider_transition(from, to);
                if allowed.contains(&(from, to)) {
                    assert_eq!(result, Ok(to));
                } else {
                    assert_eq!(result, Err(SchedulerError::InvalidTransition { from, to }));
                }
            }
        }
    }

    #[test]
    fn nothing_leaves_terminal_states() {
        for from in [Completed, Cancelled] {
            assert!(cancellation(from).is_err());
            for to in ALL {
                assert!(provider_transition(from, to).is_err());
            }
        }
    }

    #[test]
    fn active_states_cancel() {
        assert_eq!(cancellation(Pending), Ok(Cancelled));
        assert_eq!(cancellation(Confirmed), Ok(Cancelled));
    }

    #[test]
    fn parties() {
        let booking = Booking {
            id: Ulid::new(),
            requester_id: Ulid::new(),
            provider_id: Ulid::new(),
            service_id: Ulid::new(),
            start: 0,
            address: String::new(),
            status: Pending,
            amount: 0,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(party_of(&booking, booking.provider_id), Party::Provider);
        assert_eq!(party_of(&booking, booking.requester_id), Party::Requester);
        assert_eq!(party_of(&booking, Ulid::new()), Party::Outsider);
    }

    #[test]
    fn require_maps_to_forbidden() {
        assert!(require(Role::Admin, Capability::ManageAnyService, "x").is_ok());
        assert_eq!(
            require(Role::Customer, Capability::OfferServices, "customers cannot offer services"),
            Err(SchedulerError::Forbidden("customers cannot offer services"))
        );
    }
}
