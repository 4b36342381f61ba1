use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::SchedulerError;

/// Source of "now" for past-date checks and timestamps.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or_default()
    }
}

pub(crate) fn validate_start(start: Ms, now: Ms) -> Result<(), SchedulerError> {
    if start < now {
        return Err(SchedulerError::invalid("past date"));
    }
    if start > MAX_VALID_TIMESTAMP_MS {
        return Err(SchedulerError::invalid("booking date out of range"));
    }
    Ok(())
}

/// Find an active booking in `lane` whose interval overlaps `candidate`.
///
/// Each existing booking's interval is `[start, start + duration)` with the
/// duration looked up from its own service via `duration_of`.
pub fn find_conflict(
    lane: &ProviderLane,
    candidate: &Span,
    duration_of: impl Fn(&Ulid) -> u32,
) -> Option<Ulid> {
    lane.active_starting_before(candidate.end)
        .find(|b| Span::from_minutes(b.start, duration_of(&b.service_id)).overlaps(candidate))
        .map(|b| b.id)
}

/// First pair of active bookings in `lane` whose intervals overlap, given
/// the durations `duration_of` reports. Stops at the first hit, so only the
/// previous booking in start order has to be remembered.
pub fn find_overlap(lane: &ProviderLane, duration_of: impl Fn(&Ulid) -> u32) -> Option<(Ulid, Ulid)> {
    let mut previous: Option<(Ulid, Ms)> = None;
    for b in lane.active() {
        if let Some((earlier, end)) = previous
            && b.start < end
        {
            return Some((earlier, b.id));
        }
        previous = Some((b.id, Span::from_minutes(b.start, duration_of(&b.service_id)).end));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;

    fn lane_with(entries: &[(Ms, Ulid, BookingStatus)]) -> ProviderLane {
        let mut lane = ProviderLane::new(Ulid::nil());
        for &(start, service_id, status) in entries {
            lane.insert_booking(Booking {
                id: Ulid::new(),
                requester_id: Ulid::new(),
                provider_id: Ulid::nil(),
                service_id,
                start,
                address: String::new(),
                status,
                amount: 0,
                created_at: 0,
                updated_at: 0,
            });
        }
        lane
    }

    #[test]
    fn past_date_rejected_now_accepted() {
        assert!(validate_start(999, 1000).is_err());
        assert!(validate_start(1000, 1000).is_ok());
        assert!(validate_start(MAX_VALID_TIMESTAMP_MS + 1, 0).is_err());
    }

    #[test]
    fn overlap_and_touching_boundary() {
        let svc = Ulid::new();
        let lane = lane_with(&[(600 * M, svc, BookingStatus::Pending)]);
        let sixty = |_: &Ulid| 60;

        // 10:30-11:30 overlaps 10:00-11:00
        assert!(find_conflict(&lane, &Span::from_minutes(630 * M, 60), sixty).is_some());
        // 11:00-12:00 touches only
        assert!(find_conflict(&lane, &Span::from_minutes(660 * M, 60), sixty).is_none());
        // 09:00-10:00 touches only
        assert!(find_conflict(&lane, &Span::from_minutes(540 * M, 60), sixty).is_none());
        // 09:30-10:01 overlaps by one minute
        assert!(find_conflict(&lane, &Span::new(570 * M, 601 * M), sixty).is_some());
    }

    #[test]
    fn existing_interval_uses_its_own_service_duration() {
        let long = Ulid::new();
        let lane = lane_with(&[(600 * M, long, BookingStatus::Confirmed)]);
        let durations = |id: &Ulid| if *id == long { 180 } else { 30 };

        // Existing booking runs 10:00-13:00, so 12:00 collides.
        assert!(find_conflict(&lane, &Span::from_minutes(720 * M, 30), durations).is_some());
        assert!(find_conflict(&lane, &Span::from_minutes(780 * M, 30), durations).is_none());
    }

    #[test]
    fn terminal_bookings_do_not_block() {
        let svc = Ulid::new();
        let lane = lane_with(&[
            (600 * M, svc, BookingStatus::Cancelled),
            (600 * M, svc, BookingStatus::Completed),
        ]);
        assert!(find_conflict(&lane, &Span::from_minutes(600 * M, 60), |_| 60).is_none());
    }

    #[test]
    fn candidate_spanning_several_bookings() {
        let svc = Ulid::new();
        let lane = lane_with(&[
            (0, svc, BookingStatus::Pending),
            (120 * M, svc, BookingStatus::Pending),
        ]);
        // 01:00-02:00 sits exactly in the gap
        assert!(find_conflict(&lane, &Span::from_minutes(60 * M, 60), |_| 60).is_none());
        // 00:30-02:30 covers both
        assert!(find_conflict(&lane, &Span::from_minutes(30 * M, 120), |_| 60).is_some());
    }

    #[test]
    fn overlap_sweep_under_new_durations() {
        let svc = Ulid::new();
        let other = Ulid::new();
        let lane = lane_with(&[
            (0, svc, BookingStatus::Pending),
            (60 * M, other, BookingStatus::Confirmed),
            (240 * M, svc, BookingStatus::Pending),
            (270 * M, svc, BookingStatus::Cancelled),
        ]);

        // The cancelled booking at 04:30 sits inside 04:00-05:00 but never counts.
        assert!(find_overlap(&lane, |_| 60).is_none());

        let stretched = |id: &Ulid| if *id == svc { 90 } else { 60 };
        let (a, b) = find_overlap(&lane, stretched).unwrap();
        assert_eq!(lane.active()[0].id, a);
        assert_eq!(lane.active()[1].id, b);

        // 01:00-04:00 touches 04:00 only.
        assert!(find_overlap(&lane, |id: &Ulid| if *id == other { 180 } else { 60 }).is_none());
        assert!(find_overlap(&lane, |id: &Ulid| if *id == other { 181 } else { 60 }).is_some());
    }

    #[test]
    fn empty_lane_never_conflicts() {
        let lane = ProviderLane::new(Ulid::nil());
        assert!(find_conflict(&lane, &Span::from_minutes(0, 60), |_| 60).is_none());
    }
}
