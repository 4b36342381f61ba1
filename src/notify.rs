use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Booking, BookingStatus};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Requested,
    StatusChanged { from: BookingStatus },
}

/// A booking change, as seen by one of its parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingNotice {
    pub kind: NoticeKind,
    pub booking: Booking,
}

impl BookingNotice {
    pub fn label(&self) -> &'static str {
        match self.kind {
            NoticeKind::Requested => "booking.requested",
            NoticeKind::StatusChanged { .. } => "booking.status_changed",
        }
    }
}

/// Broadcast hub keyed by user id. Requester and provider of a booking
/// both hear about every change to it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingNotice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's notices. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<BookingNotice> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver to both parties. No-op for users nobody is listening for.
    pub fn publish(&self, notice: BookingNotice) {
        let parties = [notice.booking.requester_id, notice.booking.provider_id];
        for user_id in parties {
            let Some(sender) = self.channels.get(&user_id) else { continue };
            if sender.send(notice.clone()).is_err() {
                // Last receiver went away.
                drop(sender);
                self.channels.remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
            }
        }
    }

    pub fn listeners(&self) -> usize {
        self.channels.iter().map(|c| c.receiver_count()).sum()
    }
}
