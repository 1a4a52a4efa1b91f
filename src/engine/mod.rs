mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::build_availability;
pub use conflict::{is_valid, now_ms};
pub use error::EngineError;
pub use store::InMemoryStore;

use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Business rules applied around the interval core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// Longest reservation accepted.
    pub max_duration: Ms,
    /// Length of the default availability window, starting now.
    pub window: Ms,
    /// Upper bound for a "reserve now" booking.
    pub quick_duration: Ms,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            max_duration: 120 * MINUTE,
            window: 12 * HOUR,
            quick_duration: 30 * MINUTE,
        }
    }
}

/// The reservation service: rooms, their reservations, and the guards that
/// keep a room from being double-booked.
pub struct Engine {
    store: InMemoryStore,
    pub policy: ReservationPolicy,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(policy: ReservationPolicy, notify: Arc<NotifyHub>) -> Self {
        Self {
            store: InMemoryStore::new(),
            policy,
            notify,
        }
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.store.get_room(id)
    }

    pub fn get_room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.store.get_room_for_reservation(reservation_id)
    }

    pub fn room_count(&self) -> usize {
        self.store.room_count()
    }

    /// Apply + notify in one call.
    pub(super) fn commit(&self, room_id: Ulid, rs: &mut RoomState, event: &Event) {
        self.store.apply_event(rs, event);
        self.notify.send(room_id, event);
    }

    /// Lookup reservation → room, get room, acquire write lock.
    /// Re-resolves if the reservation moved rooms while we waited for the lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        loop {
            let room_id = self
                .get_room_for_reservation(reservation_id)
                .ok_or(EngineError::NotFound(*reservation_id))?;
            let rs = self
                .get_room_state(&room_id)
                .ok_or(EngineError::NotFound(room_id))?;
            let guard = rs.write_owned().await;
            if guard.get_reservation(*reservation_id).is_some() {
                return Ok((room_id, guard));
            }
        }
    }
}
