use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::SharedRoomState;

/// Rooms and the reservation → room index. Each room sits behind its own lock,
/// the maps themselves are sharded.
pub struct InMemoryStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    reservation_to_room: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Insert a room unless the id is taken. Returns false if it was.
    pub fn try_insert_room(&self, id: Ulid, state: SharedRoomState) -> bool {
        match self.rooms.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(state);
                true
            }
        }
    }

    pub fn remove_room(&self, id: &Ulid) -> Option<(Ulid, SharedRoomState)> {
        self.rooms.remove(id)
    }

    /// Snapshot of all room handles. Never hold a map guard across an await.
    pub fn rooms(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    // ── Reservation index ────────────────────────────────────

    pub fn get_room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room.get(reservation_id).map(|e| *e.value())
    }

    pub fn contains_reservation(&self, reservation_id: &Ulid) -> bool {
        self.reservation_to_room.contains_key(reservation_id)
    }

    /// Reserve an id in the index for `room_id`. Returns false if any room
    /// already holds it. Call with the room write-locked, right before commit.
    pub fn claim_reservation(&self, reservation_id: Ulid, room_id: Ulid) -> bool {
        match self.reservation_to_room.entry(reservation_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(room_id);
                true
            }
        }
    }

    /// Move a reservation between two rooms the caller has write-locked.
    pub fn move_reservation(
        &self,
        from: &mut RoomState,
        to: &mut RoomState,
        id: Ulid,
        span: Span,
    ) -> Option<Reservation> {
        let mut r = from.remove_reservation(id)?;
        r.room_id = to.id;
        r.span = span;
        to.insert_reservation(r.clone());
        self.reservation_to_room.insert(id, to.id);
        Some(r)
    }

    // ── Event application ────────────────────────────────────

    /// Apply a reservation event to a room the caller has write-locked.
    pub fn apply_event(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::ReservationMade {
                id,
                room_id,
                user_id,
                span,
            } => {
                rs.insert_reservation(Reservation {
                    id: *id,
                    room_id: *room_id,
                    user_id: user_id.clone(),
                    span: *span,
                });
                self.reservation_to_room.insert(*id, *room_id);
            }
            Event::ReservationUpdated { id, room_id, span } => {
                // Same-room edit; moves between rooms go through `move_reservation`.
                if let Some(mut r) = rs.remove_reservation(*id) {
                    r.span = *span;
                    rs.insert_reservation(r);
                }
                self.reservation_to_room.insert(*id, *room_id);
            }
            Event::ReservationCancelled { id, .. } | Event::ReservationPruned { id, .. } => {
                rs.remove_reservation(*id);
                self.reservation_to_room.remove(id);
            }
            Event::RoomUpdated { name, image, .. } => {
                rs.name = name.clone();
                rs.image = image.clone();
            }
            // RoomCreated/Deleted are handled at the map level, not here
            Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
        }
    }
}
