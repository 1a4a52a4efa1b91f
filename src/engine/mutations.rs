use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::record_rejection;

use super::conflict::{check_duration, check_no_overlap, validate_span};
use super::{Engine, EngineError};

fn check_room_fields(name: &str, image: Option<&str>) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if image.is_some_and(|i| i.len() > MAX_IMAGE_URL_LEN) {
        return Err(EngineError::LimitExceeded("image url too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        image: Option<String>,
    ) -> Result<(), EngineError> {
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        check_room_fields(&name, image.as_deref())?;
        if self.store.contains_room(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated { id, name: name.clone(), image: image.clone() };
        let rs = RoomState::new(id, name, image);
        if !self.store.try_insert_room(id, Arc::new(RwLock::new(rs))) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        name: String,
        image: Option<String>,
    ) -> Result<(), EngineError> {
        check_room_fields(&name, image.as_deref())?;
        let rs = self.store.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::RoomUpdated { id, name, image };
        self.commit(id, &mut guard, &event);
        Ok(())
    }

    /// Only rooms without reservations can be deleted.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.store.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if !guard.reservations.is_empty() {
            return Err(EngineError::RoomHasReservations(id));
        }
        // Removed while still locked so no writer can slip a reservation in.
        if self.store.remove_room(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        drop(guard);

        self.notify.send(id, &Event::RoomDeleted { id });
        self.notify.remove(&id);
        Ok(())
    }

    /// Book `span` on a room. The span is stored minute-truncated.
    ///
    /// Existing reservations are read and validated under the room's write lock,
    /// the same critical section that performs the insert.
    pub async fn make_reservation(
        &self,
        id: Ulid,
        room_id: Ulid,
        user_id: Option<String>,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        validate_span(&span)?;
        if user_id.as_ref().is_some_and(|u| u.len() > MAX_USER_ID_LEN) {
            return Err(EngineError::LimitExceeded("user id too long"));
        }
        check_duration(&span, self.policy.max_duration).inspect_err(record_rejection)?;
        if self.store.contains_reservation(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if !self.store.contains_room(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        let span = span.truncated();
        check_no_overlap(&span, guard.intersecting(&span), None).inspect_err(record_rejection)?;
        if !self.store.claim_reservation(id, room_id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ReservationMade { id, room_id, user_id: user_id.clone(), span };
        self.commit(room_id, &mut guard, &event);
        debug!("reservation {id} on room {room_id}: [{}, {})", span.start, span.end);
        Ok(Reservation { id, room_id, user_id, span })
    }

    /// Change the time of a reservation and optionally move it to another room.
    /// The reservation being edited never conflicts with itself.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        room_id: Option<Ulid>,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        validate_span(&span)?;
        check_duration(&span, self.policy.max_duration).inspect_err(record_rejection)?;
        let span = span.truncated();

        let current_room = self
            .store
            .get_room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        match room_id {
            Some(target) if target != current_room => {
                self.move_reservation(id, current_room, target, span).await
            }
            _ => {
                let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
                check_no_overlap(&span, guard.intersecting(&span), Some(id))
                    .inspect_err(record_rejection)?;

                let event = Event::ReservationUpdated { id, room_id, span };
                self.commit(room_id, &mut guard, &event);
                guard
                    .get_reservation(id)
                    .cloned()
                    .ok_or(EngineError::NotFound(id))
            }
        }
    }

    async fn move_reservation(
        &self,
        id: Ulid,
        from_id: Ulid,
        to_id: Ulid,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        let from = self
            .store
            .get_room(&from_id)
            .ok_or(EngineError::NotFound(from_id))?;
        let to = self
            .store
            .get_room(&to_id)
            .ok_or(EngineError::NotFound(to_id))?;

        // Acquire write locks in id order to prevent deadlocks.
        let (mut from_guard, mut to_guard) = if from_id < to_id {
            let f = from.write_owned().await;
            let t = to.write_owned().await;
            (f, t)
        } else {
            let t = to.write_owned().await;
            let f = from.write_owned().await;
            (f, t)
        };

        if from_guard.get_reservation(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if !self.store.contains_room(&to_id) {
            return Err(EngineError::NotFound(to_id));
        }
        if to_guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        check_no_overlap(&span, to_guard.intersecting(&span), None).inspect_err(record_rejection)?;

        let moved = self
            .store
            .move_reservation(&mut from_guard, &mut to_guard, id, span)
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationUpdated { id, room_id: to_id, span };
        self.notify.send(from_id, &event);
        self.notify.send(to_id, &event);
        debug!("reservation {id} moved from room {from_id} to {to_id}");
        Ok(moved)
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let reservation = guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::ReservationCancelled { id, room_id };
        self.commit(room_id, &mut guard, &event);
        Ok(reservation)
    }

    /// Book the room from `now` for up to the quick duration, stopping one
    /// minute short of the next reservation so the two do not touch.
    pub async fn quick_reserve(
        &self,
        id: Ulid,
        room_id: Ulid,
        user_id: Option<String>,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        if user_id.as_ref().is_some_and(|u| u.len() > MAX_USER_ID_LEN) {
            return Err(EngineError::LimitExceeded("user id too long"));
        }
        if self.store.contains_reservation(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let start = truncate_to_minute(now);

        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if !self.store.contains_room(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        if let Some(running) = guard.reservations.iter().find(|r| r.span.contains_instant(start)) {
            let err = EngineError::RoomOccupied { until: running.span.end };
            record_rejection(&err);
            return Err(err);
        }
        let next = guard
            .reservations
            .iter()
            .filter(|r| r.span.start >= start)
            .min_by_key(|r| r.span.start);

        let left = match next {
            Some(r) => self.policy.quick_duration.min(truncate_to_minute(r.span.start - start)),
            None => self.policy.quick_duration,
        };
        let end = start + left - MINUTE;
        if end <= start {
            let err = EngineError::RoomOccupied { until: next.map_or(start, |r| r.span.end) };
            record_rejection(&err);
            return Err(err);
        }

        let span = Span::new(start, end);
        validate_span(&span)?;
        check_duration(&span, self.policy.max_duration).inspect_err(record_rejection)?;
        check_no_overlap(&span, guard.intersecting(&span), None).inspect_err(record_rejection)?;
        if !self.store.claim_reservation(id, room_id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ReservationMade { id, room_id, user_id: user_id.clone(), span };
        self.commit(room_id, &mut guard, &event);
        debug!("quick reservation {id} on room {room_id} until {end}");
        Ok(Reservation { id, room_id, user_id, span })
    }

    /// Drop a finished reservation. Used by the reaper.
    pub async fn prune_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let event = Event::ReservationPruned { id, room_id };
        self.commit(room_id, &mut guard, &event);
        Ok(room_id)
    }
}
