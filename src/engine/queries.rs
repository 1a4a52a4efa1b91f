use ulid::Ulid;

use crate::model::*;

use super::availability::build_availability;
use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// `[now, now + policy.window)`, minute-aligned.
    pub fn default_window(&self, now: Ms) -> Span {
        let start = truncate_to_minute(now);
        Span::new(start, start + self.policy.window)
    }

    pub async fn get_room(&self, id: Ulid) -> Option<RoomInfo> {
        let rs = self.store.get_room(&id)?;
        let guard = rs.read().await;
        Some(guard.info())
    }

    /// All rooms, ordered by name.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms = Vec::with_capacity(self.store.room_count());
        for rs in self.store.rooms() {
            rooms.push(rs.read().await.info());
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    /// Reservations of one room intersecting `window`, sorted by end.
    pub async fn reservations_for_room(
        &self,
        room_id: Ulid,
        window: &Span,
    ) -> Result<Vec<Reservation>, EngineError> {
        validate_window(window)?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.intersecting(window).cloned().collect())
    }

    pub async fn room_availability(
        &self,
        room_id: Ulid,
        window: &Span,
    ) -> Result<Vec<AvailabilitySlot>, EngineError> {
        let reservations = self.reservations_for_room(room_id, window).await?;
        build_availability(window, &reservations)
    }

    /// Every room with its timeline over the default window starting at `now`.
    pub async fn rooms_with_availability(
        &self,
        now: Ms,
    ) -> Result<Vec<RoomAvailability>, EngineError> {
        self.rooms_availability_in(&self.default_window(now)).await
    }

    pub async fn rooms_availability_in(
        &self,
        window: &Span,
    ) -> Result<Vec<RoomAvailability>, EngineError> {
        validate_window(window)?;
        let mut result = Vec::with_capacity(self.store.room_count());
        for rs in self.store.rooms() {
            let (room, reservations) = {
                let guard = rs.read().await;
                let reservations: Vec<Reservation> = guard.intersecting(window).cloned().collect();
                (guard.info(), reservations)
            };
            let availability = build_availability(window, &reservations)?;
            result.push(RoomAvailability { room, availability });
        }
        result.sort_by(|a, b| a.room.name.cmp(&b.room.name).then(a.room.id.cmp(&b.room.id)));
        Ok(result)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let room_id = self.store.get_room_for_reservation(&id)?;
        let rs = self.store.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.get_reservation(id).cloned()
    }

    /// Reservations of one user that have not ended yet, sorted by start.
    pub async fn user_reservations(&self, user_id: &str, now: Ms) -> Vec<Reservation> {
        let mut result = Vec::new();
        for rs in self.store.rooms() {
            let guard = rs.read().await;
            result.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.span.end > now && r.user_id.as_deref() == Some(user_id))
                    .cloned(),
            );
        }
        result.sort_by_key(|r| (r.span.start, r.id));
        result
    }

    pub async fn room_status(&self, room_id: Ulid, now: Ms) -> Result<RoomStatus, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;

        if let Some(running) = guard.reservations.iter().find(|r| r.span.contains_instant(now)) {
            return Ok(RoomStatus::Occupied { until: running.span.end });
        }
        let next_start = guard
            .reservations
            .iter()
            .map(|r| r.span.start)
            .filter(|&start| start > now)
            .min();
        Ok(RoomStatus::Free { next_start })
    }

    /// `(reservation_id, room_id)` for every reservation that ended at or before `cutoff`.
    pub async fn collect_ended_reservations(&self, cutoff: Ms) -> Vec<(Ulid, Ulid)> {
        let mut ended = Vec::new();
        for rs in self.store.rooms() {
            let guard = rs.read().await;
            // Sorted by end: stop at the first one still relevant.
            ended.extend(
                guard
                    .reservations
                    .iter()
                    .take_while(|r| r.span.end <= cutoff)
                    .map(|r| (r.id, r.room_id)),
            );
        }
        ended
    }
}
