use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 60 * MINUTE;

/// Drop the seconds and sub-second part of an instant.
pub fn truncate_to_minute(t: Ms) -> Ms {
    t.saturating_sub(t.rem_euclid(MINUTE))
}

/// Half-open interval `[start, end)`. Used both for reservation times and
/// for query windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    pub fn is_ordered(&self) -> bool {
        self.start < self.end
    }

    /// Minute-normalized copy. The receiver is left untouched.
    pub fn truncated(&self) -> Span {
        Span {
            start: truncate_to_minute(self.start),
            end: truncate_to_minute(self.end),
        }
    }

    /// Closed-interval test: spans that share only a boundary instant
    /// still count as touching.
    pub fn touches(&self, other: &Span) -> bool {
        self.start.max(other.start) <= self.end.min(other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A booked time range on a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub span: Span,
}

/// One labeled piece of an availability timeline. Regenerated on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    #[serde(flatten)]
    pub span: Span,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub image: Option<String>,
    /// All reservations on this room, sorted by `span.end`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, image: Option<String>) -> Self {
        Self {
            id,
            name,
            image,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.end.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.end <= reservation.span.end);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations with `end >= window.start && start <= window.end`, in end order.
    /// Boundary-touching reservations are included.
    pub fn intersecting(&self, window: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything before left_bound ended before the window opened.
        let left_bound = self
            .reservations
            .partition_point(|r| r.span.end < window.start);
        self.reservations[left_bound..]
            .iter()
            .filter(move |r| r.span.start <= window.end)
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.name.clone(),
            image: self.image.clone(),
        }
    }
}

/// Change records broadcast to room listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        image: Option<String>,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        image: Option<String>,
    },
    RoomDeleted {
        id: Ulid,
    },
    ReservationMade {
        id: Ulid,
        room_id: Ulid,
        user_id: Option<String>,
        span: Span,
    },
    ReservationUpdated {
        id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    ReservationPruned {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub image: Option<String>,
}

/// A room together with its availability timeline over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAvailability {
    #[serde(flatten)]
    pub room: RoomInfo,
    pub availability: Vec<AvailabilitySlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoomStatus {
    /// Nobody holds the room right now. `next_start` is the start of the next reservation, if any.
    Free { next_start: Option<Ms> },
    /// A reservation is running and ends at `until`.
    Occupied { until: Ms },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::nil(),
            user_id: None,
            span: Span::new(start, end),
        }
    }

    #[test]
    fn truncate_drops_seconds() {
        assert_eq!(truncate_to_minute(10 * HOUR + 59_999), 10 * HOUR);
        assert_eq!(truncate_to_minute(10 * HOUR), 10 * HOUR);
        assert_eq!(truncate_to_minute(-1), -MINUTE);
        assert_eq!(truncate_to_minute(i64::MIN), i64::MIN);
        assert_eq!(truncate_to_minute(-i64::MAX), i64::MIN);
    }

    #[test]
    fn duration_saturates() {
        let s = Span { start: -i64::MAX, end: i64::MAX };
        assert_eq!(s.duration_ms(), i64::MAX);
    }

    #[test]
    fn truncated_returns_new_span() {
        let s = Span::new(10 * HOUR + 500, 11 * HOUR + 30_000);
        let t = s.truncated();
        assert_eq!(t, Span::new(10 * HOUR, 11 * HOUR));
        assert_eq!(s.start, 10 * HOUR + 500); // input untouched
    }

    #[test]
    fn span_touches_counts_shared_boundary() {
        let a = Span::new(100, 200);
        assert!(a.touches(&Span::new(200, 300)));
        assert!(a.touches(&Span::new(150, 250)));
        assert!(!a.touches(&Span::new(201, 300)));
    }

    #[test]
    fn span_contains_instant_half_open() {
        let s = Span::new(100, 200);
        assert!(s.contains_instant(100));
        assert!(!s.contains_instant(200));
    }

    #[test]
    fn reservations_kept_sorted_by_end() {
        let mut rs = RoomState::new(Ulid::new(), "Sala 1".into(), None);
        rs.insert_reservation(reservation(300, 400));
        rs.insert_reservation(reservation(100, 200));
        rs.insert_reservation(reservation(200, 300));
        let ends: Vec<Ms> = rs.reservations.iter().map(|r| r.span.end).collect();
        assert_eq!(ends, vec![200, 300, 400]);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut rs = RoomState::new(Ulid::new(), "Sala 1".into(), None);
        let rs_list: Vec<Reservation> = (0..3).map(|i| reservation(i * 100, i * 100 + 50)).collect();
        for r in &rs_list {
            rs.insert_reservation(r.clone());
        }
        assert_eq!(rs.remove_reservation(rs_list[1].id), Some(rs_list[1].clone()));
        assert_eq!(rs.reservations.len(), 2);
        assert_eq!(rs.reservations[0].id, rs_list[0].id);
        assert_eq!(rs.reservations[1].id, rs_list[2].id);
        assert!(rs.remove_reservation(Ulid::new()).is_none());
    }

    #[test]
    fn intersecting_includes_boundary_touch() {
        let mut rs = RoomState::new(Ulid::new(), "Sala 1".into(), None);
        rs.insert_reservation(reservation(0, 100)); // ends before window
        rs.insert_reservation(reservation(100, 200)); // ends exactly at window start
        rs.insert_reservation(reservation(450, 600));
        rs.insert_reservation(reservation(800, 900)); // starts exactly at window end
        rs.insert_reservation(reservation(1000, 1100)); // after window

        let window = Span::new(200, 800);
        let hits: Vec<Span> = rs.intersecting(&window).map(|r| r.span).collect();
        assert_eq!(
            hits,
            vec![Span::new(100, 200), Span::new(450, 600), Span::new(800, 900)]
        );
    }

    #[test]
    fn intersecting_empty_room() {
        let rs = RoomState::new(Ulid::new(), "Sala 1".into(), None);
        assert_eq!(rs.intersecting(&Span::new(0, 1000)).count(), 0);
    }

    #[test]
    fn reservation_json_flattens_span() {
        let r = reservation(1000, 2000);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["start"], 1000);
        assert_eq!(v["end"], 2000);
        let back: Reservation = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn event_json_is_tagged() {
        let id = Ulid::new();
        let v = serde_json::to_value(Event::RoomDeleted { id }).unwrap();
        assert_eq!(v["event"], "room_deleted");
        assert_eq!(v["id"], id.to_string());
    }
}
