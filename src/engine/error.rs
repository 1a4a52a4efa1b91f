use ulid::Ulid;

use crate::model::{Ms, Span};

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Query window with `start >= end`.
    InvalidWindow(Span),
    /// Reservation or candidate interval with `start >= end`.
    InvalidInterval(Span),
    /// Candidate touches or overlaps the given reservation.
    OverlapConflict(Ulid),
    DurationExceeded { duration: Ms, max: Ms },
    /// Nothing can be booked right now; the room is taken until `until`.
    RoomOccupied { until: Ms },
    RoomHasReservations(Ulid),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidWindow(w) => {
                write!(f, "invalid window [{}, {}): start must be before end", w.start, w.end)
            }
            EngineError::InvalidInterval(s) => {
                write!(f, "invalid interval [{}, {}): start must be before end", s.start, s.end)
            }
            EngineError::OverlapConflict(id) => {
                write!(f, "reservation overlaps an existing one: {id}")
            }
            EngineError::DurationExceeded { duration, max } => write!(
                f,
                "reservation lasts {} minutes, maximum is {} minutes",
                duration / 60_000,
                max / 60_000
            ),
            EngineError::RoomOccupied { until } => write!(f, "room is occupied until {until}"),
            EngineError::RoomHasReservations(id) => {
                write!(f, "cannot delete room {id}: has reservations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
