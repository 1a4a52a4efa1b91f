use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Overlap validator: true when `candidate` can be booked next to `existing`.
///
/// Every boundary is truncated to the minute before comparing, and the test is
/// closed on both ends: a candidate that merely touches a reservation
/// (`candidate.start == r.end`) is rejected.
pub fn is_valid(candidate: &Span, existing: &[Reservation]) -> bool {
    first_conflict(candidate, existing.iter()).is_none()
}

fn first_conflict<'a>(
    candidate: &Span,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Option<&'a Reservation> {
    let candidate = candidate.truncated();
    existing
        .into_iter()
        .find(|r| r.span.truncated().touches(&candidate))
}

/// Same rule as [`is_valid`], reporting the conflicting reservation.
/// `ignore` skips the reservation being edited.
pub(crate) fn check_no_overlap<'a>(
    candidate: &Span,
    existing: impl IntoIterator<Item = &'a Reservation>,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    let others = existing
        .into_iter()
        .filter(|r| Some(r.id) != ignore);
    match first_conflict(candidate, others) {
        Some(r) => Err(EngineError::OverlapConflict(r.id)),
        None => Ok(()),
    }
}

/// Business-rule guard run before the overlap validator.
pub(crate) fn check_duration(candidate: &Span, max: Ms) -> Result<(), EngineError> {
    let duration = candidate.truncated().duration_ms();
    if duration > max {
        return Err(EngineError::DurationExceeded { duration, max });
    }
    Ok(())
}

fn in_range(span: &Span) -> bool {
    span.start >= MIN_VALID_TIMESTAMP_MS && span.end <= MAX_VALID_TIMESTAMP_MS
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_ordered() {
        return Err(EngineError::InvalidInterval(*span));
    }
    // Range first: every arithmetic step below assumes sane bounds.
    if !in_range(span) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if !span.truncated().is_ordered() {
        return Err(EngineError::InvalidInterval(*span));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if !window.is_ordered() {
        return Err(EngineError::InvalidWindow(*window));
    }
    if !in_range(window) {
        return Err(EngineError::LimitExceeded("query window out of range"));
    }
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}
