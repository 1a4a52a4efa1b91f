use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Turn a room's reservations into a gap-free timeline of available and
/// unavailable slots covering exactly `window`.
///
/// Reservations are expected to be non-overlapping and sorted by end; an
/// unsorted list is sorted locally first. Overlapping input is not merged.
/// Adjacent unavailable slots stay separate, one per reservation.
///
/// Reservations covering no part of the window (including ones that only
/// touch a boundary) are skipped, and an unavailable slot running past
/// `window.end` is clipped to it, so the output always partitions the window.
pub fn build_availability(
    window: &Span,
    reservations: &[Reservation],
) -> Result<Vec<AvailabilitySlot>, EngineError> {
    if !window.is_ordered() {
        return Err(EngineError::InvalidWindow(*window));
    }

    let mut spans: Vec<Span> = Vec::with_capacity(reservations.len());
    for r in reservations {
        if !r.span.is_ordered() {
            return Err(EngineError::InvalidInterval(r.span));
        }
        if r.span.end <= window.start || r.span.start >= window.end {
            continue;
        }
        spans.push(r.span);
    }
    if !spans.is_sorted_by_key(|s| s.end) {
        spans.sort_by_key(|s| s.end);
    }

    if spans.is_empty() {
        return Ok(vec![slot(*window, true)]);
    }

    let mut slots = Vec::with_capacity(spans.len() * 2 + 1);
    let mut cursor = window.start;
    let mut rest = spans.as_slice();

    // A reservation already running when the window opens.
    if let Some((first, tail)) = spans.split_first()
        && first.start < window.start
        && window.start < first.end
    {
        slots.push(slot(Span::new(window.start, first.end.min(window.end)), false));
        cursor = first.end;
        rest = tail;
    }

    for span in rest {
        if span.start > cursor {
            slots.push(slot(Span::new(cursor, span.start), true));
        }
        slots.push(slot(Span::new(span.start, span.end.min(window.end)), false));
        cursor = span.end;
    }

    if cursor < window.end {
        slots.push(slot(Span::new(cursor, window.end), true));
    }

    Ok(slots)
}

fn slot(span: Span, available: bool) -> AvailabilitySlot {
    AvailabilitySlot {
        id: Ulid::new(),
        span,
        available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR;
    const M: Ms = MINUTE;

    fn res(start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::nil(),
            user_id: None,
            span: Span::new(start, end),
        }
    }

    fn shape(slots: &[AvailabilitySlot]) -> Vec<(Ms, Ms, bool)> {
        slots
            .iter()
            .map(|s| (s.span.start, s.span.end, s.available))
            .collect()
    }

    fn assert_partitions(window: &Span, slots: &[AvailabilitySlot]) {
        assert!(!slots.is_empty());
        assert_eq!(slots[0].span.start, window.start);
        assert_eq!(slots[slots.len() - 1].span.end, window.end);
        for pair in slots.windows(2) {
            assert_eq!(pair[0].span.end, pair[1].span.start, "gap or overlap in {slots:?}");
        }
        for s in slots {
            assert!(s.span.start < s.span.end, "empty slot in {slots:?}");
        }
    }

    #[test]
    fn empty_input_is_one_available_slot() {
        let window = Span::new(9 * H, 21 * H);
        let slots = build_availability(&window, &[]).unwrap();
        assert_eq!(shape(&slots), vec![(9 * H, 21 * H, true)]);
    }

    #[test]
    fn back_to_back_reservations_not_merged() {
        let window = Span::new(9 * H, 21 * H);
        let slots = build_availability(&window, &[res(10 * H, 11 * H), res(11 * H, 12 * H)]).unwrap();
        assert_eq!(
            shape(&slots),
            vec![
                (9 * H, 10 * H, true),
                (10 * H, 11 * H, false),
                (11 * H, 12 * H, false),
                (12 * H, 21 * H, true),
            ]
        );
    }

    #[test]
    fn first_reservation_straddles_window_start() {
        let window = Span::new(10 * H, 22 * H);
        let slots = build_availability(&window, &[res(9 * H + 30 * M, 10 * H + 30 * M)]).unwrap();
        assert_eq!(
            shape(&slots),
            vec![(10 * H, 10 * H + 30 * M, false), (10 * H + 30 * M, 22 * H, true)]
        );
    }

    #[test]
    fn straddle_then_gap_then_reservation() {
        let window = Span::new(10 * H, 22 * H);
        let slots = build_availability(
            &window,
            &[res(9 * H, 10 * H + 30 * M), res(14 * H, 15 * H)],
        )
        .unwrap();
        assert_eq!(
            shape(&slots),
            vec![
                (10 * H, 10 * H + 30 * M, false),
                (10 * H + 30 * M, 14 * H, true),
                (14 * H, 15 * H, false),
                (15 * H, 22 * H, true),
            ]
        );
    }

    #[test]
    fn reservation_at_window_start_has_no_leading_gap() {
        let window = Span::new(9 * H, 21 * H);
        let slots = build_availability(&window, &[res(9 * H, 10 * H)]).unwrap();
        assert_eq!(shape(&slots), vec![(9 * H, 10 * H, false), (10 * H, 21 * H, true)]);
    }

    #[test]
    fn reservation_filling_window_end_has_no_trailing_gap() {
        let window = Span::new(9 * H, 21 * H);
        let slots = build_availability(&window, &[res(20 * H, 21 * H)]).unwrap();
        assert_eq!(shape(&slots), vec![(9 * H, 20 * H, true), (20 * H, 21 * H, false)]);
    }

    #[test]
    fn reservation_past_window_end_is_clipped() {
        let window = Span::new(9 * H, 21 * H);
        let slots = build_availability(&window, &[res(20 * H, 22 * H)]).unwrap();
        assert_eq!(shape(&slots), vec![(9 * H, 20 * H, true), (20 * H, 21 * H, false)]);
    }

    #[test]
    fn reservation_covering_whole_window() {
        let window = Span::new(10 * H, 12 * H);
        let slots = build_availability(&window, &[res(9 * H, 13 * H)]).unwrap();
        assert_eq!(shape(&slots), vec![(10 * H, 12 * H, false)]);
    }

    #[test]
    fn boundary_touching_reservations_skipped() {
        let window = Span::new(10 * H, 12 * H);
        let slots = build_availability(&window, &[res(9 * H, 10 * H), res(12 * H, 13 * H)]).unwrap();
        assert_eq!(shape(&slots), vec![(10 * H, 12 * H, true)]);
    }

    #[test]
    fn unsorted_input_is_sorted_by_end() {
        let window = Span::new(9 * H, 21 * H);
        let slots = build_availability(&window, &[res(15 * H, 16 * H), res(10 * H, 11 * H)]).unwrap();
        assert_eq!(
            shape(&slots),
            vec![
                (9 * H, 10 * H, true),
                (10 * H, 11 * H, false),
                (11 * H, 15 * H, true),
                (15 * H, 16 * H, false),
                (16 * H, 21 * H, true),
            ]
        );
    }

    #[test]
    fn invalid_window_rejected() {
        let window = Span { start: 10 * H, end: 10 * H };
        assert_eq!(
            build_availability(&window, &[]),
            Err(EngineError::InvalidWindow(window))
        );
    }

    #[test]
    fn malformed_reservation_rejected() {
        let window = Span::new(9 * H, 21 * H);
        let bad = Reservation {
            id: Ulid::new(),
            room_id: Ulid::nil(),
            user_id: None,
            span: Span { start: 11 * H, end: 10 * H },
        };
        assert_eq!(
            build_availability(&window, &[bad]),
            Err(EngineError::InvalidInterval(Span { start: 11 * H, end: 10 * H }))
        );
    }

    #[test]
    fn slot_ids_fresh_per_call() {
        let window = Span::new(9 * H, 21 * H);
        let input = [res(10 * H, 11 * H)];
        let a = build_availability(&window, &input).unwrap();
        let b = build_availability(&window, &input).unwrap();
        assert_eq!(shape(&a), shape(&b));
        assert!(a.iter().zip(&b).all(|(x, y)| x.id != y.id));
    }

    #[test]
    fn partitions_window_for_many_layouts() {
        // Deterministic pseudo-random layouts of non-overlapping reservations.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = |bound: i64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % bound as u64) as i64
        };

        for _ in 0..500 {
            let window = Span::new(next(4) * H, 12 * H + next(4) * H);
            let mut cursor = next(3) * H;
            let mut input = Vec::new();
            for _ in 0..next(8) {
                let start = cursor + next(4) * 15 * M;
                let end = start + (1 + next(8)) * 15 * M;
                input.push(res(start, end));
                cursor = end;
            }
            let slots = build_availability(&window, &input).unwrap();
            assert_partitions(&window, &slots);
        }
    }
}
