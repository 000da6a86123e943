use ulid::Ulid;

use crate::config::BusinessHours;
use crate::model::*;

// ── Extension slot search ─────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted, disjoint) from `base` (sorted, disjoint).
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

/// Sorted, merged windows of the active reservations in `space_id`, leaving out `exclude`.
pub fn booked_spans(day: &[Reservation], space_id: Ulid, exclude: Ulid) -> Vec<Span> {
    let mut spans: Vec<Span> = day
        .iter()
        .filter(|r| r.is_active && r.space_id == space_id && r.id != exclude)
        .filter_map(Reservation::span)
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// The bounded window an extension of `reservation` may fall into:
/// from its current end (never before opening) to closing time or the
/// lookahead cap, whichever comes first. None when nothing is left of the day.
pub fn search_window(reservation: &Reservation, hours: &BusinessHours) -> Option<Span> {
    let start = reservation.end_time.max(hours.open).as_ms();
    let mut end = hours.close.as_ms();
    if let Some(lookahead) = hours.max_lookahead_ms {
        end = end.min(reservation.end_time.as_ms() + lookahead);
    }
    (start < end).then(|| Span::new(start, end))
}

/// Positive gaps of `window` not covered by `booked`, in ascending order.
pub fn free_slots(window: Span, booked: &[Span], min_slot_ms: Ms) -> Vec<ExtensionSlot> {
    subtract_intervals(&[window], booked)
        .into_iter()
        .filter(|gap| gap.duration_ms() > 0 && gap.duration_ms() >= min_slot_ms)
        .filter_map(ExtensionSlot::from_span)
        .collect()
}

/// Extension candidates for `reservation`.
///
/// `day` holds the reservations of every space on the reservation's date;
/// `spaces` is the catalog to consider for alternatives. The result is
/// advisory and is re-validated at commit time.
pub fn find_extension_options(
    reservation: &Reservation,
    day: &[Reservation],
    spaces: &[Space],
    hours: &BusinessHours,
) -> ExtensionOptions {
    let mut options = ExtensionOptions {
        reservation_id: reservation.id,
        date: reservation.date,
        same_space: Vec::new(),
        other_spaces: Vec::new(),
    };
    let Some(window) = search_window(reservation, hours) else {
        return options;
    };

    let own = booked_spans(day, reservation.space_id, reservation.id);
    options.same_space = free_slots(window, &own, hours.min_slot_ms);

    for space in spaces {
        if space.id == reservation.space_id || space.capacity < reservation.attendees {
            continue;
        }
        let booked = booked_spans(day, space.id, reservation.id);
        let slots = free_slots(window, &booked, hours.min_slot_ms);
        if !slots.is_empty() {
            options.other_spaces.push(SpaceExtensionOption {
                space_id: space.id,
                space_name: space.name.clone(),
                capacity: space.capacity,
                slots,
            });
        }
    }

    // Closest capacity match first, then soonest start, then id.
    let attendees = reservation.attendees;
    options.other_spaces.sort_by_key(|o| {
        (
            o.capacity - attendees,
            o.slots.first().map(|s| s.start),
            o.space_id,
        )
    });
    options
}
