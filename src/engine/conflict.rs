use ulid::Ulid;

use crate::clock;
use crate::config::EngineConfig;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_actor(actor: &str) -> Result<(), EngineError> {
    if actor.trim().is_empty() {
        return Err(EngineError::InvalidInput("actor is required"));
    }
    if actor.len() > MAX_ACTOR_LEN {
        return Err(EngineError::InvalidInput("actor too long"));
    }
    Ok(())
}

pub(crate) fn validate_notes(notes: Option<&str>, max: usize) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > max) {
        return Err(EngineError::InvalidInput("notes too long"));
    }
    Ok(())
}

/// The booked window must be non-empty.
pub(crate) fn validate_window(reservation: &Reservation) -> Result<Span, EngineError> {
    reservation.span().ok_or_else(|| {
        EngineError::InvalidReservationWindow(format!(
            "reservation {} ends at {} but starts at {}",
            reservation.id, reservation.end_time, reservation.start_time
        ))
    })
}

/// Check-in is allowed on the reservation's date, widened by the grace period
/// on both sides of that local day.
pub(crate) fn check_in_day(
    reservation: &Reservation,
    now: Ms,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    let day_start = clock::instant_at(reservation.date, TimeOfDay::MIDNIGHT, config.utc_offset);
    let day_end = day_start + MS_PER_DAY;
    let grace = config.checkin_grace_ms;
    if now >= day_start - grace && now < day_end + grace {
        return Ok(());
    }
    let today = clock::local_date(now, config.utc_offset)
        .map(|d| d.to_string())
        .unwrap_or_else(|| "an unrepresentable date".into());
    Err(EngineError::InvalidReservationWindow(format!(
        "reservation is for {}, today is {today}",
        reservation.date
    )))
}

/// Every supplied field must match; absent fields are not checked.
pub(crate) fn verify(reservation: &Reservation, v: &Verification) -> Result<(), EngineError> {
    if let Some(email) = &v.email
        && !email.trim().eq_ignore_ascii_case(reservation.owner.email.trim())
    {
        return Err(EngineError::VerificationMismatch("email"));
    }
    if let Some(id) = v.reservation_id
        && id != reservation.id
    {
        return Err(EngineError::VerificationMismatch("reservation_id"));
    }
    if let Some(name) = &v.event_name {
        let expected = reservation.event_name.as_deref().map(str::trim);
        if expected != Some(name.trim()) {
            return Err(EngineError::VerificationMismatch("event_name"));
        }
    }
    Ok(())
}

/// Refuse `span` in `space_id` if any active reservation other than `exclude` overlaps it.
pub(crate) fn check_no_conflict(
    day: &[Reservation],
    space_id: Ulid,
    exclude: Ulid,
    span: &Span,
) -> Result<(), EngineError> {
    let blocker = day
        .iter()
        .filter(|r| r.is_active && r.space_id == space_id && r.id != exclude)
        .find(|r| r.span().is_some_and(|s| s.overlaps(span)));
    match blocker {
        Some(r) => Err(EngineError::AvailabilityConflict {
            space_id,
            conflicting: Some(r.id),
        }),
        None => Ok(()),
    }
}
