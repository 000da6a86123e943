use tracing::{info, warn};
use ulid::Ulid;

use crate::directory::UpstreamError;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_window};
use super::{Engine, EngineError, ErrorCategory};

/// Outcome of the single write sent to the booking collaborator.
struct Written {
    reservation: Reservation,
    follow_on: bool,
}

impl Engine {
    /// Re-validate `choice` against fresh data and apply it through the booking
    /// collaborator. A lost race surfaces as `AvailabilityConflict`; the caller
    /// searches again. Nothing is retried here.
    pub async fn commit_extension(
        &self,
        reservation_id: Ulid,
        choice: ExtensionChoice,
    ) -> Result<ExtensionReceipt, EngineError> {
        let result = self.commit_extension_inner(reservation_id, &choice).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(EngineError::AvailabilityConflict { .. }) => "conflict",
            Err(e) if e.category() == ErrorCategory::Validation => "rejected",
            Err(_) => "error",
        };
        metrics::counter!(observability::EXTENSION_COMMITS_TOTAL, "status" => status).increment(1);
        if let Err(e) = &result {
            info!(reservation_id = %reservation_id, space_id = %choice.space_id, status, error = %e, "extension not committed");
        }
        result
    }

    async fn commit_extension_inner(
        &self,
        reservation_id: Ulid,
        choice: &ExtensionChoice,
    ) -> Result<ExtensionReceipt, EngineError> {
        let hours = &self.config.hours;
        if choice.end <= choice.start {
            return Err(EngineError::InvalidReservationWindow(format!(
                "extension {}-{} is empty",
                choice.start, choice.end
            )));
        }
        if choice.end > hours.close {
            return Err(EngineError::InvalidReservationWindow(format!(
                "extension ends at {} after closing time {}",
                choice.end, hours.close
            )));
        }

        let reservation = self.fetch_reservation(reservation_id).await?;
        if !reservation.is_active {
            return Err(EngineError::ReservationInactive(reservation_id));
        }
        validate_window(&reservation)?;
        if let Some(lookahead) = hours.max_lookahead_ms
            && choice.end.as_ms() > reservation.end_time.as_ms() + lookahead
        {
            return Err(EngineError::InvalidReservationWindow(format!(
                "extension ends at {}, beyond the lookahead from {}",
                choice.end, reservation.end_time
            )));
        }

        let same_space = choice.space_id == reservation.space_id;
        if same_space {
            if choice.start != reservation.end_time {
                return Err(EngineError::InvalidReservationWindow(format!(
                    "same-space extension must start at the current end {}",
                    reservation.end_time
                )));
            }
        } else {
            if choice.start < reservation.end_time {
                return Err(EngineError::InvalidReservationWindow(format!(
                    "follow-on block must start at or after {}",
                    reservation.end_time
                )));
            }
            let space = match self.upstream(self.spaces.space(choice.space_id)).await {
                Ok(space) => space,
                Err(UpstreamError::NotFound(_)) => {
                    return Err(EngineError::InvalidInput("unknown target space"));
                }
                Err(e) => return Err(self.upstream_failure("space", e)),
            };
            if space.capacity < reservation.attendees {
                return Err(EngineError::InvalidInput("target space is too small for the attendees"));
            }
        }

        let gate = self
            .commit_gates
            .entry((choice.space_id, reservation.date))
            .or_default()
            .value()
            .clone();
        let gate = gate.lock_owned().await;

        // Fresh reads under the gate; the search result may be stale.
        let current = self.fetch_reservation(reservation_id).await?;
        if !current.is_active || current.end_time != reservation.end_time {
            return Err(EngineError::AvailabilityConflict {
                space_id: choice.space_id,
                conflicting: None,
            });
        }
        let day = self.fetch_day(choice.space_id, current.date).await?;
        let span = Span::new(choice.start.as_ms(), choice.end.as_ms());
        check_no_conflict(&day, choice.space_id, current.id, &span)?;

        // From here the collaborator write and the baseline raise finish together
        // on their own task, so a caller that gives up cannot split them.
        let engine = self.clone();
        let choice = *choice;
        let added = Hours::from_ms(span.duration_ms());
        tokio::spawn(async move {
            let _gate = gate;
            engine.apply_extension(current, choice, same_space, added).await
        })
        .await
        .map_err(|e| EngineError::WalError(format!("extension task failed: {e}")))?
    }

    async fn apply_extension(
        &self,
        current: Reservation,
        choice: ExtensionChoice,
        same_space: bool,
        added: Hours,
    ) -> Result<ExtensionReceipt, EngineError> {
        let written = if same_space {
            self.write_extension(&current, &choice).await?
        } else {
            self.write_follow_on(&current, &choice).await?
        };

        let session = self
            .raise_baseline(current.id, added)
            .await
            .map_err(|e| match e {
                EngineError::WalError(msg) => EngineError::WalError(format!(
                    "extension of {} written but session baseline not saved: {msg}",
                    current.id
                )),
                other => other,
            })?;
        info!(
            reservation_id = %current.id,
            space_id = %choice.space_id,
            start = %choice.start,
            end = %choice.end,
            follow_on = written.follow_on,
            added_hours = %added,
            "extension committed"
        );
        Ok(ExtensionReceipt {
            reservation: written.reservation,
            follow_on: written.follow_on,
            added_hours: added,
            session,
        })
    }

    async fn write_extension(
        &self,
        current: &Reservation,
        choice: &ExtensionChoice,
    ) -> Result<Written, EngineError> {
        let result = self
            .upstream(self.bookings.extend_reservation(current.id, current.end_time, choice.end))
            .await;
        let reservation = match result {
            Ok(r) => r,
            Err(UpstreamError::Timeout) => {
                warn!(reservation_id = %current.id, "extension write timed out, reading back");
                match self.upstream(self.bookings.reservation(current.id)).await {
                    Ok(r) if r.is_active && r.end_time == choice.end => r,
                    Ok(_) => return Err(self.upstream_failure("extend_reservation", UpstreamError::Timeout)),
                    Err(e) => return Err(self.upstream_failure("reservation", e)),
                }
            }
            Err(e) => return Err(self.write_failure(choice.space_id, "extend_reservation", e)),
        };
        Ok(Written {
            reservation,
            follow_on: false,
        })
    }

    async fn write_follow_on(
        &self,
        current: &Reservation,
        choice: &ExtensionChoice,
    ) -> Result<Written, EngineError> {
        let follow_on_id = Ulid::new();
        let result = self
            .upstream(self.bookings.book_follow_on(
                current.id,
                follow_on_id,
                choice.space_id,
                choice.start,
                choice.end,
            ))
            .await;
        let reservation = match result {
            Ok(r) => r,
            Err(UpstreamError::Timeout) => {
                warn!(reservation_id = %current.id, %follow_on_id, "follow-on write timed out, reading back");
                match self.upstream(self.bookings.reservation(follow_on_id)).await {
                    Ok(r) if r.is_active
                        && r.space_id == choice.space_id
                        && r.start_time == choice.start
                        && r.end_time == choice.end =>
                    {
                        r
                    }
                    Ok(_) | Err(UpstreamError::NotFound(_)) => {
                        return Err(self.upstream_failure("book_follow_on", UpstreamError::Timeout));
                    }
                    Err(e) => return Err(self.upstream_failure("reservation", e)),
                }
            }
            Err(e) => return Err(self.write_failure(choice.space_id, "book_follow_on", e)),
        };
        Ok(Written {
            reservation,
            follow_on: true,
        })
    }

    fn write_failure(&self, space_id: Ulid, call: &'static str, err: UpstreamError) -> EngineError {
        match err {
            UpstreamError::Conflict(conflicting) => EngineError::AvailabilityConflict {
                space_id,
                conflicting,
            },
            other => self.upstream_failure(call, other),
        }
    }

    /// Raise the reserved baseline of the reservation's checked-in session, if any.
    async fn raise_baseline(
        &self,
        reservation_id: Ulid,
        added: Hours,
    ) -> Result<Option<ReservationSession>, EngineError> {
        let guard = self.store.lock_reservation(reservation_id).await;
        let Some(open) = guard
            .open_session()
            .filter(|s| s.status == SessionStatus::CheckedIn)
            .cloned()
        else {
            return Ok(None);
        };
        let mut session = open;
        session.reserved_duration_hours = session.reserved_duration_hours + added;
        let session = self.store.commit(guard, session).await?;
        Ok(Some(session))
    }
}
