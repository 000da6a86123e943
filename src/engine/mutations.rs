use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::billing;
use super::conflict::{check_in_day, validate_actor, validate_notes, validate_window, verify};
use super::{Engine, EngineError};

/// Move `session` to `next`, or refuse if the state machine does not allow it.
pub(super) fn transition(
    session: &mut ReservationSession,
    next: SessionStatus,
) -> Result<(), EngineError> {
    if !session.status.can_transition_to(next) {
        return Err(EngineError::InvalidStateTransition {
            session_id: session.id,
            from: session.status,
            to: next,
        });
    }
    session.status = next;
    Ok(())
}

impl Engine {
    pub async fn check_in(
        &self,
        reservation_id: Ulid,
        actor: &str,
        notes: Option<&str>,
        verification: Option<&Verification>,
    ) -> Result<ReservationSession, EngineError> {
        validate_actor(actor)?;
        validate_notes(notes, MAX_NOTES_LEN)?;

        let reservation = self.fetch_reservation(reservation_id).await?;
        if !reservation.is_active {
            return Err(EngineError::ReservationInactive(reservation_id));
        }
        let window = validate_window(&reservation)?;
        check_in_day(&reservation, self.clock.now_ms(), &self.config)?;
        if let Some(v) = verification {
            verify(&reservation, v)?;
        }

        let guard = self.store.lock_reservation(reservation_id).await;
        if let Some(existing) = guard.blocking_session() {
            return Err(EngineError::AlreadyCheckedIn {
                reservation_id,
                session_id: existing.id,
            });
        }
        if guard.sessions.len() >= MAX_SESSIONS_PER_RESERVATION {
            return Err(EngineError::InvalidInput("too many sessions for this reservation"));
        }

        let mut session =
            ReservationSession::pending(Ulid::new(), reservation.id, reservation.space_id);
        transition(&mut session, SessionStatus::CheckedIn)?;
        let now = self.clock.now_ms();
        session.check_in_time = Some(now);
        session.check_in_actor = Some(actor.to_string());
        session.check_in_notes = notes.map(str::to_string);
        session.reserved_duration_hours = Hours::from_ms(window.duration_ms());

        let session = self.store.commit(guard, session).await?;
        metrics::counter!(observability::CHECKINS_TOTAL).increment(1);
        info!(
            session_id = %session.id,
            reservation_id = %reservation_id,
            space_id = %session.space_id,
            actor,
            reserved_hours = %session.reserved_duration_hours,
            "checked in"
        );
        Ok(session)
    }

    pub async fn check_out(
        &self,
        session_id: Ulid,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<ReservationSession, EngineError> {
        let snapshot = self
            .store
            .get(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;
        match snapshot.status {
            SessionStatus::CheckedOut => {
                debug!(session_id = %session_id, "check-out repeated, returning stored record");
                return Ok(snapshot);
            }
            SessionStatus::CheckedIn => {
                validate_actor(actor)?;
                validate_notes(notes, MAX_NOTES_LEN)?;
            }
            from => {
                return Err(EngineError::InvalidStateTransition {
                    session_id,
                    from,
                    to: SessionStatus::CheckedOut,
                });
            }
        }

        // Pricing is loaded before taking the row lock.
        let space = self.fetch_space(snapshot.space_id).await?;

        let guard = self.store.lock_session(&session_id).await?;
        let mut session = guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(session_id))?;
        if session.status == SessionStatus::CheckedOut {
            return Ok(session);
        }
        transition(&mut session, SessionStatus::CheckedOut)?;

        let now = self.clock.now_ms();
        let checked_in_at = session.check_in_time.unwrap_or(now);
        let elapsed = now - checked_in_at;
        let bill = billing::compute(
            &space,
            &self.config.tiers,
            session.reserved_duration_hours,
            Hours::from_ms(elapsed),
        );

        session.check_out_time = Some(now.max(checked_in_at));
        session.check_out_actor = Some(actor.to_string());
        session.check_out_notes = notes.map(str::to_string);
        session.actual_duration_hours = Some(Hours::from_ms(elapsed.max(0)));
        session.overtime_hours = Some(bill.overtime_hours);
        session.base_cost = Some(bill.base_cost);
        session.overtime_cost = Some(bill.overtime_cost);
        session.total_cost = Some(bill.total_cost);
        session.billing_warning = bill.warning;

        let session = self.store.commit(guard, session).await?;
        metrics::counter!(observability::CHECKOUTS_TOTAL).increment(1);
        metrics::histogram!(observability::OVERTIME_HOURS).record(bill.overtime_hours.as_f64());
        info!(
            session_id = %session_id,
            reservation_id = %session.reservation_id,
            actor,
            actual_hours = %session.actual_duration_hours.unwrap_or(Hours::ZERO),
            overtime_hours = %bill.overtime_hours,
            total_cost = bill.total_cost,
            warning = bill.warning.map(|w| w.code()),
            "checked out"
        );
        Ok(session)
    }

    pub async fn cancel_session(
        &self,
        session_id: Ulid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<ReservationSession, EngineError> {
        validate_actor(actor)?;
        validate_notes(reason, MAX_REASON_LEN)?;

        let guard = self.store.lock_session(&session_id).await?;
        let mut session = guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let from = session.status;
        transition(&mut session, SessionStatus::Cancelled)?;
        session.cancelled_at = Some(self.clock.now_ms());
        session.cancel_reason = reason.map(str::to_string);

        let session = self.store.commit(guard, session).await?;
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        info!(
            session_id = %session_id,
            reservation_id = %session.reservation_id,
            actor,
            from = %from,
            "session cancelled"
        );
        Ok(session)
    }
}
