use futures::future::try_join_all;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::availability::find_extension_options;
use super::conflict::validate_window;
use super::{Engine, EngineError};

/// Elapsed, remaining and overtime figures for `session` as of `now`.
pub(super) fn live_figures(session: &ReservationSession, now: Ms) -> LiveStatus {
    let reserved = session.reserved_duration_hours;
    let (current, overtime) = match session.status {
        SessionStatus::CheckedIn => {
            let checked_in_at = session.check_in_time.unwrap_or(now);
            let current = Hours::from_ms((now - checked_in_at).max(0));
            (current, current.excess_over(reserved))
        }
        SessionStatus::CheckedOut => (
            session.actual_duration_hours.unwrap_or(Hours::ZERO),
            session.overtime_hours.unwrap_or(Hours::ZERO),
        ),
        SessionStatus::Pending | SessionStatus::Cancelled => (Hours::ZERO, Hours::ZERO),
    };
    let remaining = match session.status {
        SessionStatus::CheckedIn | SessionStatus::CheckedOut => reserved.excess_over(current),
        SessionStatus::Pending | SessionStatus::Cancelled => Hours::ZERO,
    };
    LiveStatus {
        session_id: session.id,
        reservation_id: session.reservation_id,
        status: session.status,
        check_in_time: session.check_in_time,
        reserved_duration_hours: reserved,
        current_duration_hours: current,
        remaining_reserved_time_hours: remaining,
        overtime_hours: overtime,
        is_overtime: overtime.is_positive(),
        as_of: now,
    }
}

impl Engine {
    /// Read-only; served from the last committed snapshot without taking the row lock.
    pub fn live_status(&self, session_id: Ulid) -> Result<LiveStatus, EngineError> {
        let session = self
            .store
            .get(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;
        Ok(live_figures(&session, self.clock.now_ms()))
    }

    /// Every checked-in session with its live figures, oldest first.
    pub fn active_sessions(&self) -> Vec<LiveStatus> {
        let now = self.clock.now_ms();
        self.store
            .scan(|s| s.status == SessionStatus::CheckedIn)
            .iter()
            .map(|s| live_figures(s, now))
            .collect()
    }

    pub async fn sessions_for_reservation(&self, reservation_id: Ulid) -> Vec<ReservationSession> {
        self.store.reservation_sessions(&reservation_id).await
    }

    /// Session joined with the display fields owned by the collaborators.
    pub async fn session_view(&self, session_id: Ulid) -> Result<SessionView, EngineError> {
        let session = self
            .store
            .get(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let (reservation, space) = tokio::try_join!(
            self.fetch_reservation(session.reservation_id),
            self.fetch_space(session.space_id),
        )?;
        Ok(SessionView {
            user_name: reservation.owner.name,
            user_email: reservation.owner.email,
            space_name: space.name,
            event_name: reservation.event_name,
            date: reservation.date,
            session,
        })
    }

    /// Candidate slots for lengthening a reservation. Advisory only: nothing is
    /// held, and `commit_extension` re-validates the chosen slot.
    pub async fn extension_options(&self, reservation_id: Ulid) -> Result<ExtensionOptions, EngineError> {
        let started = std::time::Instant::now();
        let reservation = self.fetch_reservation(reservation_id).await?;
        if !reservation.is_active {
            return Err(EngineError::ReservationInactive(reservation_id));
        }
        validate_window(&reservation)?;

        let catalog = self
            .upstream(self.spaces.spaces())
            .await
            .map_err(|e| self.upstream_failure("spaces", e))?;
        let candidates: Vec<Space> = catalog
            .into_iter()
            .filter(|s| s.id == reservation.space_id || s.capacity >= reservation.attendees)
            .collect();

        let mut space_ids: Vec<Ulid> = candidates.iter().map(|s| s.id).collect();
        if !space_ids.contains(&reservation.space_id) {
            space_ids.push(reservation.space_id);
        }
        let days = try_join_all(
            space_ids
                .iter()
                .map(|&space_id| self.fetch_day(space_id, reservation.date)),
        )
        .await?;
        let day: Vec<Reservation> = days.into_iter().flatten().collect();

        let options = find_extension_options(&reservation, &day, &candidates, &self.config.hours);
        metrics::histogram!(observability::EXTENSION_SEARCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(
            reservation_id = %reservation_id,
            same_space = options.same_space.len(),
            other_spaces = options.other_spaces.len(),
            "extension options"
        );
        Ok(options)
    }
}
