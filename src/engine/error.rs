use ulid::Ulid;

use crate::model::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    State,
    Concurrency,
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::State => "state",
            ErrorCategory::Concurrency => "concurrency",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    ReservationNotFound(Ulid),
    ReservationInactive(Ulid),
    InvalidReservationWindow(String),
    /// Names the verification field that did not match.
    VerificationMismatch(&'static str),
    InvalidInput(&'static str),
    AlreadyCheckedIn {
        reservation_id: Ulid,
        session_id: Ulid,
    },
    InvalidStateTransition {
        session_id: Ulid,
        from: SessionStatus,
        to: SessionStatus,
    },
    SessionNotFound(Ulid),
    /// The slot is no longer free; search again before retrying.
    AvailabilityConflict {
        space_id: Ulid,
        conflicting: Option<Ulid>,
    },
    UpstreamUnavailable(String),
    DeadlineExceeded,
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::ReservationInactive(_) => "reservation_inactive",
            EngineError::InvalidReservationWindow(_) => "invalid_reservation_window",
            EngineError::VerificationMismatch(_) => "verification_mismatch",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::AlreadyCheckedIn { .. } => "already_checked_in",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::SessionNotFound(_) => "session_not_found",
            EngineError::AvailabilityConflict { .. } => "availability_conflict",
            EngineError::UpstreamUnavailable(_) => "upstream_unavailable",
            EngineError::DeadlineExceeded => "deadline_exceeded",
            EngineError::WalError(_) => "storage",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::ReservationNotFound(_)
            | EngineError::ReservationInactive(_)
            | EngineError::InvalidReservationWindow(_)
            | EngineError::VerificationMismatch(_)
            | EngineError::InvalidInput(_) => ErrorCategory::Validation,
            EngineError::AlreadyCheckedIn { .. }
            | EngineError::InvalidStateTransition { .. }
            | EngineError::SessionNotFound(_) => ErrorCategory::State,
            EngineError::AvailabilityConflict { .. } => ErrorCategory::Concurrency,
            EngineError::UpstreamUnavailable(_)
            | EngineError::DeadlineExceeded
            | EngineError::WalError(_) => ErrorCategory::Infrastructure,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::ReservationInactive(id) => write!(f, "reservation {id} is not active"),
            EngineError::InvalidReservationWindow(msg) => {
                write!(f, "invalid reservation window: {msg}")
            }
            EngineError::VerificationMismatch(field) => {
                write!(f, "verification failed: {field} does not match the reservation")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::AlreadyCheckedIn {
                reservation_id,
                session_id,
            } => write!(
                f,
                "reservation {reservation_id} was already checked in by session {session_id}"
            ),
            EngineError::InvalidStateTransition {
                session_id,
                from,
                to,
            } => write!(f, "session {session_id} cannot go from {from} to {to}"),
            EngineError::SessionNotFound(id) => write!(f, "session not found: {id}"),
            EngineError::AvailabilityConflict {
                space_id,
                conflicting,
            } => match conflicting {
                Some(other) => write!(
                    f,
                    "slot in space {space_id} is taken by reservation {other}; search again"
                ),
                None => write!(f, "slot in space {space_id} is no longer free; search again"),
            },
            EngineError::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {msg}"),
            EngineError::DeadlineExceeded => write!(f, "deadline exceeded"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
