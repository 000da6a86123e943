use crate::model::{MS_PER_DAY, Ms};

pub const MAX_ACTOR_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;

/// Sessions kept per reservation (cancelled ones included) before check-in is refused.
pub const MAX_SESSIONS_PER_RESERVATION: usize = 32;

/// Longest JSON request line accepted by the wire protocol.
pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024;

/// Upper bound for the configured availability lookahead.
pub const MAX_LOOKAHEAD_MS: Ms = MS_PER_DAY;

/// Upper bound for a caller-supplied request deadline.
pub const MAX_DEADLINE_MS: u64 = 60_000;
