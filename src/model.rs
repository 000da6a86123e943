use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Money in the smallest currency unit.
pub type Amount = i64;

pub const MS_PER_SECOND: Ms = 1_000;
pub const MS_PER_HOUR: Ms = 3_600_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// One hundredth of an hour (36 seconds).
const MS_PER_CENTIHOUR: Ms = 36_000;

/// Half-open interval `[start, end)`. Availability arithmetic uses
/// milliseconds since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Durations ────────────────────────────────────────────────────

/// A duration in hundredths of an hour. Every duration the engine reports is
/// rounded half-up to this resolution, so `2h25m` reads as `2.42`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Hours(i64);

impl Hours {
    pub const ZERO: Hours = Hours(0);

    pub const fn from_centi(centi: i64) -> Self {
        Self(centi)
    }

    pub const fn whole(hours: i64) -> Self {
        Self(hours * 100)
    }

    pub fn from_ms(ms: Ms) -> Self {
        Self((ms + MS_PER_CENTIHOUR / 2).div_euclid(MS_PER_CENTIHOUR))
    }

    pub const fn centi(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `max(0, self - other)`.
    pub fn excess_over(self, other: Hours) -> Hours {
        Hours((self.0 - other.0).max(0))
    }
}

impl From<f64> for Hours {
    fn from(v: f64) -> Self {
        Hours((v * 100.0).round() as i64)
    }
}

impl From<Hours> for f64 {
    fn from(h: Hours) -> f64 {
        h.as_f64()
    }
}

impl Add for Hours {
    type Output = Hours;
    fn add(self, rhs: Hours) -> Hours {
        Hours(self.0 + rhs.0)
    }
}

impl Sub for Hours {
    type Output = Hours;
    fn sub(self, rhs: Hours) -> Hours {
        Hours(self.0 - rhs.0)
    }
}

impl fmt::Display for Hours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}h", self.as_f64())
    }
}

// ── Time of day ──────────────────────────────────────────────────

/// Local wall-clock time, normalized from `"HH:MM"` or `"HH:MM:SS"`.
/// `24:00` is accepted as an end-of-day bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u32);

const SECONDS_PER_DAY: u32 = 86_400;

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(SECONDS_PER_DAY);

    pub fn from_hms(h: u32, m: u32, s: u32) -> Option<Self> {
        if m >= 60 || s >= 60 || h > 24 || (h == 24 && (m > 0 || s > 0)) {
            return None;
        }
        Some(Self(h * 3600 + m * 60 + s))
    }

    pub fn seconds(self) -> u32 {
        self.0
    }

    /// Milliseconds since local midnight.
    pub fn as_ms(self) -> Ms {
        self.0 as Ms * MS_PER_SECOND
    }

    /// Inverse of `as_ms`; sub-second remainders are truncated.
    pub fn from_ms(ms: Ms) -> Option<Self> {
        if !(0..=MS_PER_DAY).contains(&ms) {
            return None;
        }
        Some(Self((ms / MS_PER_SECOND) as u32))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeParseError(pub String);

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?}: expected HH:MM or HH:MM:SS", self.0)
    }
}

impl std::error::Error for TimeParseError {}

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimeParseError(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(err());
        }
        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            *slot = part.parse().map_err(|_| err())?;
        }
        TimeOfDay::from_hms(fields[0], fields[1], fields[2]).ok_or_else(err)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = TimeParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> String {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = (self.0 / 3600, (self.0 % 3600) / 60, self.0 % 60);
        if s == 0 {
            write!(f, "{h:02}:{m:02}")
        } else {
            write!(f, "{h:02}:{m:02}:{s:02}")
        }
    }
}

// ── External records ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

/// A booking as the reservation collaborator reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub space_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub is_active: bool,
    pub owner: Owner,
    pub event_name: Option<String>,
    pub attendees: u32,
}

impl Reservation {
    /// Booked window in ms since local midnight, or None when it is empty or inverted.
    pub fn span(&self) -> Option<Span> {
        (self.start_time < self.end_time)
            .then(|| Span::new(self.start_time.as_ms(), self.end_time.as_ms()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub price_hour: Amount,
    pub price_half_day: Option<Amount>,
    pub price_full_day: Option<Amount>,
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::CheckedIn => "checked_in",
            SessionStatus::CheckedOut => "checked_out",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::CheckedOut | SessionStatus::Cancelled)
    }

    /// The whole state machine:
    /// `Pending -> CheckedIn -> CheckedOut`, `Pending | CheckedIn -> Cancelled`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::CheckedIn)
                | (SessionStatus::CheckedIn, SessionStatus::CheckedOut)
                | (SessionStatus::Pending, SessionStatus::Cancelled)
                | (SessionStatus::CheckedIn, SessionStatus::Cancelled)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal billing condition, reported on the breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingWarning {
    /// Reserved or actual duration was zero or negative (clock skew, empty booking).
    DegenerateDuration,
}

impl BillingWarning {
    pub fn code(&self) -> &'static str {
        match self {
            BillingWarning::DegenerateDuration => "degenerate_duration",
        }
    }
}

/// Real-world occupancy of one reservation, from check-in to check-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSession {
    pub id: Ulid,
    pub reservation_id: Ulid,
    /// Space whose pricing bills this session.
    pub space_id: Ulid,
    /// Bumped on every stored write.
    pub version: u64,
    pub status: SessionStatus,
    pub check_in_time: Option<Ms>,
    pub check_in_notes: Option<String>,
    pub check_in_actor: Option<String>,
    pub check_out_time: Option<Ms>,
    pub check_out_notes: Option<String>,
    pub check_out_actor: Option<String>,
    pub cancelled_at: Option<Ms>,
    pub cancel_reason: Option<String>,
    pub reserved_duration_hours: Hours,
    pub actual_duration_hours: Option<Hours>,
    pub overtime_hours: Option<Hours>,
    pub base_cost: Option<Amount>,
    pub overtime_cost: Option<Amount>,
    pub total_cost: Option<Amount>,
    pub billing_warning: Option<BillingWarning>,
}

impl ReservationSession {
    pub fn pending(id: Ulid, reservation_id: Ulid, space_id: Ulid) -> Self {
        Self {
            id,
            reservation_id,
            space_id,
            version: 0,
            status: SessionStatus::Pending,
            check_in_time: None,
            check_in_notes: None,
            check_in_actor: None,
            check_out_time: None,
            check_out_notes: None,
            check_out_actor: None,
            cancelled_at: None,
            cancel_reason: None,
            reserved_duration_hours: Hours::ZERO,
            actual_duration_hours: None,
            overtime_hours: None,
            base_cost: None,
            overtime_cost: None,
            total_cost: None,
            billing_warning: None,
        }
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Full session state after a write. Replay keeps the highest version per id.
    Written(ReservationSession),
}

// ── Operation inputs ─────────────────────────────────────────────

/// Optional identity check at the front desk. Every supplied field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub email: Option<String>,
    pub reservation_id: Option<Ulid>,
    pub event_name: Option<String>,
}

/// A slot picked from `ExtensionOptions`, in either the same or another space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionChoice {
    pub space_id: Ulid,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub base_cost: Amount,
    pub overtime_cost: Amount,
    pub total_cost: Amount,
    pub overtime_hours: Hours,
    pub warning: Option<BillingWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub session_id: Ulid,
    pub reservation_id: Ulid,
    pub status: SessionStatus,
    pub check_in_time: Option<Ms>,
    pub reserved_duration_hours: Hours,
    pub current_duration_hours: Hours,
    pub remaining_reserved_time_hours: Hours,
    pub overtime_hours: Hours,
    pub is_overtime: bool,
    pub as_of: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSlot {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub duration_hours: Hours,
}

impl ExtensionSlot {
    /// Build a slot from a span of ms since local midnight.
    pub fn from_span(span: Span) -> Option<Self> {
        Some(Self {
            start: TimeOfDay::from_ms(span.start)?,
            end: TimeOfDay::from_ms(span.end)?,
            duration_hours: Hours::from_ms(span.duration_ms()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceExtensionOption {
    pub space_id: Ulid,
    pub space_name: String,
    pub capacity: u32,
    pub slots: Vec<ExtensionSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionOptions {
    pub reservation_id: Ulid,
    pub date: NaiveDate,
    pub same_space: Vec<ExtensionSlot>,
    pub other_spaces: Vec<SpaceExtensionOption>,
}

impl ExtensionOptions {
    pub fn is_empty(&self) -> bool {
        self.same_space.is_empty() && self.other_spaces.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionReceipt {
    /// The extended reservation, or the follow-on booking in another space.
    pub reservation: Reservation,
    pub follow_on: bool,
    pub added_hours: Hours,
    /// The checked-in session whose reserved baseline grew, if any.
    pub session: Option<ReservationSession>,
}

/// Session joined with display fields read from the collaborators at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session: ReservationSession,
    pub user_name: String,
    pub user_email: String,
    pub space_name: String,
    pub event_name: Option<String>,
    pub date: NaiveDate,
}
