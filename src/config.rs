use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::limits::MAX_LOOKAHEAD_MS;
use crate::model::{Hours, MS_PER_DAY, Ms, TimeOfDay};

const MS_PER_MINUTE: Ms = 60_000;

/// Reserved-duration boundaries that pick the base price tier.
///
/// Reserved time up to `half_day_threshold` is billed hourly, up to
/// `full_day_threshold` at the half-day price, and beyond that at the
/// full-day price. These are business parameters with no built-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingTiers {
    pub half_day_threshold: Hours,
    pub full_day_threshold: Hours,
}

/// Bounds for the extension slot walk. Both ends are required so no slot is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
    /// Optional cap on how far past the current end time the walk looks.
    pub max_lookahead_ms: Option<Ms>,
    /// Gaps shorter than this are not offered. Zero keeps every positive gap.
    pub min_slot_ms: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub tiers: BillingTiers,
    pub hours: BusinessHours,
    /// Offset of the spaces' local wall clock from UTC.
    pub utc_offset: FixedOffset,
    /// How far outside the reservation's calendar date a check-in is still accepted.
    pub checkin_grace_ms: Ms,
    /// Bound on every call to the booking and space collaborators.
    pub upstream_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
    Inconsistent(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required setting {key}"),
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::Inconsistent(msg) => write!(f, "inconsistent configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn minutes_to_ms(key: &'static str, minutes: i64) -> Result<Ms, ConfigError> {
    minutes.checked_mul(MS_PER_MINUTE).ok_or(ConfigError::Invalid {
        key,
        value: minutes.to_string(),
    })
}

fn require<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<T, ConfigError> {
    parse(get, key)?.ok_or(ConfigError::Missing(key))
}

impl EngineConfig {
    /// Config with the required business parameters and neutral defaults
    /// for the rest (UTC, no grace window, 5s upstream timeout).
    pub fn new(tiers: BillingTiers, hours: BusinessHours) -> Self {
        Self {
            tiers,
            hours,
            utc_offset: Utc.fix(),
            checkin_grace_ms: 0,
            upstream_timeout: Duration::from_secs(5),
        }
    }

    /// Read `OCCUPANCY_*` settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let half: f64 = require(&get, "OCCUPANCY_HALF_DAY_HOURS")?;
        let full: f64 = require(&get, "OCCUPANCY_FULL_DAY_HOURS")?;
        let open: TimeOfDay = require(&get, "OCCUPANCY_OPEN")?;
        let close: TimeOfDay = require(&get, "OCCUPANCY_CLOSE")?;

        let lookahead: Option<i64> = parse(&get, "OCCUPANCY_MAX_LOOKAHEAD_MINUTES")?;
        let min_slot: i64 = parse(&get, "OCCUPANCY_MIN_SLOT_MINUTES")?.unwrap_or(0);
        let offset_minutes: i32 = parse(&get, "OCCUPANCY_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let grace_minutes: i64 = parse(&get, "OCCUPANCY_CHECKIN_GRACE_MINUTES")?.unwrap_or(0);
        let timeout_ms: u64 = parse(&get, "OCCUPANCY_UPSTREAM_TIMEOUT_MS")?.unwrap_or(5_000);

        let utc_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or(ConfigError::Invalid {
            key: "OCCUPANCY_UTC_OFFSET_MINUTES",
            value: offset_minutes.to_string(),
        })?;

        let max_lookahead_ms = lookahead
            .map(|m| minutes_to_ms("OCCUPANCY_MAX_LOOKAHEAD_MINUTES", m))
            .transpose()?;
        let min_slot_ms = minutes_to_ms("OCCUPANCY_MIN_SLOT_MINUTES", min_slot)?;
        let checkin_grace_ms = minutes_to_ms("OCCUPANCY_CHECKIN_GRACE_MINUTES", grace_minutes)?;

        let config = Self {
            tiers: BillingTiers {
                half_day_threshold: Hours::from(half),
                full_day_threshold: Hours::from(full),
            },
            hours: BusinessHours {
                open,
                close,
                max_lookahead_ms,
                min_slot_ms,
            },
            utc_offset,
            checkin_grace_ms,
            upstream_timeout: Duration::from_millis(timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tiers.half_day_threshold.is_positive() {
            return Err(ConfigError::Inconsistent("half-day threshold must be positive"));
        }
        if self.tiers.full_day_threshold < self.tiers.half_day_threshold {
            return Err(ConfigError::Inconsistent(
                "full-day threshold must not be below the half-day threshold",
            ));
        }
        if self.hours.open >= self.hours.close {
            return Err(ConfigError::Inconsistent("opening time must be before closing time"));
        }
        if let Some(lookahead) = self.hours.max_lookahead_ms
            && !(1..=MAX_LOOKAHEAD_MS).contains(&lookahead)
        {
            return Err(ConfigError::Inconsistent("lookahead must be between 1 minute and 24 hours"));
        }
        if self.hours.min_slot_ms < 0 {
            return Err(ConfigError::Inconsistent("minimum slot must not be negative"));
        }
        if !(0..=MS_PER_DAY).contains(&self.checkin_grace_ms) {
            return Err(ConfigError::Inconsistent("check-in grace must be between 0 and 24 hours"));
        }
        if self.upstream_timeout.is_zero() {
            return Err(ConfigError::Inconsistent("upstream timeout must be positive"));
        }
        Ok(())
    }
}

/// Process-level settings for the TCP server binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// JSON file seeding the in-process booking directory.
    pub catalog: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind: get("OCCUPANCY_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "OCCUPANCY_PORT")?.unwrap_or(7433),
            data_dir: PathBuf::from(get("OCCUPANCY_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parse(&get, "OCCUPANCY_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse(&get, "OCCUPANCY_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parse(&get, "OCCUPANCY_METRICS_PORT")?,
            catalog: get("OCCUPANCY_CATALOG").map(PathBuf::from),
        })
    }
}
