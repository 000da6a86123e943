//! Interfaces to the booking and space collaborators, plus an in-process
//! implementation used by the server binary and the tests.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::model::{Reservation, Space, Span, TimeOfDay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    NotFound(Ulid),
    /// A conditional write was refused; carries the blocking reservation when known.
    Conflict(Option<Ulid>),
    Unavailable(String),
    /// No answer within the engine's bound; the outcome of a write is unknown.
    Timeout,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::NotFound(id) => write!(f, "not found upstream: {id}"),
            UpstreamError::Conflict(Some(id)) => write!(f, "conflicts with reservation {id}"),
            UpstreamError::Conflict(None) => write!(f, "conditional update refused"),
            UpstreamError::Unavailable(msg) => write!(f, "upstream unavailable: {msg}"),
            UpstreamError::Timeout => write!(f, "upstream timed out"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Reservation collaborator. The engine only reads and extends reservations.
#[async_trait]
pub trait BookingDirectory: Send + Sync {
    async fn reservation(&self, id: Ulid) -> Result<Reservation, UpstreamError>;

    /// All reservations (active or not) for a space on a date.
    async fn reservations_for(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, UpstreamError>;

    /// Move `end_time` from `expected_end` to `new_end`, refusing with
    /// `Conflict` if the end has moved or the new window overlaps another booking.
    async fn extend_reservation(
        &self,
        id: Ulid,
        expected_end: TimeOfDay,
        new_end: TimeOfDay,
    ) -> Result<Reservation, UpstreamError>;

    /// Book `[start, end)` in another space as a continuation of `source_id`,
    /// under the caller-chosen id `follow_on_id` so the outcome can be read back.
    async fn book_follow_on(
        &self,
        source_id: Ulid,
        follow_on_id: Ulid,
        space_id: Ulid,
        start: TimeOfDay,
        end: TimeOfDay,
    ) -> Result<Reservation, UpstreamError>;
}

/// Space and pricing collaborator.
#[async_trait]
pub trait SpaceCatalog: Send + Sync {
    async fn space(&self, id: Ulid) -> Result<Space, UpstreamError>;
    async fn spaces(&self) -> Result<Vec<Space>, UpstreamError>;
}

/// Seed file for `MemoryDirectory`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub spaces: Vec<Space>,
    pub reservations: Vec<Reservation>,
}

/// In-process directory with conditional writes serialized by one lock.
#[derive(Default)]
pub struct MemoryDirectory {
    spaces: DashMap<Ulid, Space>,
    reservations: DashMap<Ulid, Reservation>,
    write_lock: Mutex<()>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> Self {
        let dir = Self::new();
        for space in catalog.spaces {
            dir.insert_space(space);
        }
        for reservation in catalog.reservations {
            dir.insert_reservation(reservation);
        }
        dir
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        let catalog: Catalog = serde_json::from_slice(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_catalog(catalog))
    }

    pub fn insert_space(&self, space: Space) {
        self.spaces.insert(space.id, space);
    }

    pub fn insert_reservation(&self, reservation: Reservation) {
        self.reservations.insert(reservation.id, reservation);
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn day_of(&self, space_id: Ulid, date: NaiveDate) -> Vec<Reservation> {
        let mut day: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| e.space_id == space_id && e.date == date)
            .map(|e| e.value().clone())
            .collect();
        day.sort_by_key(|r| (r.start_time, r.id));
        day
    }

    /// First active reservation other than `exclude` overlapping `span`.
    fn blocker(&self, space_id: Ulid, date: NaiveDate, exclude: Ulid, span: &Span) -> Option<Ulid> {
        self.day_of(space_id, date)
            .into_iter()
            .filter(|r| r.is_active && r.id != exclude)
            .find(|r| r.span().is_some_and(|s| s.overlaps(span)))
            .map(|r| r.id)
    }
}

#[async_trait]
impl BookingDirectory for MemoryDirectory {
    async fn reservation(&self, id: Ulid) -> Result<Reservation, UpstreamError> {
        self.reservations
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(UpstreamError::NotFound(id))
    }

    async fn reservations_for(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, UpstreamError> {
        Ok(self.day_of(space_id, date))
    }

    async fn extend_reservation(
        &self,
        id: Ulid,
        expected_end: TimeOfDay,
        new_end: TimeOfDay,
    ) -> Result<Reservation, UpstreamError> {
        let _guard = self.write_lock.lock().await;
        let current = self.reservation(id).await?;
        if !current.is_active || current.end_time != expected_end || new_end <= expected_end {
            return Err(UpstreamError::Conflict(None));
        }
        let added = Span::new(expected_end.as_ms(), new_end.as_ms());
        if let Some(blocker) = self.blocker(current.space_id, current.date, id, &added) {
            return Err(UpstreamError::Conflict(Some(blocker)));
        }
        let mut updated = current;
        updated.end_time = new_end;
        self.reservations.insert(id, updated.clone());
        Ok(updated)
    }

    async fn book_follow_on(
        &self,
        source_id: Ulid,
        follow_on_id: Ulid,
        space_id: Ulid,
        start: TimeOfDay,
        end: TimeOfDay,
    ) -> Result<Reservation, UpstreamError> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.reservations.get(&follow_on_id) {
            // Same id, same request: the earlier attempt already landed.
            let r = existing.value();
            if r.space_id == space_id && r.start_time == start && r.end_time == end {
                return Ok(r.clone());
            }
            return Err(UpstreamError::Conflict(Some(follow_on_id)));
        }
        if !self.spaces.contains_key(&space_id) {
            return Err(UpstreamError::NotFound(space_id));
        }
        let source = self.reservation(source_id).await?;
        if start >= end {
            return Err(UpstreamError::Conflict(None));
        }
        let span = Span::new(start.as_ms(), end.as_ms());
        if let Some(blocker) = self.blocker(space_id, source.date, follow_on_id, &span) {
            return Err(UpstreamError::Conflict(Some(blocker)));
        }
        let follow_on = Reservation {
            id: follow_on_id,
            space_id,
            start_time: start,
            end_time: end,
            is_active: true,
            ..source
        };
        self.reservations.insert(follow_on_id, follow_on.clone());
        Ok(follow_on)
    }
}

#[async_trait]
impl SpaceCatalog for MemoryDirectory {
    async fn space(&self, id: Ulid) -> Result<Space, UpstreamError> {
        self.spaces
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(UpstreamError::NotFound(id))
    }

    async fn spaces(&self) -> Result<Vec<Space>, UpstreamError> {
        let mut all: Vec<Space> = self.spaces.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        Ok(all)
    }
}
