mod availability;
mod billing;
mod conflict;
mod error;
mod extension;
mod mutations;
mod queries;
mod store;

pub use availability::{find_extension_options, merge_overlapping, subtract_intervals};
pub use billing::compute as compute_bill;
pub use error::{EngineError, ErrorCategory};
pub use store::{ReservationSessions, SessionStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::directory::{BookingDirectory, SpaceCatalog, UpstreamError};
use crate::model::*;
use crate::observability;

/// The occupancy engine: session lifecycle, billing, and extension search
/// and commit, over injected collaborators and clock. Clones share all state.
#[derive(Clone)]
pub struct Engine {
    pub(super) store: Arc<SessionStore>,
    pub(super) bookings: Arc<dyn BookingDirectory>,
    pub(super) spaces: Arc<dyn SpaceCatalog>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    /// Serializes extension commits per (space, date).
    pub(super) commit_gates: Arc<DashMap<(Ulid, NaiveDate), Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        store: Arc<SessionStore>,
        bookings: Arc<dyn BookingDirectory>,
        spaces: Arc<dyn SpaceCatalog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            bookings,
            spaces,
            clock,
            config,
            commit_gates: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Run `op` under a caller deadline. Store writes are applied in one step
    /// after their last await, so an expired operation leaves no partial transition.
    pub async fn with_deadline<T>(
        deadline: Duration,
        op: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        tokio::time::timeout(deadline, op)
            .await
            .map_err(|_| EngineError::DeadlineExceeded)?
    }

    // ── Collaborator calls ───────────────────────────────────

    /// Bound a collaborator call by the configured upstream timeout.
    pub(super) async fn upstream<T>(
        &self,
        call: impl Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        match tokio::time::timeout(self.config.upstream_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        }
    }

    pub(super) fn upstream_failure(&self, call: &'static str, err: UpstreamError) -> EngineError {
        metrics::counter!(observability::UPSTREAM_FAILURES_TOTAL, "call" => call).increment(1);
        warn!(call, error = %err, "collaborator call failed");
        EngineError::UpstreamUnavailable(format!("{call}: {err}"))
    }

    pub(super) async fn fetch_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        match self.upstream(self.bookings.reservation(id)).await {
            Ok(r) => Ok(r),
            Err(UpstreamError::NotFound(_)) => Err(EngineError::ReservationNotFound(id)),
            Err(e) => Err(self.upstream_failure("reservation", e)),
        }
    }

    pub(super) async fn fetch_space(&self, id: Ulid) -> Result<Space, EngineError> {
        self.upstream(self.spaces.space(id))
            .await
            .map_err(|e| self.upstream_failure("space", e))
    }

    pub(super) async fn fetch_day(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.upstream(self.bookings.reservations_for(space_id, date))
            .await
            .map_err(|e| self.upstream_failure("reservations_for", e))
    }
}
