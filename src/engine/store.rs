use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::EngineError;

/// Every session ever opened for one reservation, oldest first.
#[derive(Debug, Clone)]
pub struct ReservationSessions {
    pub reservation_id: Ulid,
    pub sessions: Vec<ReservationSession>,
}

impl ReservationSessions {
    fn new(reservation_id: Ulid) -> Self {
        Self {
            reservation_id,
            sessions: Vec::new(),
        }
    }

    /// The Pending or CheckedIn session, if any. There is at most one.
    pub fn open_session(&self) -> Option<&ReservationSession> {
        self.sessions.iter().find(|s| !s.status.is_terminal())
    }

    /// The session that bars a new check-in: an open one, or one already
    /// checked out. Only cancelled sessions leave the reservation reopenable.
    pub fn blocking_session(&self) -> Option<&ReservationSession> {
        self.sessions
            .iter()
            .find(|s| s.status != SessionStatus::Cancelled)
    }

    pub fn session(&self, id: Ulid) -> Option<&ReservationSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn put(&mut self, session: ReservationSession) {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => *slot = session,
            None => self.sessions.push(session),
        }
    }
}

pub type SessionGuard = OwnedRwLockWriteGuard<ReservationSessions>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: SessionEvent,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Queued = (SessionEvent, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
///
/// `latest` mirrors the newest durable record per session, so compaction
/// rewrites exactly what the journal holds.
async fn wal_writer_loop(
    mut wal: Wal,
    mut latest: HashMap<Ulid, ReservationSession>,
    mut rx: mpsc::Receiver<WalCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if result.is_ok() {
                    for (SessionEvent::Written(session), _) in &batch {
                        remember(&mut latest, session.clone());
                    }
                }
                respond_batch(batch, &result);

                // Compaction sees every append queued before it.
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &latest, other);
                }
            }
            other => handle_non_append(&mut wal, &latest, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Queued]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes do not leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<Queued>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Keep the higher version of a session.
fn remember(latest: &mut HashMap<Ulid, ReservationSession>, session: ReservationSession) {
    match latest.get(&session.id) {
        Some(current) if current.version >= session.version => {}
        _ => {
            latest.insert(session.id, session);
        }
    }
}

fn handle_non_append(wal: &mut Wal, latest: &HashMap<Ulid, ReservationSession>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let mut sessions: Vec<&ReservationSession> = latest.values().collect();
            sessions.sort_by_key(|s| s.id);
            let events: Vec<SessionEvent> = sessions
                .into_iter()
                .map(|s| SessionEvent::Written(s.clone()))
                .collect();
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Owns every `ReservationSession`.
///
/// Each reservation has its own row lock; every read-check-write on its
/// sessions happens under that lock, so different reservations never contend.
/// Committed state is also published to a lock-free snapshot map that
/// `live_status` and the board read without waiting on writers.
pub struct SessionStore {
    reservations: DashMap<Ulid, Arc<RwLock<ReservationSessions>>>,
    session_to_reservation: DashMap<Ulid, Ulid>,
    snapshots: DashMap<Ulid, ReservationSession>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Volatile store, nothing survives the process.
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            session_to_reservation: DashMap::new(),
            snapshots: DashMap::new(),
            wal_tx: None,
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a Tokio runtime (spawns the WAL writer).
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(path)?;
        if replay.truncated_tail {
            warn!(path = %path.display(), "dropped torn tail of session journal");
        }

        let mut latest: HashMap<Ulid, ReservationSession> = HashMap::new();
        for SessionEvent::Written(session) in replay.events {
            remember(&mut latest, session);
        }

        let mut store = Self::new();
        let mut grouped: HashMap<Ulid, ReservationSessions> = HashMap::new();
        for session in latest.values().cloned() {
            store.session_to_reservation.insert(session.id, session.reservation_id);
            store.snapshots.insert(session.id, session.clone());
            let reservation_id = session.reservation_id;
            grouped
                .entry(reservation_id)
                .or_insert_with(|| ReservationSessions::new(reservation_id))
                .sessions
                .push(session);
        }
        for (reservation_id, mut rs) in grouped {
            rs.sessions.sort_by_key(|s| (s.check_in_time, s.id));
            store.reservations.insert(reservation_id, Arc::new(RwLock::new(rs)));
        }

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, latest, wal_rx));
        store.wal_tx = Some(wal_tx);
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Last committed state of a session. Never waits on a writer.
    pub fn get(&self, session_id: &Ulid) -> Option<ReservationSession> {
        self.snapshots.get(session_id).map(|e| e.value().clone())
    }

    /// Committed sessions matching `pred`, ordered by id.
    pub fn scan(&self, pred: impl Fn(&ReservationSession) -> bool) -> Vec<ReservationSession> {
        let mut found: Vec<ReservationSession> = self
            .snapshots
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|s| s.id);
        found
    }

    /// Session history of one reservation, oldest first.
    pub async fn reservation_sessions(&self, reservation_id: &Ulid) -> Vec<ReservationSession> {
        let Some(rs) = self.reservations.get(reservation_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard.sessions.clone()
    }

    /// Acquire the row lock of a reservation, creating its entry on first use.
    pub async fn lock_reservation(&self, reservation_id: Ulid) -> SessionGuard {
        let rs = self
            .reservations
            .entry(reservation_id)
            .or_insert_with(|| Arc::new(RwLock::new(ReservationSessions::new(reservation_id))))
            .value()
            .clone();
        rs.write_owned().await
    }

    /// Lookup session → reservation, acquire its row lock.
    pub async fn lock_session(&self, session_id: &Ulid) -> Result<SessionGuard, EngineError> {
        let reservation_id = self
            .session_to_reservation
            .get(session_id)
            .map(|e| *e.value())
            .ok_or(EngineError::SessionNotFound(*session_id))?;
        Ok(self.lock_reservation(reservation_id).await)
    }

    /// Bump the version, make the write durable, then apply it under the held lock.
    ///
    /// Runs to completion on its own task, so a caller that gives up (deadline,
    /// dropped connection) never leaves the journal and memory disagreeing.
    pub async fn commit(
        self: &Arc<Self>,
        mut guard: SessionGuard,
        mut session: ReservationSession,
    ) -> Result<ReservationSession, EngineError> {
        debug_assert_eq!(guard.reservation_id, session.reservation_id);
        session.version += 1;
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.wal_append(&SessionEvent::Written(session.clone())).await?;
            store.apply(&mut guard, session.clone());
            Ok::<_, EngineError>(session)
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    fn apply(&self, rs: &mut ReservationSessions, session: ReservationSession) {
        self.session_to_reservation.insert(session.id, session.reservation_id);
        self.snapshots.insert(session.id, session.clone());
        rs.put(session);
    }

    async fn wal_append(&self, event: &SessionEvent) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    // ── Compaction ───────────────────────────────────────────

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx.send(WalCommand::AppendsSinceCompact { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal as one record per session.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
