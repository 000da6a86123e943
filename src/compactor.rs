use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{EngineError, SessionStore};
use crate::observability;

/// Rewrite the journal once it has grown by `threshold` appends.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &SessionStore, threshold: u64) -> Result<bool, EngineError> {
    if !store.is_durable() {
        return Ok(false);
    }
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact_wal().await?;
    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!(appends, sessions = store.session_count(), "compacted session journal");
    Ok(true)
}

/// Background task that periodically compacts the session journal.
pub async fn run_compactor(store: Arc<SessionStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}
