use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically removes sessions whose start
/// instant has passed. Maintenance only — never triggered by a booking
/// event.
pub async fn run_purge(engine: Arc<Engine>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        match engine.purge_past_sessions().await {
            Ok(purged) if !purged.is_empty() => {
                metrics::counter!(crate::observability::SESSIONS_PURGED_TOTAL)
                    .increment(purged.len() as u64);
                info!("purged {} past session(s)", purged.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("purge sweep failed: {e}"),
        }
    }
}
