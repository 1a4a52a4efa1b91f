use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, now_ms};
use crate::model::Ms;

/// Background task that periodically drops reservations that ended more than
/// `retention` ago.
pub async fn run_reaper(engine: Arc<Engine>, retention: Ms) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let pruned = reap_once(&engine, now_ms().saturating_sub(retention)).await;
        if pruned > 0 {
            info!("reaped {pruned} finished reservations");
        }
    }
}

/// Prune everything that ended at or before `cutoff`. Returns how many went.
pub async fn reap_once(engine: &Engine, cutoff: Ms) -> usize {
    let ended = engine.collect_ended_reservations(cutoff).await;
    let mut pruned = 0;
    for (reservation_id, _room_id) in ended {
        match engine.prune_reservation(reservation_id).await {
            Ok(_) => pruned += 1,
            Err(e) => {
                // May already have been cancelled
                tracing::debug!("reaper skip {reservation_id}: {e}");
            }
        }
    }
    metrics::counter!(crate::observability::RESERVATIONS_PRUNED_TOTAL).increment(pruned as u64);
    pruned
}
