//! SLA monitor (C10): a standalone periodic task, not a queue consumer.
//! Runs every five seconds, scanning active requests for breach and
//! at-risk conditions (spec §4.10).

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::{requests, DbPool};
use crate::time_provider::SharedTimeProvider;

/// Poll interval, fixed by spec at five seconds.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Run the SLA monitor loop until `shutdown` is cancelled. `time` is
/// injected so the poll loop and deadline comparisons are unit-testable
/// without real sleeps — the gap spec's testable property #5 ("breach
/// never reverts") needs to exercise deterministically.
pub async fn run(pool: DbPool, time: SharedTimeProvider, shutdown: CancellationToken) {
    info!("SLA monitor started");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("SLA monitor shutting down");
                break;
            }
            () = time.sleep(POLL_INTERVAL) => {
                if let Err(error) = run_once(&pool).await {
                    warn!(%error, "SLA monitor pass failed");
                }
            }
        }
    }
}

/// One scan pass: breach anything past its deadline, log anything
/// approaching it. Exposed separately from [`run`] so tests can drive a
/// single pass deterministically.
pub async fn run_once(pool: &DbPool) -> Result<(), crate::error::StorageError> {
    let now = Utc::now();

    let breached = requests::find_breached(pool, now).await?;
    for request in &breached {
        requests::mark_breached(pool, request.id, now).await?;
        warn!(
            request_id = %request.id.as_ref(),
            deadline_utc = ?request.deadline_utc,
            "request breached its SLA"
        );
    }

    // Read-only at-risk pass: requests whose remaining time has dropped
    // below sla_seconds * (1 - warn_threshold); logged, never mutated.
    let at_risk = requests::find_at_risk(pool, now).await?;
    for request in &at_risk {
        let (Some(deadline), Some(sla_seconds)) = (request.deadline_utc, request.sla_seconds)
        else {
            continue;
        };
        let remaining = deadline - now;
        let warn_budget = ChronoDuration::seconds(i64::from(sla_seconds)) * 3 / 10;
        if remaining < warn_budget {
            warn!(
                request_id = %request.id.as_ref(),
                remaining_seconds = remaining.num_seconds(),
                "request approaching its SLA deadline"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_matches_spec() {
        assert_eq!(POLL_INTERVAL, std::time::Duration::from_secs(5));
    }
}
