use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::{ScanEngine, ScanKind};

/// Starts one periodic task per scan. Each task ticks immediately, then
/// every `every`; ticks missed while a run overran are dropped.
pub fn spawn_scans(engine: ScanEngine, every: Duration) -> Vec<JoinHandle<()>> {
    info!(interval_secs = every.as_secs(), "starting reminder scans");
    ScanKind::ALL
        .into_iter()
        .map(|kind| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if let Err(e) = engine.run(kind, Utc::now()).await {
                        error!(scan = %kind, error = %e, "scan run failed");
                    }
                }
            })
        })
        .collect()
}
