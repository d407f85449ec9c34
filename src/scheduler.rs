//! Daily monitoring loop

use crate::platform::Platform;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

/// Run monitoring (and retraining when degraded) every `period` until
/// Ctrl-C. The first cycle runs immediately.
pub async fn run_daily(platform: &Platform, period: Duration) {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    run_until(platform, period, shutdown).await;
}

/// Same loop as [`run_daily`] with an explicit shutdown future.
pub async fn run_until<F>(platform: &Platform, period: Duration, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    info!(period_secs = period.as_secs(), "scheduler started, press Ctrl+C to stop");
    let mut interval = time::interval(period);
    tokio::pin!(shutdown);
    let mut cycles = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycles += 1;
                match platform.run_cycle(Utc::now()).await {
                    Ok(outcome) => info!(
                        cycle = cycles,
                        status = ?outcome.report.summary.status,
                        alerts = outcome.report.alerts.len(),
                        retraining = ?outcome.retraining.status,
                        "cycle complete"
                    ),
                    Err(e) => error!(cycle = cycles, error = %e, "cycle failed"),
                }
            }
            _ = &mut shutdown => {
                info!(cycles, "scheduler shutting down");
                break;
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::tests::test_platform;

    #[tokio::test]
    async fn test_loop_runs_until_shutdown() {
        let (platform, _) = test_platform();
        let cycles = run_until(
            &platform,
            Duration::from_millis(20),
            time::sleep(Duration::from_millis(110)),
        )
        .await;
        assert!(cycles >= 2);
    }
}
