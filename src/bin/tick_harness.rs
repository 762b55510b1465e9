//! Manual smoke harness for the low-precision task scheduler.
//!
//! Registers a few sample maintenance tasks, lets the shared timers tick
//! for a few seconds, re-arms one task, then tears everything down. Run
//! with `RUST_LOG=debug` to watch the dispatch decisions.

use courier_core::{CourierError, LowPrecisionTaskScheduler, TaskRegistration};
use std::time::Duration;

fn session_refresh(firing_date_ms: u64) -> TaskRegistration {
    TaskRegistration::new("session-refresh", firing_date_ms, 1_000, || async {
        tracing::info!("session refresh pass");
        Ok(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("courier-tick-harness starting");

    let scheduler = LowPrecisionTaskScheduler::new();
    let now = scheduler.now_ms();

    scheduler.add_task(session_refresh(now))?;
    scheduler.add_task(TaskRegistration::new(
        "asset-expiry-sweep",
        now,
        2_000,
        || async {
            tracing::info!("asset expiry sweep");
            Ok(())
        },
    ))?;
    scheduler.add_task(TaskRegistration::new(
        "flaky-probe",
        now,
        1_000,
        || async { Err(CourierError::Task("backend unreachable".to_owned())) },
    ))?;

    tokio::time::sleep(Duration::from_secs(3)).await;

    // Each registration fires once; re-arm the refresh task to exercise the
    // replace-and-clear-marker path.
    scheduler.add_task(session_refresh(scheduler.now_ms()))?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    scheduler.cancel_task("flaky-probe", 1_000);
    scheduler.shutdown();
    tracing::info!("courier-tick-harness shut down cleanly");
    Ok(())
}
