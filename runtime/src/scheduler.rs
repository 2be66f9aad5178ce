//! Periodic expiry sweeps with graceful shutdown.
//!
//! The sweeper itself is stateless; this task decides *when* it runs. Each
//! tick sweeps at the engine clock's current time and always runs to
//! completion before shutdown is honoured.

use metrics::counter;
use spotwatch_core::engine::ParkingEngine;
use spotwatch_core::sweeper::SweepReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs [`ParkingEngine::sweep_now`] on a fixed interval
pub struct SweepScheduler {
    engine: Arc<ParkingEngine>,
    interval: Duration,
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the loop to exit.
    ///
    /// Returns the number of sweeps performed.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(sweeps) => sweeps,
            Err(err) => {
                tracing::error!(error = %err, "Sweep scheduler task failed");
                0
            }
        }
    }
}

impl SweepScheduler {
    /// Creates a scheduler; a zero interval is bumped to one second
    #[must_use]
    pub fn new(engine: Arc<ParkingEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Spawns the sweep loop on the current runtime
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(self.run(signal));
        SchedulerHandle { shutdown, task }
    }

    /// Sweeps on every tick until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so startup does not sweep.
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Sweep scheduler started");
        let mut sweeps = 0_u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep_once();
                    sweeps += 1;
                    if !report.is_empty() {
                        tracing::info!(
                            expired = report.expired,
                            completed = report.completed,
                            "Scheduled sweep transitioned reservations"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(sweeps, "Sweep scheduler stopped");
        sweeps
    }

    fn sweep_once(&self) -> SweepReport {
        counter!("spotwatch_sweeps_total").increment(1);
        self.engine.sweep_now()
    }
}
