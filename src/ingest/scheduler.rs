// src/ingest/scheduler.rs
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::{CycleError, IngestOrchestrator};

pub const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
}

impl Default for IngestSchedulerCfg {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Handle to the background loop.
/// Dropping it leaves the loop running.
pub struct SchedulerHandle {
    stop: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the loop to exit after the current cycle and wait for it.
    pub async fn stop(self) {
        self.stop.notify_one();
        let _ = self.join.await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the ingestion loop: one cycle right away, then one per interval.
/// Each cycle runs in its own task so a panic is logged and the loop keeps going.
pub fn spawn_ingest_scheduler(
    orchestrator: Arc<IngestOrchestrator>,
    cfg: IngestSchedulerCfg,
) -> SchedulerHandle {
    let stop = Arc::new(Notify::new());
    let stop_rx = stop.clone();
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.notified() => break,
                _ = ticker.tick() => {}
            }

            let o = orchestrator.clone();
            match tokio::spawn(async move { o.run_cycle().await }).await {
                Ok(Ok(_report)) => {
                    counter!("f1pulse_ingest_cycles_total", "result" => "ok").increment(1);
                }
                Ok(Err(CycleError::AlreadyRunning)) => {
                    tracing::warn!(target: "ingest", "previous cycle still running; tick skipped");
                    counter!("f1pulse_ingest_cycles_total", "result" => "skipped").increment(1);
                }
                Err(join_err) => {
                    tracing::error!(target: "ingest", error = %join_err, "ingestion cycle panicked");
                    counter!("f1pulse_ingest_cycles_total", "result" => "panicked").increment(1);
                }
            }
        }
        tracing::info!(target: "ingest", "ingest scheduler stopped");
    });

    SchedulerHandle { stop, join }
}
