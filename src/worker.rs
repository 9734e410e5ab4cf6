//! Periodic incident impact worker

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use transitpulse_core::impact::{CycleReport, ImpactEngine, IncidentSource};
use transitpulse_core::{Error, ErrorKind};

/// Handle of the background task running impact cycles.
///
/// Cycles run on the blocking pool, one at a time. A cycle exceeding its
/// timeout is left to finish, and ticks are skipped until it has.
pub struct ImpactWorker {
    engine: Arc<ImpactEngine>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ImpactWorker {
    pub fn spawn(
        engine: Arc<ImpactEngine>,
        source: Arc<dyn IncidentSource>,
        poll_interval: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(run(
            Arc::clone(&engine),
            source,
            poll_interval,
            cycle_timeout,
            stop,
        ));
        info!(?poll_interval, ?cycle_timeout, "Impact worker started");
        Self {
            engine,
            shutdown,
            task,
        }
    }

    pub fn engine(&self) -> &Arc<ImpactEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops ticking and waits for the task to exit. A cycle already on the
    /// blocking pool still completes.
    pub async fn shutdown(self) {
        // The receiver is gone only if the task already exited
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Impact worker terminated abnormally");
        }
        info!("Impact worker stopped");
    }
}

type Cycle = JoinHandle<Result<CycleReport, Error>>;

async fn run(
    engine: Arc<ImpactEngine>,
    source: Arc<dyn IncidentSource>,
    poll_interval: Duration,
    cycle_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut overrun: Option<Cycle> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        if let Some(previous) = overrun.take() {
            if !previous.is_finished() {
                debug!("Previous impact cycle still running, skipping tick");
                overrun = Some(previous);
                continue;
            }
            log_outcome(previous.await);
        }

        let (engine, source) = (Arc::clone(&engine), Arc::clone(&source));
        let mut cycle: Cycle =
            tokio::task::spawn_blocking(move || engine.run_source_cycle(source.as_ref()));
        match tokio::time::timeout(cycle_timeout, &mut cycle).await {
            Ok(outcome) => log_outcome(outcome),
            Err(_) => {
                warn!(?cycle_timeout, "Impact cycle exceeded its time budget");
                overrun = Some(cycle);
            }
        }
    }
}

fn log_outcome(outcome: Result<Result<CycleReport, Error>, tokio::task::JoinError>) {
    match outcome {
        Ok(Ok(report)) => {
            if report.edges_patched > 0 || report.edges_reset > 0 || report.incidents_failed > 0 {
                info!(
                    incidents = report.incidents_seen,
                    ignored = report.incidents_ignored,
                    failed = report.incidents_failed,
                    active = report.active_buckets,
                    patched = report.edges_patched,
                    reset = report.edges_reset,
                    "Impact cycle applied"
                );
            } else {
                debug!(incidents = report.incidents_seen, "Impact cycle without changes");
            }
            if report.patch_failures > 0 {
                warn!(failures = report.patch_failures, "Some edges could not be patched");
            }
        }
        Ok(Err(e)) if e.kind() == ErrorKind::TransientSource => {
            warn!(error = %e, "Incident source unavailable, retrying next tick");
        }
        Ok(Err(e)) => error!(error = %e, "Impact cycle failed"),
        Err(e) => error!(error = %e, "Impact cycle panicked"),
    }
}
