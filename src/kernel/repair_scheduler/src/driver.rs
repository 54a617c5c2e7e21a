use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    build_repair_matrix, get_unix_timestamp, EpochOutcome, KeyDeriver, RepairConfig, RepairEpoch,
    TrackedFile, TrackingStore, WorkerPool,
};

pub struct RepairContext {
    pub store: Arc<dyn TrackingStore>,
    pub pool: Arc<WorkerPool>,
    pub keys: Arc<dyn KeyDeriver>,
    pub config: RepairConfig,
    pub stop: CancellationToken,
}

pub fn new_file_channel(
    config: &RepairConfig,
) -> (
    mpsc::Sender<Arc<TrackedFile>>,
    mpsc::Receiver<Arc<TrackedFile>>,
) {
    mpsc::channel(config.new_file_queue_capacity.max(1))
}

/// Keeps tracked files at full redundancy: every epoch rebuilds the repair matrix from the
/// current placements and dispatches until the matrix is exhausted or stale.
pub struct RepairLoop {
    ctx: RepairContext,
    new_files: mpsc::Receiver<Arc<TrackedFile>>,
}

impl RepairLoop {
    pub fn new(ctx: RepairContext, new_files: mpsc::Receiver<Arc<TrackedFile>>) -> Self {
        Self { ctx, new_files }
    }

    pub fn context(&self) -> &RepairContext {
        &self.ctx
    }

    pub async fn run(mut self) {
        info!("repair loop start.");
        let mut loop_step: u64 = 0;
        loop {
            if self.ctx.stop.is_cancelled() {
                break;
            }
            loop_step += 1;
            debug!("repair loop step:{}.", loop_step);
            if self.repair_iteration().await == EpochOutcome::Stopped {
                break;
            }
        }
        info!("repair loop stopped after {} steps.", loop_step);
    }

    /// Runs one epoch. When there is nothing to dispatch it idles until the stop token, the
    /// idle timer or a new file, whichever comes first.
    pub async fn repair_iteration(&mut self) -> EpochOutcome {
        let eligible = self.ctx.pool.eligible_workers(
            get_unix_timestamp(),
            self.ctx.config.failure_cooldown_secs,
        );
        let matrix = build_repair_matrix(self.ctx.store.as_ref(), &eligible);
        if matrix.max_gaps() == 0 {
            return self.idle(EpochOutcome::Exhausted).await;
        }

        let outcome = {
            let mut epoch = RepairEpoch::new(&self.ctx, matrix, eligible);
            epoch.run(&mut self.new_files).await
        };
        match outcome {
            EpochOutcome::Stalled => self.idle(EpochOutcome::Stalled).await,
            _ => outcome,
        }
    }

    async fn idle(&mut self, reason: EpochOutcome) -> EpochOutcome {
        debug!(
            "repair loop idle ({:?}) for up to {}s",
            reason, self.ctx.config.idle_interval_secs
        );
        let stop = self.ctx.stop.clone();
        let sleep = tokio::time::sleep(self.ctx.config.idle_interval());
        tokio::pin!(sleep);

        let file = tokio::select! {
            _ = stop.cancelled() => return EpochOutcome::Stopped,
            _ = &mut sleep => return reason,
            file = self.new_files.recv() => file,
        };
        match file {
            Some(file) => {
                // the file is already in the store, the next rebuild picks it up
                info!("new file {} arrived, rebuild repair matrix", file.name());
                reason
            }
            None => {
                // nobody can announce files any more, fall back to the timer
                tokio::select! {
                    _ = stop.cancelled() => EpochOutcome::Stopped,
                    _ = &mut sleep => reason,
                }
            }
        }
    }
}
