/*
一个epoch对应一次构建好的repair matrix,以及构建时符合条件的worker集合。
epoch是matrix和worker集合唯一的写入者,worker只通过result channel把上传结果送回来。
每轮循环:取当前最大gap数,挑一个chunk把缺失的piece分给空闲的worker,然后等待足够多的worker回来。
最大gap数很大时会故意攒着worker,让后面的chunk可以一次分出一整批。
epoch超时后等所有worker回来再重建matrix,这样新上传的piece能被看到。
*/
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::{
    apply_finished_upload, encode_chunk, get_unix_timestamp, read_chunk, ChunkId, ContractId,
    FinishedUpload, RepairContext, RepairError, RepairMatrix, RepairResult, TrackedFile,
    UploadOutcome, UploadWork, WorkerSets,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStep {
    Dispatched(usize),
    Idle,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochOutcome {
    // no chunk has a usable gap left
    Exhausted,
    // gaps remain but nothing could be dispatched and nothing is in flight
    Stalled,
    // the epoch timed out, build a new matrix
    Rebuild,
    Stopped,
}

#[derive(Clone, Debug, Default)]
pub struct EpochStats {
    pub iterations: u64,
    pub chunks_dispatched: u64,
    pub pieces_dispatched: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub chunks_skipped: u64,
    pub files_added: u64,
}

pub struct RepairEpoch<'a> {
    ctx: &'a RepairContext,
    matrix: RepairMatrix,
    workers: WorkerSets,
    result_tx: mpsc::UnboundedSender<FinishedUpload>,
    result_rx: mpsc::UnboundedReceiver<FinishedUpload>,
    start_time: Instant,
    stats: EpochStats,
}

impl<'a> RepairEpoch<'a> {
    pub fn new(
        ctx: &'a RepairContext,
        matrix: RepairMatrix,
        eligible: BTreeSet<ContractId>,
    ) -> Self {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            matrix,
            workers: WorkerSets::new(eligible),
            result_tx,
            result_rx,
            start_time: Instant::now(),
            stats: EpochStats::default(),
        }
    }

    pub fn matrix(&self) -> &RepairMatrix {
        &self.matrix
    }

    pub fn workers(&self) -> &WorkerSets {
        &self.workers
    }

    pub fn stats(&self) -> &EpochStats {
        &self.stats
    }

    pub(crate) fn workers_mut(&mut self) -> &mut WorkerSets {
        &mut self.workers
    }

    pub(crate) fn result_sender(&self) -> mpsc::UnboundedSender<FinishedUpload> {
        self.result_tx.clone()
    }

    pub async fn run(&mut self, new_files: &mut mpsc::Receiver<Arc<TrackedFile>>) -> EpochOutcome {
        info!(
            "repair epoch start: {} chunks, max gaps {}, {} workers",
            self.matrix.len(),
            self.matrix.max_gaps(),
            self.workers.active_count()
        );
        let outcome = self.dispatch_loop(new_files).await;
        info!(
            "repair epoch end: {:?} after {}s, {} workers retired, stats:{:?}",
            outcome,
            self.start_time.elapsed().as_secs(),
            self.workers.retired().len(),
            self.stats
        );
        outcome
    }

    async fn dispatch_loop(
        &mut self,
        new_files: &mut mpsc::Receiver<Arc<TrackedFile>>,
    ) -> EpochOutcome {
        loop {
            if self.ctx.stop.is_cancelled() {
                return EpochOutcome::Stopped;
            }

            let max_gaps = self.matrix.max_gaps();
            if max_gaps == 0 {
                // collect the tail of the last batch, failures must reach the pool
                let in_flight = self.workers.in_flight_count();
                if in_flight > 0 {
                    debug!("repair matrix exhausted, wait for {} uploads in flight", in_flight);
                    if !self.wait_for_workers(self.workers.active_count()).await {
                        return EpochOutcome::Stopped;
                    }
                }
                return EpochOutcome::Exhausted;
            }
            self.stats.iterations += 1;

            match self.dispatch_next(max_gaps).await {
                DispatchStep::Stopped => return EpochOutcome::Stopped,
                DispatchStep::Dispatched(_) => {}
                DispatchStep::Idle => {
                    if self.workers.in_flight_count() == 0 {
                        // purging retired workers may have lowered max gaps mid-scan
                        if self.matrix.max_gaps() != max_gaps {
                            continue;
                        }
                        warn!(
                            "repair epoch stalled: max gaps {} but no chunk can be dispatched",
                            max_gaps
                        );
                        return EpochOutcome::Stalled;
                    }
                }
            }

            let mut need = self.workers_needed(max_gaps);
            let rebuild = self.start_time.elapsed() > self.ctx.config.epoch_timeout();
            if rebuild {
                need = self.workers.active_count();
                info!(
                    "repair epoch timeout, wait for all {} active workers then rebuild",
                    need
                );
            }

            if !self.wait_for_workers(need).await {
                return EpochOutcome::Stopped;
            }
            if rebuild {
                return EpochOutcome::Rebuild;
            }

            self.fold_new_files(new_files);
        }
    }

    pub async fn dispatch_next(&mut self, max_gaps: usize) -> DispatchStep {
        let batch_threshold = self.ctx.config.batch_threshold;
        for chunk_id in self.matrix.chunk_ids() {
            let useful = match self.matrix.get(&chunk_id) {
                Some(gaps) if gaps.num_gaps() > 0 => self.useful_workers(&gaps.contracts),
                _ => continue,
            };

            if useful.is_empty() {
                continue;
            }
            // small worker sets wait while some chunk still needs a wide batch,
            // retired workers can still sit in this chunk's gaps
            if max_gaps >= batch_threshold && useful.len() < batch_threshold {
                self.matrix.purge_retired(&chunk_id, self.workers.retired());
                continue;
            }

            let (file, pieces) = match self.load_pieces(&chunk_id).await {
                Ok(loaded) => loaded,
                Err(err @ (RepairError::FileNotFound(_) | RepairError::NotTracked(_))) => {
                    debug!("drop stale chunk {} from repair matrix: {}", chunk_id, err);
                    self.matrix.remove(&chunk_id);
                    continue;
                }
                Err(err) => {
                    // TODO: download-and-repair from the hosts when the local copy is gone
                    warn!("skip repair chunk {}: {}", chunk_id, err);
                    self.stats.chunks_skipped += 1;
                    continue;
                }
            };

            match self.hand_out(&chunk_id, file, pieces, useful).await {
                DispatchStep::Idle => continue,
                step => return step,
            }
        }
        DispatchStep::Idle
    }

    fn useful_workers(&self, contracts: &[ContractId]) -> Vec<ContractId> {
        contracts
            .iter()
            .filter(|contract| self.workers.is_available(contract))
            .cloned()
            .collect()
    }

    async fn load_pieces(&self, chunk_id: &ChunkId) -> RepairResult<(Arc<TrackedFile>, Vec<Vec<u8>>)> {
        let ctx = self.ctx;
        let file = ctx
            .store
            .get_file(&chunk_id.file_name)
            .ok_or_else(|| RepairError::FileNotFound(chunk_id.file_name.clone()))?;
        let repair_path = ctx
            .store
            .repair_path(&chunk_id.file_name)
            .ok_or_else(|| RepairError::NotTracked(chunk_id.file_name.clone()))?;

        let (chunk_size, coder, master_key) = {
            let layout = file.lock();
            (
                layout.chunk_size,
                layout.erasure_code.clone(),
                layout.master_key.clone(),
            )
        };

        let data = read_chunk(&repair_path, chunk_id.chunk_index, chunk_size).await?;
        let pieces = encode_chunk(
            coder.as_ref(),
            ctx.keys.as_ref(),
            &master_key,
            chunk_id.chunk_index,
            &data,
        )?;
        Ok((file, pieces))
    }

    async fn hand_out(
        &mut self,
        chunk_id: &ChunkId,
        file: Arc<TrackedFile>,
        pieces: Vec<Vec<u8>>,
        useful: Vec<ContractId>,
    ) -> DispatchStep {
        let ctx = self.ctx;
        let missing = match self.matrix.get(chunk_id) {
            Some(gaps) => gaps.pieces.clone(),
            None => return DispatchStep::Idle,
        };
        let mut pieces: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();

        let mut dispatched = Vec::new();
        for (worker_id, piece_index) in useful.iter().zip(missing.iter()) {
            let data = match pieces.get_mut(*piece_index as usize).and_then(Option::take) {
                Some(data) => data,
                None => {
                    warn!("chunk {} has no encoded piece {}", chunk_id, piece_index);
                    continue;
                }
            };
            let sender = match ctx.pool.upload_sender(worker_id) {
                Some(sender) => sender,
                None => {
                    warn!("worker {} is gone from the pool, retire it", worker_id);
                    self.workers.retire(worker_id);
                    continue;
                }
            };

            let work = UploadWork {
                chunk_index: chunk_id.chunk_index,
                piece_index: *piece_index,
                data,
                file: file.clone(),
                result_tx: self.result_tx.clone(),
            };
            // the queue may be full, don't outlive a shutdown waiting on it
            let sent = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return DispatchStep::Stopped,
                sent = sender.send(work) => sent,
            };
            if sent.is_err() {
                warn!("worker {} upload queue closed, retire it", worker_id);
                self.workers.retire(worker_id);
                continue;
            }

            self.workers.claim(worker_id);
            self.matrix.remove_contract(chunk_id, worker_id);
            dispatched.push(*piece_index);
        }
        let num_gaps = self.matrix.consume_pieces(chunk_id, &dispatched);

        if dispatched.is_empty() {
            return DispatchStep::Idle;
        }
        debug!(
            "dispatch chunk {} pieces {:?}, gaps left {:?}",
            chunk_id, dispatched, num_gaps
        );
        self.stats.chunks_dispatched += 1;
        self.stats.pieces_dispatched += dispatched.len() as u64;
        DispatchStep::Dispatched(dispatched.len())
    }

    // available workers to wait for before the next dispatch
    pub fn workers_needed(&self, max_gaps: usize) -> usize {
        let active = self.workers.active_count();
        let available = self.workers.available_count();
        let exclude = max_gaps.saturating_sub(self.ctx.config.batch_threshold);
        let mut need = active.saturating_sub(exclude);
        if need <= available {
            need = available + 1;
        }
        need.min(active)
    }

    /// Consumes upload results until `need` workers are available. Returns false if stopped.
    pub async fn wait_for_workers(&mut self, mut need: usize) -> bool {
        let ctx = self.ctx;
        while self.workers.available_count() < need {
            let finished = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return false,
                finished = self.result_rx.recv() => finished,
            };
            // the epoch holds a sender, so the channel never closes
            let Some(finished) = finished else {
                return true;
            };

            match apply_finished_upload(&ctx.pool, &mut self.workers, &finished, get_unix_timestamp()) {
                UploadOutcome::Released => self.stats.uploads_succeeded += 1,
                UploadOutcome::Retired => {
                    self.stats.uploads_failed += 1;
                    need = need.saturating_sub(1);
                }
                UploadOutcome::Ignored => {}
            }
        }
        true
    }

    pub(crate) fn fold_new_files(&mut self, new_files: &mut mpsc::Receiver<Arc<TrackedFile>>) {
        while let Ok(file) = new_files.try_recv() {
            let layout = file.lock();
            let added = self
                .matrix
                .add_file(file.name(), &layout, self.workers.active());
            self.stats.files_added += 1;
            info!(
                "new file {} folded into repair matrix, {} chunks added",
                file.name(),
                added
            );
        }
    }
}
