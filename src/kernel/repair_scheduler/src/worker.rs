use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{ContractId, PiecePlacement, RepairResult, TrackedFile};

pub struct UploadWork {
    pub chunk_index: u64,
    pub piece_index: u64,
    pub data: Vec<u8>,
    pub file: Arc<TrackedFile>,
    pub result_tx: mpsc::UnboundedSender<FinishedUpload>,
}

#[derive(Debug)]
pub struct FinishedUpload {
    pub worker_id: ContractId,
    pub result: RepairResult<()>,
}

/// Delivers a piece to the host behind a contract.
#[async_trait]
pub trait PieceUploader: Send + Sync {
    async fn upload(&self, contract_id: &ContractId, work: &UploadWork) -> RepairResult<()>;
}

pub struct Worker {
    pub id: ContractId,
    //unix timestamp of the last failed upload, 0 means never
    pub recent_failure: u64,
    upload_tx: mpsc::Sender<UploadWork>,
}

impl Worker {
    pub fn new(id: ContractId, upload_tx: mpsc::Sender<UploadWork>) -> Self {
        Self {
            id,
            recent_failure: 0,
            upload_tx,
        }
    }

    pub fn is_eligible(&self, now: u64, cooldown_secs: u64) -> bool {
        self.recent_failure == 0 || self.recent_failure.saturating_add(cooldown_secs) < now
    }
}

// locks are held only for a lookup or an update, never across a send
#[derive(Default)]
pub struct WorkerPool {
    workers: RwLock<HashMap<ContractId, Worker>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&self, worker: Worker) {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        workers.insert(worker.id.clone(), worker);
    }

    pub fn remove_worker(&self, id: &ContractId) -> bool {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        workers.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spawn_worker(
        &self,
        id: ContractId,
        uploader: Arc<dyn PieceUploader>,
        queue_capacity: usize,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let (upload_tx, upload_rx) = mpsc::channel(queue_capacity.max(1));
        self.add_worker(Worker::new(id.clone(), upload_tx));
        tokio::spawn(run_worker(id, upload_rx, uploader, stop))
    }

    pub fn eligible_workers(&self, now: u64, cooldown_secs: u64) -> BTreeSet<ContractId> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        workers
            .values()
            .filter(|worker| worker.is_eligible(now, cooldown_secs))
            .map(|worker| worker.id.clone())
            .collect()
    }

    pub fn upload_sender(&self, id: &ContractId) -> Option<mpsc::Sender<UploadWork>> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        workers.get(id).map(|worker| worker.upload_tx.clone())
    }

    pub fn record_failure(&self, id: &ContractId, now: u64) -> bool {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        match workers.get_mut(id) {
            Some(worker) => {
                worker.recent_failure = now;
                true
            }
            None => false,
        }
    }

    pub fn recent_failure(&self, id: &ContractId) -> Option<u64> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        workers.get(id).map(|worker| worker.recent_failure)
    }
}

async fn run_worker(
    id: ContractId,
    mut upload_rx: mpsc::Receiver<UploadWork>,
    uploader: Arc<dyn PieceUploader>,
    stop: CancellationToken,
) {
    debug!("worker {} started", id);
    loop {
        let work = tokio::select! {
            _ = stop.cancelled() => break,
            work = upload_rx.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };

        let result = uploader.upload(&id, &work).await;
        match &result {
            Ok(()) => {
                let placement = PiecePlacement {
                    chunk_index: work.chunk_index,
                    piece_index: work.piece_index,
                };
                work.file.lock().add_piece(&id, placement);
                debug!(
                    "worker {} uploaded {} chunk {} piece {}",
                    id,
                    work.file.name(),
                    work.chunk_index,
                    work.piece_index
                );
            }
            Err(err) => {
                warn!(
                    "worker {} upload {} chunk {} piece {} failed: {}",
                    id,
                    work.file.name(),
                    work.chunk_index,
                    work.piece_index,
                    err
                );
            }
        }

        // the epoch that sent this work may be gone already
        let _ = work.result_tx.send(FinishedUpload {
            worker_id: id.clone(),
            result,
        });
    }
    debug!("worker {} exit", id);
}
