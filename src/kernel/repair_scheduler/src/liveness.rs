use std::collections::BTreeSet;

use crate::{ContractId, FinishedUpload, WorkerPool};

// available ⊆ active ⊆ eligible set of the epoch
#[derive(Clone, Debug, Default)]
pub struct WorkerSets {
    available: BTreeSet<ContractId>,
    active: BTreeSet<ContractId>,
    retired: Vec<ContractId>,
}

impl WorkerSets {
    pub fn new(eligible: BTreeSet<ContractId>) -> Self {
        Self {
            available: eligible.clone(),
            active: eligible,
            retired: Vec::new(),
        }
    }

    pub fn available(&self) -> &BTreeSet<ContractId> {
        &self.available
    }

    pub fn active(&self) -> &BTreeSet<ContractId> {
        &self.active
    }

    pub fn retired(&self) -> &[ContractId] {
        self.retired.as_slice()
    }

    pub fn is_available(&self, id: &ContractId) -> bool {
        self.available.contains(id)
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.active.len() - self.available.len()
    }

    pub fn claim(&mut self, id: &ContractId) -> bool {
        self.available.remove(id)
    }

    pub fn release(&mut self, id: &ContractId) -> bool {
        if !self.active.contains(id) {
            return false;
        }
        self.available.insert(id.clone())
    }

    // false if it was not active
    pub fn retire(&mut self, id: &ContractId) -> bool {
        self.available.remove(id);
        if !self.active.remove(id) {
            return false;
        }
        self.retired.push(id.clone());
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Released,
    Retired,
    Ignored,
}

/// Folds one upload result into the epoch's worker sets. A failure is recorded on the pool
/// so the worker also sits out the following epochs until its cooldown expires.
pub fn apply_finished_upload(
    pool: &WorkerPool,
    sets: &mut WorkerSets,
    finished: &FinishedUpload,
    now: u64,
) -> UploadOutcome {
    match &finished.result {
        Ok(()) => {
            if sets.release(&finished.worker_id) {
                UploadOutcome::Released
            } else {
                UploadOutcome::Ignored
            }
        }
        Err(err) => {
            debug!(
                "Error while performing upload to {} :: {}",
                finished.worker_id, err
            );
            if !pool.record_failure(&finished.worker_id, now) {
                warn!("failed worker {} is no longer in pool", finished.worker_id);
            }
            if sets.retire(&finished.worker_id) {
                UploadOutcome::Retired
            } else {
                UploadOutcome::Ignored
            }
        }
    }
}
