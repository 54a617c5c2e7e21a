use std::collections::BTreeMap;

use crate::ContractId;

/// Missing pieces and missing contracts of one chunk. `num_gaps` is the number of pieces
/// that could be placed in one pass: every placement uses up one of each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkGaps {
    pub contracts: Vec<ContractId>,
    pub pieces: Vec<u64>,
    num_gaps: usize,
}

impl ChunkGaps {
    pub fn new(contracts: Vec<ContractId>, pieces: Vec<u64>) -> Self {
        let mut gaps = Self {
            contracts,
            pieces,
            num_gaps: 0,
        };
        gaps.recompute();
        gaps
    }

    pub fn num_gaps(&self) -> usize {
        self.num_gaps
    }

    pub fn recompute(&mut self) -> usize {
        self.num_gaps = std::cmp::min(self.contracts.len(), self.pieces.len());
        self.num_gaps
    }

    pub fn remove_contract(&mut self, id: &ContractId) -> bool {
        match self.contracts.iter().position(|c| c == id) {
            Some(pos) => {
                self.contracts.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GapHistogram {
    buckets: BTreeMap<usize, usize>,
}

impl GapHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, num_gaps: usize) {
        *self.buckets.entry(num_gaps).or_insert(0) += 1;
    }

    pub fn decrement(&mut self, num_gaps: usize) {
        if let Some(count) = self.buckets.get_mut(&num_gaps) {
            *count -= 1;
            if *count == 0 {
                self.buckets.remove(&num_gaps);
            }
        } else {
            warn!("gap histogram has no chunk in bucket {}", num_gaps);
        }
    }

    pub fn move_chunk(&mut self, old_gaps: usize, new_gaps: usize) {
        if old_gaps == new_gaps {
            return;
        }
        self.decrement(old_gaps);
        self.increment(new_gaps);
    }

    pub fn count(&self, num_gaps: usize) -> usize {
        self.buckets.get(&num_gaps).copied().unwrap_or(0)
    }

    /// Largest gap count held by any chunk, 0 when nothing is repairable.
    pub fn max_gaps(&self) -> usize {
        // empty buckets are dropped, so the last key is the answer
        self.buckets.keys().next_back().copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.buckets.values().sum()
    }

    pub fn buckets(&self) -> &BTreeMap<usize, usize> {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_gaps_is_the_scarcer_side() {
        let contracts = vec![ContractId::from("a"), ContractId::from("b")];
        let mut gaps = ChunkGaps::new(contracts, vec![0, 1, 2]);
        assert_eq!(gaps.num_gaps(), 2);
        assert!(gaps.remove_contract(&ContractId::from("a")));
        assert!(!gaps.remove_contract(&ContractId::from("a")));
        assert_eq!(gaps.num_gaps(), 2);
        assert_eq!(gaps.recompute(), 1);
        gaps.pieces.clear();
        assert_eq!(gaps.recompute(), 0);
    }

    #[test]
    fn test_histogram_max_gaps() {
        let mut histogram = GapHistogram::new();
        assert_eq!(histogram.max_gaps(), 0);
        histogram.increment(0);
        assert_eq!(histogram.max_gaps(), 0);
        histogram.increment(3);
        histogram.increment(5);
        histogram.increment(5);
        assert_eq!(histogram.max_gaps(), 5);
        assert_eq!(histogram.total(), 4);

        histogram.move_chunk(5, 1);
        assert_eq!(histogram.max_gaps(), 5);
        histogram.move_chunk(5, 0);
        assert_eq!(histogram.max_gaps(), 3);
        assert_eq!(histogram.count(0), 2);
        assert_eq!(histogram.count(5), 0);
        assert_eq!(histogram.total(), 4);
    }
}
