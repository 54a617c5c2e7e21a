use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::{ChunkGaps, ChunkId, ContractId, FileLayout, GapHistogram, TrackingStore};

// chunks at 0 gaps stay (bucket 0) until the next rebuild
#[derive(Clone, Debug, Default)]
pub struct RepairMatrix {
    chunks: BTreeMap<ChunkId, ChunkGaps>,
    histogram: GapHistogram,
}

impl RepairMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn max_gaps(&self) -> usize {
        self.histogram.max_gaps()
    }

    pub fn histogram(&self) -> &GapHistogram {
        &self.histogram
    }

    pub fn get(&self, id: &ChunkId) -> Option<&ChunkGaps> {
        self.chunks.get(id)
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.chunks.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChunkId, &ChunkGaps)> {
        self.chunks.iter()
    }

    /// Adds every incomplete chunk of the file that is not in the matrix yet, returns the
    /// number inserted.
    pub fn add_file(
        &mut self,
        file_name: &str,
        layout: &FileLayout,
        workers: &BTreeSet<ContractId>,
    ) -> usize {
        let num_chunks = layout.num_chunks() as usize;
        let num_pieces = layout.num_pieces();

        // one pass over all contracts
        let mut present_pieces = vec![vec![false; num_pieces]; num_chunks];
        let mut utilized_contracts: Vec<BTreeSet<&ContractId>> = vec![BTreeSet::new(); num_chunks];
        for contract in layout.contracts.iter() {
            for piece in contract.pieces.iter() {
                let chunk = piece.chunk_index as usize;
                if chunk >= num_chunks {
                    warn!(
                        "{} contract {} holds piece of unknown chunk {}",
                        file_name, contract.id, piece.chunk_index
                    );
                    continue;
                }
                utilized_contracts[chunk].insert(&contract.id);
                if let Some(present) = present_pieces[chunk].get_mut(piece.piece_index as usize) {
                    *present = true;
                }
            }
        }

        let mut inserted = 0;
        for chunk_index in 0..num_chunks {
            let present = &present_pieces[chunk_index];
            if present.iter().all(|p| *p) {
                continue;
            }

            let chunk_id = ChunkId::new(file_name, chunk_index as u64);
            let entry = match self.chunks.entry(chunk_id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => entry,
            };

            let pieces: Vec<u64> = present
                .iter()
                .enumerate()
                .filter(|(_, p)| !**p)
                .map(|(index, _)| index as u64)
                .collect();
            let contracts: Vec<ContractId> = workers
                .iter()
                .filter(|worker| !utilized_contracts[chunk_index].contains(worker))
                .cloned()
                .collect();

            let gaps = ChunkGaps::new(contracts, pieces);
            self.histogram.increment(gaps.num_gaps());
            entry.insert(gaps);
            inserted += 1;
        }

        if inserted > 0 {
            debug!(
                "add {} incomplete chunks of {} to repair matrix",
                inserted, file_name
            );
        }
        inserted
    }

    // all mutation goes through here so the histogram follows
    pub fn modify<F>(&mut self, id: &ChunkId, f: F) -> Option<usize>
    where
        F: FnOnce(&mut ChunkGaps),
    {
        let gaps = self.chunks.get_mut(id)?;
        let old_gaps = gaps.num_gaps();
        f(gaps);
        let new_gaps = gaps.recompute();
        self.histogram.move_chunk(old_gaps, new_gaps);
        Some(new_gaps)
    }

    pub fn purge_retired(&mut self, id: &ChunkId, retired: &[ContractId]) -> Option<usize> {
        if retired.is_empty() {
            return self.get(id).map(|gaps| gaps.num_gaps());
        }
        self.modify(id, |gaps| {
            gaps.contracts.retain(|contract| !retired.contains(contract));
        })
    }

    pub fn remove_contract(&mut self, id: &ChunkId, contract: &ContractId) -> Option<usize> {
        self.modify(id, |gaps| {
            gaps.remove_contract(contract);
        })
    }

    pub fn consume_pieces(&mut self, id: &ChunkId, pieces: &[u64]) -> Option<usize> {
        self.modify(id, |gaps| {
            gaps.pieces.retain(|piece| !pieces.contains(piece));
        })
    }

    pub fn remove(&mut self, id: &ChunkId) -> Option<ChunkGaps> {
        let gaps = self.chunks.remove(id)?;
        self.histogram.decrement(gaps.num_gaps());
        Some(gaps)
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        if self.histogram.total() != self.chunks.len() {
            return Err(format!(
                "histogram holds {} chunks, matrix holds {}",
                self.histogram.total(),
                self.chunks.len()
            ));
        }
        let mut expect = GapHistogram::new();
        for (id, gaps) in self.chunks.iter() {
            let num_gaps = std::cmp::min(gaps.contracts.len(), gaps.pieces.len());
            if gaps.num_gaps() != num_gaps {
                return Err(format!(
                    "chunk {} has gap count {}, expect {}",
                    id,
                    gaps.num_gaps(),
                    num_gaps
                ));
            }
            expect.increment(num_gaps);
        }
        if expect != self.histogram {
            return Err(format!(
                "histogram {:?} does not match chunks {:?}",
                self.histogram.buckets(),
                expect.buckets()
            ));
        }
        Ok(())
    }
}

pub fn build_repair_matrix(store: &dyn TrackingStore, workers: &BTreeSet<ContractId>) -> RepairMatrix {
    let mut matrix = RepairMatrix::new();
    for file in store.tracked_files() {
        let layout = file.lock();
        matrix.add_file(file.name(), &layout, workers);
    }
    info!(
        "build repair matrix: {} chunks, max gaps {}, {} workers",
        matrix.len(),
        matrix.max_gaps(),
        workers.len()
    );
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ErasureCoder, FileContract, MasterKey, MemoryTrackingStore, PiecePlacement, RepairResult,
        TrackedFile,
    };
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Copies(usize);

    impl ErasureCoder for Copies {
        fn num_pieces(&self) -> usize {
            self.0
        }
        fn min_pieces(&self) -> usize {
            1
        }
        fn encode(&self, data: &[u8]) -> RepairResult<Vec<Vec<u8>>> {
            Ok(vec![data.to_vec(); self.0])
        }
    }

    fn ids(list: &[&str]) -> BTreeSet<ContractId> {
        list.iter().map(|id| ContractId::from(*id)).collect()
    }

    fn contract(id: &str, placements: &[(u64, u64)]) -> FileContract {
        FileContract {
            id: ContractId::from(id),
            pieces: placements
                .iter()
                .map(|(chunk_index, piece_index)| PiecePlacement {
                    chunk_index: *chunk_index,
                    piece_index: *piece_index,
                })
                .collect(),
        }
    }

    // 2 chunks x 3 pieces; chunk 0 complete, chunk 1 has piece 0 on c1
    fn test_layout() -> FileLayout {
        let mut layout = FileLayout::new(32, 16, Arc::new(Copies(3)), MasterKey(vec![1]));
        layout.contracts = vec![
            contract("c1", &[(0, 0), (1, 0)]),
            contract("c2", &[(0, 1)]),
            contract("c3", &[(0, 2)]),
        ];
        layout
    }

    #[test]
    fn test_add_file_computes_gaps() {
        let mut matrix = RepairMatrix::new();
        let workers = ids(&["c1", "c2", "c4"]);
        let inserted = matrix.add_file("f", &test_layout(), &workers);
        assert_eq!(inserted, 1);
        assert!(matrix.get(&ChunkId::new("f", 0)).is_none());

        let gaps = matrix.get(&ChunkId::new("f", 1)).unwrap();
        assert_eq!(gaps.pieces, vec![1, 2]);
        // c1 already stores a piece of chunk 1, c3 is not a worker
        assert_eq!(gaps.contracts, vec![ContractId::from("c2"), ContractId::from("c4")]);
        assert_eq!(gaps.num_gaps(), 2);
        assert_eq!(matrix.max_gaps(), 2);
        matrix.check_invariants().unwrap();
    }

    #[test]
    fn test_add_file_is_idempotent() {
        let mut matrix = RepairMatrix::new();
        let workers = ids(&["c2", "c4"]);
        let layout = test_layout();
        matrix.add_file("f", &layout, &workers);
        matrix.remove_contract(&ChunkId::new("f", 1), &ContractId::from("c4"));
        let before = matrix.get(&ChunkId::new("f", 1)).cloned();

        assert_eq!(matrix.add_file("f", &layout, &workers), 0);
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.get(&ChunkId::new("f", 1)).cloned(), before);
        matrix.check_invariants().unwrap();
    }

    #[test]
    fn test_no_workers_means_zero_gaps() {
        let mut matrix = RepairMatrix::new();
        matrix.add_file("f", &test_layout(), &BTreeSet::new());
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.max_gaps(), 0);
        assert_eq!(matrix.histogram().count(0), 1);
    }

    #[test]
    fn test_mutations_keep_histogram_in_step() {
        let mut matrix = RepairMatrix::new();
        let workers = ids(&["w1", "w2", "w3", "w4", "w5"]);
        let mut layout = FileLayout::new(48, 16, Arc::new(Copies(6)), MasterKey(vec![1]));
        layout.contracts = vec![contract("c9", &[(2, 0)])];
        matrix.add_file("f", &layout, &workers);
        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix.histogram().count(5), 3);

        let c0 = ChunkId::new("f", 0);
        assert_eq!(matrix.purge_retired(&c0, &[ContractId::from("w1")]), Some(4));
        matrix.check_invariants().unwrap();
        assert_eq!(matrix.consume_pieces(&c0, &[0, 1, 2, 3]), Some(2));
        matrix.check_invariants().unwrap();
        assert_eq!(matrix.remove_contract(&c0, &ContractId::from("w2")), Some(2));
        matrix.check_invariants().unwrap();

        assert!(matrix.remove(&ChunkId::new("f", 2)).is_some());
        assert_eq!(matrix.len(), 2);
        matrix.check_invariants().unwrap();
        assert_eq!(matrix.max_gaps(), 5);
        assert_eq!(matrix.modify(&ChunkId::new("f", 9), |_| {}), None);
    }

    #[test]
    fn test_build_skips_untracked_files() {
        let store = MemoryTrackingStore::new();
        store.add_file(TrackedFile::new("tracked", test_layout()));
        store.add_file(TrackedFile::new("untracked", test_layout()));
        store.track("tracked", PathBuf::from("/tmp/tracked"));

        let matrix = build_repair_matrix(&store, &ids(&["c4"]));
        assert_eq!(matrix.len(), 1);
        assert!(matrix.get(&ChunkId::new("tracked", 1)).is_some());
        matrix.check_invariants().unwrap();
    }
}
