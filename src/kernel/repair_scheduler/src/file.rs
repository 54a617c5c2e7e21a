use std::sync::{Arc, Mutex, MutexGuard};

use crate::{ContractId, ErasureCoder, FileContract, MasterKey, PiecePlacement};

/// Chunk/contract layout of a file, read by the scheduler under the file lock.
pub struct FileLayout {
    pub file_size: u64,
    pub chunk_size: u64,
    pub erasure_code: Arc<dyn ErasureCoder>,
    pub master_key: MasterKey,
    pub contracts: Vec<FileContract>,
}

impl FileLayout {
    pub fn new(
        file_size: u64,
        chunk_size: u64,
        erasure_code: Arc<dyn ErasureCoder>,
        master_key: MasterKey,
    ) -> Self {
        Self {
            file_size,
            chunk_size,
            erasure_code,
            master_key,
            contracts: Vec::new(),
        }
    }

    // an empty file still owns one chunk
    pub fn num_chunks(&self) -> u64 {
        if self.chunk_size == 0 {
            return 1;
        }
        let num = self.file_size.div_ceil(self.chunk_size);
        num.max(1)
    }

    pub fn num_pieces(&self) -> usize {
        self.erasure_code.num_pieces()
    }

    // false when the contract already held this placement
    pub fn add_piece(&mut self, contract_id: &ContractId, placement: PiecePlacement) -> bool {
        let contract = match self.contracts.iter_mut().position(|c| &c.id == contract_id) {
            Some(pos) => &mut self.contracts[pos],
            None => {
                self.contracts.push(FileContract::new(contract_id.clone()));
                let last = self.contracts.len() - 1;
                &mut self.contracts[last]
            }
        };
        if contract.pieces.contains(&placement) {
            return false;
        }
        contract.pieces.push(placement);
        true
    }
}

pub struct TrackedFile {
    name: String,
    layout: Mutex<FileLayout>,
}

impl TrackedFile {
    pub fn new(name: &str, layout: FileLayout) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            layout: Mutex::new(layout),
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The per-file lock. Never hold the guard across an await point.
    pub fn lock(&self) -> MutexGuard<'_, FileLayout> {
        // a poisoned layout is still a consistent list of placements
        self.layout.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TrackedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackedFile({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepairResult;

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

    fn layout(file_size: u64, chunk_size: u64) -> FileLayout {
        FileLayout::new(file_size, chunk_size, Arc::new(Copies(3)), MasterKey(vec![7]))
    }

    #[test]
    fn test_num_chunks() {
        assert_eq!(layout(0, 16).num_chunks(), 1);
        assert_eq!(layout(16, 16).num_chunks(), 1);
        assert_eq!(layout(17, 16).num_chunks(), 2);
        assert_eq!(layout(64, 16).num_chunks(), 4);
    }

    #[test]
    fn test_add_piece() {
        let file = TrackedFile::new("a.txt", layout(32, 16));
        let c1 = ContractId::from("c1");
        let placement = PiecePlacement {
            chunk_index: 1,
            piece_index: 2,
        };
        assert!(file.lock().add_piece(&c1, placement));
        assert!(!file.lock().add_piece(&c1, placement));
        assert!(file.lock().add_piece(
            &c1,
            PiecePlacement {
                chunk_index: 0,
                piece_index: 2,
            }
        ));

        let layout = file.lock();
        assert_eq!(layout.contracts.len(), 1);
        assert_eq!(layout.contracts[0].pieces.len(), 2);
    }
}
