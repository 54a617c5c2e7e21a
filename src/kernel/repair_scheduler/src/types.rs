use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a hosting contract. A worker is bound to exactly one contract and shares its id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId(pub String);

impl ContractId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ContractId {
    fn from(s: &str) -> Self {
        ContractId(s.to_string())
    }
}

impl From<String> for ContractId {
    fn from(s: String) -> Self {
        ContractId(s)
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    pub file_name: String,
    pub chunk_index: u64,
}

impl ChunkId {
    pub fn new(file_name: &str, chunk_index: u64) -> Self {
        Self {
            file_name: file_name.to_string(),
            chunk_index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_name, self.chunk_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiecePlacement {
    pub chunk_index: u64,
    pub piece_index: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileContract {
    pub id: ContractId,
    pub pieces: Vec<PiecePlacement>,
}

impl FileContract {
    pub fn new(id: ContractId) -> Self {
        Self { id, pieces: Vec::new() }
    }
}
