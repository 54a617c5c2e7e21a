use crate::{RepairError, RepairResult};

/// Erasure coding scheme of a file: every chunk becomes `num_pieces` pieces, any
/// `min_pieces` of which rebuild it.
pub trait ErasureCoder: Send + Sync {
    fn num_pieces(&self) -> usize;
    fn min_pieces(&self) -> usize;
    fn encode(&self, data: &[u8]) -> RepairResult<Vec<Vec<u8>>>;
}

pub trait PieceCipher: Send {
    fn encrypt(&self, plain: &[u8]) -> RepairResult<Vec<u8>>;
}

/// Derives the per-piece key from a file's master key. Must be deterministic so a piece
/// uploaded by a repair decrypts like the one it replaces.
pub trait KeyDeriver: Send + Sync {
    fn derive(
        &self,
        master_key: &MasterKey,
        chunk_index: u64,
        piece_index: u64,
    ) -> RepairResult<Box<dyn PieceCipher>>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey(pub Vec<u8>);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey(<{} bytes>)", self.0.len())
    }
}

// 编码并加密一个chunk的全部piece,任何一个piece失败都视为整个chunk失败
pub fn encode_chunk(
    coder: &dyn ErasureCoder,
    keys: &dyn KeyDeriver,
    master_key: &MasterKey,
    chunk_index: u64,
    data: &[u8],
) -> RepairResult<Vec<Vec<u8>>> {
    let pieces = coder.encode(data)?;
    if pieces.len() != coder.num_pieces() {
        return Err(RepairError::EncodeError(format!(
            "chunk {} encoded into {} pieces, expect {}",
            chunk_index,
            pieces.len(),
            coder.num_pieces()
        )));
    }

    let mut encrypted = Vec::with_capacity(pieces.len());
    for (piece_index, piece) in pieces.iter().enumerate() {
        let key = keys.derive(master_key, chunk_index, piece_index as u64)?;
        encrypted.push(key.encrypt(piece)?);
    }
    Ok(encrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SplitCoder {
        pieces: usize,
    }

    impl ErasureCoder for SplitCoder {
        fn num_pieces(&self) -> usize {
            self.pieces
        }

        fn min_pieces(&self) -> usize {
            1
        }

        fn encode(&self, data: &[u8]) -> RepairResult<Vec<Vec<u8>>> {
            Ok((0..self.pieces).map(|_| data.to_vec()).collect())
        }
    }

    struct AddCipher(u8);

    impl PieceCipher for AddCipher {
        fn encrypt(&self, plain: &[u8]) -> RepairResult<Vec<u8>> {
            Ok(plain.iter().map(|b| b.wrapping_add(self.0)).collect())
        }
    }

    struct PieceKeys {
        fail_piece: Option<u64>,
    }

    impl KeyDeriver for PieceKeys {
        fn derive(
            &self,
            _master_key: &MasterKey,
            _chunk_index: u64,
            piece_index: u64,
        ) -> RepairResult<Box<dyn PieceCipher>> {
            if self.fail_piece == Some(piece_index) {
                return Err(RepairError::EncryptionError("bad key".to_string()));
            }
            Ok(Box::new(AddCipher(piece_index as u8)))
        }
    }

    #[test]
    fn test_each_piece_gets_its_own_key() {
        let coder = SplitCoder { pieces: 3 };
        let keys = PieceKeys { fail_piece: None };
        let pieces = encode_chunk(&coder, &keys, &MasterKey(vec![1]), 0, &[10, 20]).unwrap();
        assert_eq!(pieces, vec![vec![10, 20], vec![11, 21], vec![12, 22]]);
    }

    #[test]
    fn test_encryption_failure_fails_whole_chunk() {
        let coder = SplitCoder { pieces: 3 };
        let keys = PieceKeys {
            fail_piece: Some(1),
        };
        let result = encode_chunk(&coder, &keys, &MasterKey(vec![1]), 0, &[10]);
        assert!(matches!(result, Err(RepairError::EncryptionError(_))));
    }

    #[test]
    fn test_wrong_piece_count_is_encode_error() {
        struct ShortCoder;
        impl ErasureCoder for ShortCoder {
            fn num_pieces(&self) -> usize {
                3
            }
            fn min_pieces(&self) -> usize {
                2
            }
            fn encode(&self, data: &[u8]) -> RepairResult<Vec<Vec<u8>>> {
                Ok(vec![data.to_vec()])
            }
        }
        let keys = PieceKeys { fail_piece: None };
        let result = encode_chunk(&ShortCoder, &keys, &MasterKey(vec![]), 2, &[1]);
        assert!(matches!(result, Err(RepairError::EncodeError(_))));
    }
}
