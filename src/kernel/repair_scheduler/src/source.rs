use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{RepairError, RepairResult};

/// Reads chunk `chunk_index` from the local repair source. A chunk cut short by the end
/// of the file is returned zero padded.
pub async fn read_chunk(path: &Path, chunk_index: u64, chunk_size: u64) -> RepairResult<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await.map_err(|err| {
        RepairError::SourceUnavailable(format!("open {} failed: {}", path.to_string_lossy(), err))
    })?;

    let offset = chunk_index
        .checked_mul(chunk_size)
        .ok_or_else(|| RepairError::IoError(format!("chunk {} offset overflow", chunk_index)))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|err| RepairError::IoError(format!("seek to {} failed: {}", offset, err)))?;

    let mut chunk = vec![0u8; chunk_size as usize];
    let mut read_len = 0;
    while read_len < chunk.len() {
        let n = file
            .read(&mut chunk[read_len..])
            .await
            .map_err(|err| RepairError::IoError(format!("read chunk {} failed: {}", chunk_index, err)))?;
        if n == 0 {
            break;
        }
        read_len += n;
    }
    if read_len < chunk.len() {
        debug!(
            "{} chunk {} is partial, {} of {} bytes",
            path.to_string_lossy(),
            chunk_index,
            read_len,
            chunk_size
        );
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_read_full_and_partial_chunk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();

        let first = read_chunk(file.path(), 0, 4).await.unwrap();
        assert_eq!(first, vec![1, 2, 3, 4]);
        let second = read_chunk(file.path(), 1, 4).await.unwrap();
        assert_eq!(second, vec![5, 6, 0, 0]);
        // past the end is still a (fully padded) partial chunk
        let third = read_chunk(file.path(), 5, 4).await.unwrap();
        assert_eq!(third, vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_chunk(&dir.path().join("gone.bin"), 0, 4).await;
        assert!(matches!(result, Err(RepairError::SourceUnavailable(_))));
    }
}
