use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use tusk_storage::{ChunkStager, StagedChunk};

/// Hex SHA-256 of `data`, for comparing reassembled content.
pub fn sha256_hash(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// Reproducible pseudo-random payload: the same seed always yields the same
/// bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut state = seed;
    let data: Vec<u8> = std::iter::repeat_with(|| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        state.to_le_bytes()
    })
    .flatten()
    .take(len)
    .collect();
    Bytes::from(data)
}

/// Stage bytes as a body split into 1 KiB frames.
pub async fn stage_bytes(stager: &ChunkStager, data: Bytes) -> StagedChunk {
    let frames: Vec<Result<Bytes, std::io::Error>> = data
        .chunks(1024)
        .map(|frame| Ok(Bytes::copy_from_slice(frame)))
        .collect();
    stager.stage(futures::stream::iter(frames)).await.unwrap()
}
