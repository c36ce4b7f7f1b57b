//! Chunk planning

use rangeflow_types::Chunk;

/// Split `[0, total_size)` into consecutive chunks of `chunk_size` bytes.
/// The last chunk holds the remainder.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<Chunk> {
    if total_size == 0 {
        return Vec::new();
    }

    let chunk_size = if chunk_size == 0 { total_size } else { chunk_size };
    let count = total_size.div_ceil(chunk_size);

    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = (start + chunk_size).min(total_size);
            Chunk::new(i as u32, start, end)
        })
        .collect()
}
