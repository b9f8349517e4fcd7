//! Chunk planning: partitioning a resource into fixed-size byte ranges.
//!
//! The plan targets roughly four chunks per worker. Fewer chunks than that
//! wastes the tail-latency recovery a finer split buys (one slow worker
//! holds back less of the download); more chunks than that churns
//! connections. The bounds keep tiny files from degenerating into
//! micro-chunks and very large files from producing oversize ranges.

/// Default number of concurrent workers.
pub const DEFAULT_WORKER_LIMIT: usize = 12;

/// Smallest chunk the planner will emit (1 MiB).
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest chunk the planner will emit (64 MiB).
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Target number of chunks handed to each worker.
const TARGET_CHUNKS_PER_WORKER: u64 = 4;

/// Immutable partition of `[0, total_size)` into contiguous chunks.
///
/// Chunk `i` covers the inclusive byte range
/// `[i * chunk_size, min((i + 1) * chunk_size, total_size) - 1]`; ranges of
/// distinct chunks never overlap and their union is the whole resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: u64,
    total_chunks: u64,
}

impl ChunkPlan {
    /// Build a plan for `total_size` bytes spread over `worker_limit` workers.
    pub fn new(total_size: u64, worker_limit: usize) -> Self {
        let chunk_size = chunk_size_for(total_size, worker_limit);
        let total_chunks = if total_size == 0 {
            0
        } else {
            total_size.div_ceil(chunk_size)
        };
        Self {
            total_size,
            chunk_size,
            total_chunks,
        }
    }

    /// Total length of the resource in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Size of every chunk except possibly the last.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks in the plan.
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Inclusive byte range `(start, end)` of chunk `index`.
    pub fn byte_range(&self, index: u64) -> (u64, u64) {
        let start = index * self.chunk_size;
        let end = ((index + 1) * self.chunk_size - 1).min(self.total_size - 1);
        (start, end)
    }

    /// Length in bytes of chunk `index`.
    pub fn chunk_len(&self, index: u64) -> u64 {
        let (start, end) = self.byte_range(index);
        end - start + 1
    }
}

/// Chunk size for a resource: `total / (workers * 4)` clamped to
/// `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
///
/// A non-positive total falls back to the maximum; the preflight always
/// produces a positive size before a plan is built, so that branch only
/// protects against misuse.
fn chunk_size_for(total_size: u64, worker_limit: usize) -> u64 {
    if total_size == 0 {
        return MAX_CHUNK_SIZE;
    }
    let target = total_size / (worker_limit as u64 * TARGET_CHUNKS_PER_WORKER);
    target.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}
