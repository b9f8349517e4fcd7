//! Downpour - concurrent HTTP file downloader
//!
//! This library fetches a single remote resource in parallel by issuing
//! byte-range requests across a fixed worker pool, writing each chunk
//! directly into a pre-allocated file at its absolute offset.
//!
//! # Architecture
//!
//! ```text
//! probe ──► RangeEngine (orchestrator)
//!               ├── ChunkPlan        partitions [0, total_size)
//!               ├── worker pool      ranged GET + retry per chunk
//!               ├── PositionalWriter pwrite at disjoint offsets
//!               ├── BufferPool       pooled 128 KiB copy buffers
//!               ├── ProgressCounter  relaxed atomic, polled by observers
//!               ├── TelemetrySampler 1 Hz CSV rows (optional)
//!               ├── TraceLog         serialized request log (optional)
//!               └── verify           streaming hash of the final file
//! ```
//!
//! Servers that do not answer the preflight with `206 Partial Content`
//! take the single-connection path in [`stream`] instead.
//!
//! # Example
//!
//! ```no_run
//! use downpour::{probe, EngineConfig, RangeEngine};
//!
//! # fn main() -> downpour::DownloadResult<()> {
//! let url = "https://example.com/releases/image.iso";
//! let info = probe(url)?;
//!
//! let config = EngineConfig::new(url, info.filename.clone(), info.total_size);
//! let engine = RangeEngine::new(config)?;
//! let report = engine.run()?;
//! println!("wrote {} bytes", report.bytes_written);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod engine;
pub mod error;
mod fetch;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod stream;
pub mod telemetry;
mod trace;
pub mod verify;
pub mod writer;

pub use engine::{DownloadReport, EngineConfig, RangeEngine};
pub use error::{DownloadError, DownloadResult};
pub use plan::ChunkPlan;
pub use probe::{probe, ResourceInfo, DOWNPOUR_USER_AGENT};
pub use progress::{CancelFlag, DownloadPhase, PhaseCell, ProgressCounter};
pub use stream::stream_download;
pub use verify::{ChecksumAlgo, ChecksumSpec};
