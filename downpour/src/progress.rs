//! Shared progress state for the download pipeline.
//!
//! Workers publish bytes through a single lock-free counter; external
//! observers (terminal UI, telemetry sampler) poll it at their own cadence.
//! The only coupling between the hot path and any observer is a relaxed
//! atomic load.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Monotonically increasing byte counter shared by all workers.
///
/// Every buffered write adds the bytes it flushed; observers read the
/// running total without blocking the writers.
#[derive(Debug, Default)]
pub struct ProgressCounter(AtomicU64);

impl ProgressCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `n` freshly written bytes.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current total of bytes written.
    pub fn bytes(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Lifecycle phase of a download, readable by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    /// Workers are fetching chunks.
    Downloading,
    /// The file is closed and the verifier is hashing it.
    Verifying,
    /// The download (and verification, if configured) succeeded.
    Complete,
    /// The download failed; the error is carried by the engine result.
    Failed,
}

impl DownloadPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Verifying,
            2 => Self::Complete,
            3 => Self::Failed,
            _ => Self::Downloading,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Downloading => 0,
            Self::Verifying => 1,
            Self::Complete => 2,
            Self::Failed => 3,
        }
    }
}

/// Atomic cell holding the current [`DownloadPhase`].
#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    /// Create a cell in the `Downloading` phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new phase.
    pub fn set(&self, phase: DownloadPhase) {
        self.0.store(phase.as_u8(), Ordering::Relaxed);
    }

    /// Read the current phase.
    pub fn get(&self) -> DownloadPhase {
        DownloadPhase::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// Cooperative cancellation flag.
///
/// Observed by the worker loop between chunks and between buffer reads, by
/// the planner, and by the telemetry sampler. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero() {
        let counter = ProgressCounter::new();
        assert_eq!(counter.bytes(), 0);
    }

    #[test]
    fn test_counter_accumulates() {
        let counter = ProgressCounter::new();
        counter.add(100);
        counter.add(28);
        assert_eq!(counter.bytes(), 128);
    }

    #[test]
    fn test_counter_concurrent_adds() {
        use std::thread;

        let counter = Arc::new(ProgressCounter::new());
        thread::scope(|s| {
            for _ in 0..4 {
                let counter = Arc::clone(&counter);
                s.spawn(move || {
                    for _ in 0..1000 {
                        counter.add(1);
                    }
                });
            }
        });
        assert_eq!(counter.bytes(), 4000);
    }

    #[test]
    fn test_phase_cell_defaults_to_downloading() {
        let phase = PhaseCell::new();
        assert_eq!(phase.get(), DownloadPhase::Downloading);
    }

    #[test]
    fn test_phase_cell_round_trip() {
        let phase = PhaseCell::new();
        for p in [
            DownloadPhase::Downloading,
            DownloadPhase::Verifying,
            DownloadPhase::Complete,
            DownloadPhase::Failed,
        ] {
            phase.set(p);
            assert_eq!(phase.get(), p);
        }
    }

    #[test]
    fn test_cancel_flag_shared_across_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());

        flag.cancel();
        assert!(other.is_cancelled());
    }
}
