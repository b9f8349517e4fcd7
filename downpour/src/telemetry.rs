//! Periodic CSV telemetry for the running download.
//!
//! A dedicated sampler thread reads the shared byte counter once per second
//! and appends one row per sample. The only coupling with the workers is a
//! relaxed atomic load; sampling can never stall the download.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{DownloadError, DownloadResult};
use crate::progress::ProgressCounter;

/// Interval between samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Background sampler appending `Timestamp(s),TotalBytes,Speed(B/s)` rows.
///
/// Stopped explicitly by the orchestrator once the pool has terminated;
/// dropping it joins the thread as a fallback.
#[derive(Debug)]
pub struct TelemetrySampler {
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetrySampler {
    /// Create the CSV at `path`, write the header row, and start sampling.
    pub fn start(path: &Path, progress: Arc<ProgressCounter>) -> DownloadResult<Self> {
        let file = File::create(path).map_err(|e| DownloadError::io(path, e))?;

        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);
        let handle = thread::spawn(move || sample_loop(file, progress, done_flag));

        Ok(Self {
            done,
            handle: Some(handle),
        })
    }

    /// Stop sampling and wait for the final row to be written.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample_loop(file: File, progress: Arc<ProgressCounter>, done: Arc<AtomicBool>) {
    let mut out = BufWriter::new(file);
    let _ = writeln!(out, "Timestamp(s),TotalBytes,Speed(B/s)");
    let _ = out.flush();

    let started = Instant::now();
    let mut last_total = 0u64;

    // Sleep in short slices so stop() is honoured promptly
    let slice = Duration::from_millis(50);
    let mut next_sample = started + SAMPLE_INTERVAL;

    while !done.load(Ordering::Relaxed) {
        thread::sleep(slice);
        if Instant::now() < next_sample {
            continue;
        }
        next_sample += SAMPLE_INTERVAL;

        last_total = write_row(&mut out, &progress, started, last_total);
    }

    // Final row so the CSV reflects the terminal byte count
    write_row(&mut out, &progress, started, last_total);
    let _ = out.flush();
}

fn write_row(
    out: &mut BufWriter<File>,
    progress: &ProgressCounter,
    started: Instant,
    last_total: u64,
) -> u64 {
    let total = progress.bytes();
    let delta = total.saturating_sub(last_total);
    let _ = writeln!(out, "{},{},{}", started.elapsed().as_secs(), total, delta);
    let _ = out.flush();
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_header_and_final_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin.csv");

        let progress = Arc::new(ProgressCounter::new());
        let sampler = TelemetrySampler::start(&path, Arc::clone(&progress)).unwrap();
        progress.add(4096);
        sampler.stop();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Timestamp(s),TotalBytes,Speed(B/s)");
        assert!(lines.len() >= 2, "expected at least the final row");

        let last: Vec<&str> = lines.last().unwrap().split(',').collect();
        assert_eq!(last.len(), 3);
        assert_eq!(last[1], "4096");
    }

    #[test]
    fn test_rows_record_deltas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin.csv");

        let progress = Arc::new(ProgressCounter::new());
        let sampler = TelemetrySampler::start(&path, Arc::clone(&progress)).unwrap();

        progress.add(1000);
        thread::sleep(SAMPLE_INTERVAL + Duration::from_millis(300));
        progress.add(500);
        sampler.stop();

        let content = fs::read_to_string(&path).unwrap();
        let rows: Vec<Vec<u64>> = content
            .lines()
            .skip(1)
            .map(|line| line.split(',').map(|v| v.parse().unwrap()).collect())
            .collect();

        assert!(rows.len() >= 2);
        // Totals are monotonically non-decreasing and deltas account for them
        let mut previous = 0;
        for row in &rows {
            assert!(row[1] >= previous);
            assert_eq!(row[2], row[1] - previous);
            previous = row[1];
        }
        assert_eq!(rows.last().unwrap()[1], 1500);
    }

    #[test]
    fn test_create_failure_is_io_error() {
        let result = TelemetrySampler::start(
            Path::new("/nonexistent/dir/out.csv"),
            Arc::new(ProgressCounter::new()),
        );
        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }
}
