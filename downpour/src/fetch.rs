//! Chunk worker: ranged fetch with retry, streamed into the file.
//!
//! Each worker drains chunk indices from the shared queue. A chunk attempt
//! is a single ranged GET; anything other than a transport success with
//! `206 Partial Content` burns one attempt. Retries resume from the bytes
//! already written, so a failed stream never re-downloads (or re-counts)
//! what already landed on disk.

use std::fs::File;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use reqwest::blocking::Client;
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::BufferPool;
use crate::error::{DownloadError, DownloadResult};
use crate::plan::ChunkPlan;
use crate::probe::DOWNPOUR_USER_AGENT;
use crate::progress::{CancelFlag, ProgressCounter};
use crate::retry;
use crate::trace::{TraceEvent, TraceRecorder};
use crate::writer::PositionalWriter;

/// Throughput floor used to derive the per-attempt deadline (64 KiB/s).
const MIN_THROUGHPUT_BYTES_PER_SEC: u64 = 64 * 1024;

/// Smallest per-attempt deadline, regardless of chunk size.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a single chunk attempt failed.
///
/// Transport, status, and stream-read failures are retryable; a filesystem
/// write failure is fatal and aborts the whole pool.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("{0}")]
    Transport(reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("body read failed: {0}")]
    Read(io::Error),

    #[error("file write failed: {0}")]
    Write(io::Error),

    #[error("server sent more bytes than the requested range")]
    OverlongBody,

    #[error("response ended early: {got} of {expected} bytes")]
    Truncated { got: u64, expected: u64 },

    #[error("download cancelled")]
    Cancelled,
}

/// One worker's view of the shared download state.
pub(crate) struct ChunkFetcher<'a> {
    pub client: &'a Client,
    pub url: &'a str,
    pub plan: &'a ChunkPlan,
    pub file: &'a File,
    pub output_path: &'a Path,
    pub buffers: &'a BufferPool,
    pub progress: &'a ProgressCounter,
    pub cancel: &'a CancelFlag,
    pub trace: TraceRecorder,
}

impl ChunkFetcher<'_> {
    /// Drain the chunk queue until it is closed and empty.
    pub fn run(&self, jobs: Receiver<u64>) -> DownloadResult<()> {
        while let Ok(index) = jobs.recv() {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            self.download_chunk(index)?;
        }
        Ok(())
    }

    /// Fetch one chunk, retrying with backoff until it completes or the
    /// attempt budget is exhausted.
    fn download_chunk(&self, index: u64) -> DownloadResult<()> {
        let (start, end) = self.plan.byte_range(index);
        let chunk_started = Instant::now();

        // Bytes already written for this chunk; retries resume past them.
        let mut streamed: u64 = 0;
        let mut last_error = String::new();

        for attempt in 1..=retry::MAX_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            if attempt > 1 {
                let delay = retry::jittered_delay(attempt - 1);
                self.trace.record(TraceEvent::BackoffScheduled {
                    chunk: index,
                    attempt,
                    delay,
                });
                debug!(chunk = index, attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                thread::sleep(delay);
            }

            match self.attempt(index, attempt, start, end, &mut streamed) {
                Ok(()) => {
                    self.trace.record(TraceEvent::ChunkCompleted {
                        chunk: index,
                        bytes: end - start + 1,
                        elapsed: chunk_started.elapsed(),
                    });
                    return Ok(());
                }
                Err(AttemptError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(AttemptError::Write(source)) => {
                    return Err(DownloadError::io(self.output_path, source));
                }
                Err(err) => {
                    warn!(chunk = index, attempt, error = %err, "chunk attempt failed");
                    last_error = err.to_string();
                }
            }
        }

        Err(DownloadError::ChunkAbandoned {
            index,
            attempts: retry::MAX_ATTEMPTS,
            last_error,
        })
    }

    /// One ranged request for the not-yet-written tail of the chunk.
    fn attempt(
        &self,
        index: u64,
        attempt: u32,
        start: u64,
        end: u64,
        streamed: &mut u64,
    ) -> Result<(), AttemptError> {
        let from = start + *streamed;
        let expected = end - start + 1;

        // Every byte already landed; the previous attempt only failed after
        // its final write. Requesting `bytes=end+1-end` would be invalid.
        if *streamed >= expected {
            return Ok(());
        }

        self.trace.record(TraceEvent::AttemptStarted {
            chunk: index,
            attempt,
            start: from,
            end,
        });

        let request_started = Instant::now();
        let mut response = self
            .client
            .get(self.url)
            .header(USER_AGENT, DOWNPOUR_USER_AGENT)
            .header(RANGE, format!("bytes={from}-{end}"))
            .timeout(attempt_timeout(end - from + 1))
            .send()
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        self.trace.record(TraceEvent::ResponseReceived {
            chunk: index,
            attempt,
            status: status.as_u16(),
            elapsed: request_started.elapsed(),
        });
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(AttemptError::Status(status));
        }

        let mut writer = PositionalWriter::new(self.file, from, self.progress);
        let mut buffer = self.buffers.acquire();

        loop {
            if self.cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }

            let n = match io::Read::read(&mut response, &mut buffer) {
                Ok(n) => n,
                Err(err) => {
                    self.trace.record(TraceEvent::StreamFailed {
                        chunk: index,
                        attempt,
                        error: err.to_string(),
                    });
                    return Err(AttemptError::Read(err));
                }
            };
            if n == 0 {
                break;
            }
            if writer.position() + n as u64 > end + 1 {
                return Err(AttemptError::OverlongBody);
            }

            writer.write_all(&buffer[..n]).map_err(AttemptError::Write)?;
            *streamed += n as u64;
        }

        if *streamed < expected {
            self.trace.record(TraceEvent::StreamFailed {
                chunk: index,
                attempt,
                error: format!("truncated at {} of {} bytes", *streamed, expected),
            });
            return Err(AttemptError::Truncated {
                got: *streamed,
                expected,
            });
        }
        Ok(())
    }
}

/// Deadline for one attempt: the remaining bytes at the minimum acceptable
/// throughput, but never below [`MIN_ATTEMPT_TIMEOUT`].
fn attempt_timeout(bytes: u64) -> Duration {
    let at_floor = Duration::from_secs(bytes / MIN_THROUGHPUT_BYTES_PER_SEC + 1);
    at_floor.max(MIN_ATTEMPT_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_timeout_floor() {
        // A tiny chunk still gets the minimum deadline
        assert_eq!(attempt_timeout(1024), MIN_ATTEMPT_TIMEOUT);
    }

    #[test]
    fn test_attempt_timeout_scales_with_size() {
        // 64 MiB at 64 KiB/s is 1024 seconds
        let timeout = attempt_timeout(64 * 1024 * 1024);
        assert_eq!(timeout, Duration::from_secs(1025));
    }
}
