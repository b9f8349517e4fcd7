//! Append-only HTTP trace log.
//!
//! Workers record per-chunk request lifecycle events. All events funnel
//! through one writer thread over a channel, so lines never interleave no
//! matter how many workers are active. Recording never blocks the download
//! path beyond an unbounded channel send.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;

use crate::error::{DownloadError, DownloadResult};

/// One request lifecycle event, tagged with the chunk it belongs to.
#[derive(Debug)]
pub(crate) enum TraceEvent {
    AttemptStarted {
        chunk: u64,
        attempt: u32,
        start: u64,
        end: u64,
    },
    ResponseReceived {
        chunk: u64,
        attempt: u32,
        status: u16,
        elapsed: Duration,
    },
    BackoffScheduled {
        chunk: u64,
        attempt: u32,
        delay: Duration,
    },
    StreamFailed {
        chunk: u64,
        attempt: u32,
        error: String,
    },
    ChunkCompleted {
        chunk: u64,
        bytes: u64,
        elapsed: Duration,
    },
}

/// Cheap handle workers use to record events. A disabled recorder drops
/// every event, so the worker code carries one unconditionally.
#[derive(Debug, Clone)]
pub(crate) struct TraceRecorder {
    tx: Option<mpsc::Sender<TraceEvent>>,
}

impl TraceRecorder {
    /// A recorder that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, event: TraceEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Serialized writer for the trace log file.
///
/// Dropping the log closes the channel, drains remaining events, and joins
/// the writer thread.
#[derive(Debug)]
pub(crate) struct TraceLog {
    tx: Option<mpsc::Sender<TraceEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl TraceLog {
    /// Open (appending) the trace file at `path` and start the writer.
    pub fn create(path: &Path) -> DownloadResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DownloadError::io(path, e))?;

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || write_loop(file, rx));

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// A recorder feeding this log.
    pub fn recorder(&self) -> TraceRecorder {
        TraceRecorder {
            tx: self.tx.clone(),
        }
    }
}

impl Drop for TraceLog {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_loop(file: File, rx: mpsc::Receiver<TraceEvent>) {
    let mut out = BufWriter::new(file);
    for event in rx {
        let ts = Local::now().format("%Y/%m/%d %H:%M:%S%.6f");
        let _ = match event {
            TraceEvent::AttemptStarted {
                chunk,
                attempt,
                start,
                end,
            } => writeln!(
                out,
                "{ts} [chunk {chunk}] attempt {attempt} requesting bytes {start}-{end}"
            ),
            TraceEvent::ResponseReceived {
                chunk,
                attempt,
                status,
                elapsed,
            } => writeln!(
                out,
                "{ts} [chunk {chunk}] attempt {attempt} response {status} in {elapsed:?}"
            ),
            TraceEvent::BackoffScheduled {
                chunk,
                attempt,
                delay,
            } => writeln!(
                out,
                "{ts} [chunk {chunk}] attempt {attempt} backing off {delay:?}"
            ),
            TraceEvent::StreamFailed {
                chunk,
                attempt,
                error,
            } => writeln!(
                out,
                "{ts} [chunk {chunk}] attempt {attempt} stream error: {error}"
            ),
            TraceEvent::ChunkCompleted {
                chunk,
                bytes,
                elapsed,
            } => writeln!(
                out,
                "{ts} [chunk {chunk}] complete: {bytes} bytes in {elapsed:?}"
            ),
        };
    }
    let _ = out.flush();
}
