//! Range-download engine: configuration, state, and orchestration.
//!
//! The orchestrator owns the whole pipeline:
//!
//! ```text
//! planner ──indices──► chunk queue ──► worker pool (N)
//!                                          │ ranged GET + retry
//!                                          ▼
//!                                   positional writes ──► output file
//!                                          │
//!                                          ▼
//!                                  progress counter ◄── UI / telemetry
//! ```
//!
//! Workers run inside a thread scope, so `run` cannot return before every
//! worker has terminated. A chunk that exhausts its retries trips the
//! cancel flag and aborts the pool: a download with a hole in it is a
//! failure, not a success without a checksum.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::buffer::{BufferPool, BUFFER_SIZE};
use crate::error::{DownloadError, DownloadResult};
use crate::fetch::ChunkFetcher;
use crate::plan::{ChunkPlan, DEFAULT_WORKER_LIMIT};
use crate::progress::{CancelFlag, DownloadPhase, PhaseCell, ProgressCounter};
use crate::telemetry::TelemetrySampler;
use crate::trace::{TraceLog, TraceRecorder};
use crate::verify::{self, ChecksumSpec};

/// Idle timeout for pooled connections.
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// Name of the HTTP trace log inside the artifact directory.
const TRACE_LOG_NAME: &str = "httptrace.log";

/// Immutable configuration for one ranged download.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Absolute URL of the resource.
    pub url: String,
    /// Bare output filename (no path separators).
    pub filename: String,
    /// Authoritative resource length from the preflight. Must be positive.
    pub total_size: u64,
    /// Number of concurrent workers.
    pub worker_limit: usize,
    /// Directory the output (and artifacts) are created under. Defaults to
    /// the current working directory.
    pub directory: Option<PathBuf>,
    /// Write per-chunk request lifecycle events to `httptrace.log`.
    pub enable_trace: bool,
    /// Sample the byte counter once per second into `<filename>.csv`.
    pub enable_telemetry: bool,
    /// Expected digest to verify the finished file against.
    pub checksum: Option<ChecksumSpec>,
}

impl EngineConfig {
    /// Configuration with default worker count and no artifacts.
    pub fn new(url: impl Into<String>, filename: impl Into<String>, total_size: u64) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            total_size,
            worker_limit: DEFAULT_WORKER_LIMIT,
            directory: None,
            enable_trace: false,
            enable_telemetry: false,
            checksum: None,
        }
    }

    /// Override the number of concurrent workers.
    pub fn with_worker_limit(mut self, worker_limit: usize) -> Self {
        self.worker_limit = worker_limit;
        self
    }

    /// Place the output (and artifact directory) under `directory`.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Enable the HTTP trace log.
    pub fn with_trace(mut self) -> Self {
        self.enable_trace = true;
        self
    }

    /// Enable CSV telemetry.
    pub fn with_telemetry(mut self) -> Self {
        self.enable_telemetry = true;
        self
    }

    /// Verify the finished file against `checksum`.
    pub fn with_checksum(mut self, checksum: ChecksumSpec) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// Bytes written to the output file.
    pub bytes_written: u64,
    /// Size the preflight promised; equals `bytes_written` on success.
    pub total_size: u64,
    /// Number of chunks the resource was split into.
    pub total_chunks: u64,
    /// Wall-clock time of the download including verification.
    pub elapsed: Duration,
    /// Whether a checksum was verified.
    pub verified: bool,
}

/// A prepared ranged download: pre-allocated file, HTTP client, buffer
/// pool, and chunk plan.
///
/// Construction performs all filesystem preparation; [`RangeEngine::run`]
/// consumes the engine, so each prepared download executes exactly once.
#[derive(Debug)]
pub struct RangeEngine {
    config: EngineConfig,
    plan: ChunkPlan,
    output_path: PathBuf,
    artifact_dir: Option<PathBuf>,
    file: File,
    client: Client,
    buffers: BufferPool,
    progress: Arc<ProgressCounter>,
    phase: Arc<PhaseCell>,
    cancel: CancelFlag,
}

impl RangeEngine {
    /// Validate the configuration and prepare the download state.
    ///
    /// Creates the artifact directory when tracing or telemetry is enabled,
    /// creates the output file, and truncates it to `total_size` so workers
    /// can write their ranges in any order.
    pub fn new(config: EngineConfig) -> DownloadResult<Self> {
        if config.filename.is_empty() {
            return Err(DownloadError::Config("output filename is empty".into()));
        }
        if config.filename.contains(['/', '\\']) {
            return Err(DownloadError::Config(format!(
                "output filename {:?} contains a path separator",
                config.filename
            )));
        }
        if config.total_size == 0 {
            return Err(DownloadError::Config("total size must be positive".into()));
        }
        if config.worker_limit == 0 {
            return Err(DownloadError::Config("worker limit must be positive".into()));
        }

        let base = config.directory.clone().unwrap_or_default();
        let artifact_dir = if config.enable_trace || config.enable_telemetry {
            Some(base.join(artifact_dir_name(&config.filename)))
        } else {
            None
        };
        if let Some(dir) = &artifact_dir {
            fs::create_dir_all(dir).map_err(|e| DownloadError::io(dir.clone(), e))?;
        }

        let output_path = artifact_dir
            .clone()
            .unwrap_or(base)
            .join(&config.filename);

        let file = File::create(&output_path).map_err(|e| DownloadError::io(&output_path, e))?;
        file.set_len(config.total_size)
            .map_err(|e| DownloadError::io(&output_path, e))?;

        let client = Client::builder()
            .pool_max_idle_per_host(config.worker_limit)
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .timeout(None)
            .build()?;

        let plan = ChunkPlan::new(config.total_size, config.worker_limit);

        Ok(Self {
            config,
            plan,
            output_path,
            artifact_dir,
            file,
            client,
            buffers: BufferPool::new(BUFFER_SIZE),
            progress: Arc::new(ProgressCounter::new()),
            phase: Arc::new(PhaseCell::new()),
            cancel: CancelFlag::new(),
        })
    }

    /// Shared byte counter, for UI and telemetry observers.
    pub fn progress(&self) -> Arc<ProgressCounter> {
        Arc::clone(&self.progress)
    }

    /// Shared phase cell, for UI observers.
    pub fn phase(&self) -> Arc<PhaseCell> {
        Arc::clone(&self.phase)
    }

    /// Cancellation flag; cancel from any thread to abort the download.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Where the output file was created.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// The chunk plan for this download.
    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Run the download to completion.
    ///
    /// Blocks until the planner and every worker have terminated, then
    /// closes the file and, if configured, verifies the checksum.
    pub fn run(self) -> DownloadResult<DownloadReport> {
        let phase = Arc::clone(&self.phase);
        match self.execute() {
            Ok(report) => {
                phase.set(DownloadPhase::Complete);
                Ok(report)
            }
            Err(err) => {
                phase.set(DownloadPhase::Failed);
                Err(err)
            }
        }
    }

    fn execute(self) -> DownloadResult<DownloadReport> {
        let RangeEngine {
            config,
            plan,
            output_path,
            artifact_dir,
            file,
            client,
            buffers,
            progress,
            phase,
            cancel,
        } = self;

        let started = Instant::now();
        phase.set(DownloadPhase::Downloading);
        info!(
            url = %config.url,
            total_size = config.total_size,
            chunks = plan.total_chunks(),
            workers = config.worker_limit,
            "starting ranged download"
        );

        let sampler = if config.enable_telemetry {
            let dir = artifact_dir.as_deref().unwrap_or(Path::new(""));
            let csv_path = dir.join(format!("{}.csv", config.filename));
            Some(TelemetrySampler::start(&csv_path, Arc::clone(&progress))?)
        } else {
            None
        };

        let trace_log = if config.enable_trace {
            let dir = artifact_dir.as_deref().unwrap_or(Path::new(""));
            Some(TraceLog::create(&dir.join(TRACE_LOG_NAME))?)
        } else {
            None
        };

        let first_error: Mutex<Option<DownloadError>> = Mutex::new(None);
        let (job_tx, job_rx) = bounded::<u64>(config.worker_limit);

        thread::scope(|s| {
            // Planner: emit every index in order, then close the queue.
            let planner_cancel = cancel.clone();
            let total_chunks = plan.total_chunks();
            s.spawn(move || {
                for index in 0..total_chunks {
                    if planner_cancel.is_cancelled() {
                        break;
                    }
                    if job_tx.send(index).is_err() {
                        break;
                    }
                }
                // Dropping the sender closes the queue exactly once.
            });

            for _ in 0..config.worker_limit {
                let jobs = job_rx.clone();
                let fetcher = ChunkFetcher {
                    client: &client,
                    url: &config.url,
                    plan: &plan,
                    file: &file,
                    output_path: &output_path,
                    buffers: &buffers,
                    progress: &progress,
                    cancel: &cancel,
                    trace: trace_log
                        .as_ref()
                        .map(TraceLog::recorder)
                        .unwrap_or_else(TraceRecorder::disabled),
                };
                let first_error = &first_error;
                let cancel = &cancel;
                s.spawn(move || {
                    if let Err(err) = fetcher.run(jobs) {
                        if !matches!(err, DownloadError::Cancelled) {
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            // Abort the rest of the pool: a poisoned chunk
                            // means the file can never be complete.
                            cancel.cancel();
                        }
                    }
                });
            }
        });

        // Flush trace events and stop sampling before the terminal states.
        drop(trace_log);
        if let Some(sampler) = sampler {
            sampler.stop();
        }

        if let Some(err) = first_error.lock().unwrap().take() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        file.sync_all()
            .map_err(|e| DownloadError::io(&output_path, e))?;
        drop(file);
        debug_assert_eq!(buffers.outstanding(), 0);

        if let Some(spec) = &config.checksum {
            phase.set(DownloadPhase::Verifying);
            debug!(algo = %spec.algo(), "verifying checksum");
            verify::verify_file(&output_path, spec)?;
        }

        let report = DownloadReport {
            bytes_written: progress.bytes(),
            total_size: config.total_size,
            total_chunks: plan.total_chunks(),
            elapsed: started.elapsed(),
            verified: config.checksum.is_some(),
        };
        info!(
            bytes = report.bytes_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            verified = report.verified,
            "download complete"
        );
        Ok(report)
    }
}

/// Directory name for colocated artifacts: the filename without its final
/// extension, or the whole filename when stripping would leave nothing.
fn artifact_dir_name(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> EngineConfig {
        EngineConfig::new("http://localhost/file.bin", "file.bin", 4096)
            .with_directory(dir.path())
    }

    #[test]
    fn test_artifact_dir_name_strips_extension() {
        assert_eq!(artifact_dir_name("ubuntu.iso"), "ubuntu");
        assert_eq!(artifact_dir_name("archive.tar.gz"), "archive.tar");
    }

    #[test]
    fn test_artifact_dir_name_no_extension_uses_full_name() {
        assert_eq!(artifact_dir_name("README"), "README");
    }

    #[test]
    fn test_artifact_dir_name_leading_dot_uses_full_name() {
        assert_eq!(artifact_dir_name(".bashrc"), ".bashrc");
    }

    #[test]
    fn test_rejects_empty_filename() {
        let config = EngineConfig::new("http://localhost/x", "", 100);
        assert!(matches!(
            RangeEngine::new(config),
            Err(DownloadError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_filename_with_separator() {
        let config = EngineConfig::new("http://localhost/x", "../evil.bin", 100);
        assert!(matches!(
            RangeEngine::new(config),
            Err(DownloadError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_total_size() {
        let config = EngineConfig::new("http://localhost/x", "out.bin", 0);
        assert!(matches!(
            RangeEngine::new(config),
            Err(DownloadError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir).with_worker_limit(0);
        assert!(matches!(
            RangeEngine::new(config),
            Err(DownloadError::Config(_))
        ));
    }

    #[test]
    fn test_preallocates_output_file() {
        let dir = TempDir::new().unwrap();
        let engine = RangeEngine::new(config_in(&dir)).unwrap();

        let metadata = fs::metadata(engine.output_path()).unwrap();
        assert_eq!(metadata.len(), 4096);
    }

    #[test]
    fn test_artifacts_colocate_with_download() {
        let dir = TempDir::new().unwrap();
        let engine = RangeEngine::new(config_in(&dir).with_telemetry()).unwrap();

        let expected_dir = dir.path().join("file");
        assert!(expected_dir.is_dir());
        assert_eq!(engine.output_path(), expected_dir.join("file.bin"));
    }

    #[test]
    fn test_no_artifact_dir_without_trace_or_telemetry() {
        let dir = TempDir::new().unwrap();
        let engine = RangeEngine::new(config_in(&dir)).unwrap();

        assert_eq!(engine.output_path(), dir.path().join("file.bin"));
        assert!(!dir.path().join("file").exists());
    }

    #[test]
    fn test_plan_uses_configured_workers() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new("http://localhost/x", "file.bin", 480 * 1024 * 1024)
            .with_directory(dir.path())
            .with_worker_limit(4);
        let engine = RangeEngine::new(config).unwrap();

        // 480 MiB / (4 workers * 4) = 30 MiB chunks
        assert_eq!(engine.plan().chunk_size(), 30 * 1024 * 1024);
    }
}
