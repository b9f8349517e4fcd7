//! Downpour CLI - concurrent HTTP file downloader.
//!
//! Parses arguments, runs the preflight probe, and hands the download to
//! the ranged engine (servers that honour byte ranges) or the single
//! stream fallback, with a terminal progress view either way.

use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use downpour::{
    probe, stream_download, CancelFlag, ChecksumAlgo, ChecksumSpec, DownloadError, DownloadPhase,
    DownloadReport, DownloadResult, EngineConfig, PhaseCell, ProgressCounter, RangeEngine,
};

mod ui;

#[derive(Parser, Debug)]
#[command(name = "downpour")]
#[command(about = "A concurrent HTTP file downloader", version)]
struct Args {
    /// URL of the file to download
    url: Vec<String>,

    /// Generate a download telemetry CSV next to the file
    #[arg(long, alias = "tel")]
    telemetry: bool,

    /// Generate an HTTP trace logfile next to the file
    #[arg(long, alias = "hl")]
    httplog: bool,

    /// Expected checksum hash (hex)
    #[arg(short = 'c', long)]
    checksum: Option<String>,

    /// Checksum algorithm: md5, sha1, sha256, sha384, sha512
    #[arg(short = 'a', long)]
    algorithm: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let [url] = args.url.as_slice() else {
        // Anything other than exactly one URL gets the help text, not an error
        Args::command().print_help().ok();
        return;
    };
    let url = url.clone();

    match run(&url, &args) {
        Ok(report) => {
            let avg_speed = if report.elapsed.as_secs_f64() > 0.0 {
                report.bytes_written as f64 / report.elapsed.as_secs_f64()
            } else {
                0.0
            };
            println!("Download complete");
            println!("  Size:  {}", ui::format_bytes(report.bytes_written as f64));
            println!("  Time:  {}", ui::format_duration(report.elapsed));
            println!("  Speed: {}", ui::format_speed(avg_speed));
            if report.verified {
                println!("  Checksum verified");
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    }
}

fn run(url: &str, args: &Args) -> DownloadResult<DownloadReport> {
    let checksum = parse_checksum(args)?;

    let info = probe(url)?;
    if info.filename.is_empty() {
        return Err(DownloadError::Config(
            "could not derive a filename from the URL or response headers".into(),
        ));
    }

    if info.supports_parallel() {
        run_ranged(url, &info.filename, info.total_size, checksum, args)
    } else {
        run_streaming(url, &info.filename, info.total_size, checksum)
    }
}

fn parse_checksum(args: &Args) -> DownloadResult<Option<ChecksumSpec>> {
    match (&args.checksum, &args.algorithm) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => Err(DownloadError::Config(
            "--checksum and --algorithm must be provided together".into(),
        )),
        (Some(hash), Some(name)) => {
            let algo = ChecksumAlgo::from_name(name).ok_or_else(|| {
                DownloadError::Config(format!(
                    "unsupported algorithm {name:?}; supported: md5, sha1, sha256, sha384, sha512"
                ))
            })?;
            Ok(Some(ChecksumSpec::new(algo, hash)?))
        }
    }
}

fn run_ranged(
    url: &str,
    filename: &str,
    total_size: u64,
    checksum: Option<ChecksumSpec>,
    args: &Args,
) -> DownloadResult<DownloadReport> {
    let mut config = EngineConfig::new(url, filename, total_size);
    if args.telemetry {
        config = config.with_telemetry();
    }
    if args.httplog {
        config = config.with_trace();
    }
    if let Some(spec) = checksum.clone() {
        config = config.with_checksum(spec);
    }

    let engine = RangeEngine::new(config)?;
    let ctx = ui::UiContext {
        filename: filename.to_string(),
        total_size,
        parallel: true,
        progress: engine.progress(),
        phase: engine.phase(),
        cancel: engine.cancel_flag(),
        checksum_algo: checksum.map(|c| c.algo().name().to_string()),
    };

    let (result_tx, result_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let _ = result_tx.send(engine.run());
    });

    let result = ui::run(ctx, result_rx);
    let _ = handle.join();
    result
}

fn run_streaming(
    url: &str,
    filename: &str,
    total_size: u64,
    checksum: Option<ChecksumSpec>,
) -> DownloadResult<DownloadReport> {
    let progress = Arc::new(ProgressCounter::new());
    let phase = Arc::new(PhaseCell::new());
    let cancel = CancelFlag::new();
    let dest = PathBuf::from(filename);

    let ctx = ui::UiContext {
        filename: filename.to_string(),
        total_size,
        parallel: false,
        progress: Arc::clone(&progress),
        phase: Arc::clone(&phase),
        cancel: cancel.clone(),
        checksum_algo: checksum.as_ref().map(|c| c.algo().name().to_string()),
    };

    let (result_tx, result_rx) = mpsc::channel();
    let url = url.to_string();
    let handle = thread::spawn(move || {
        let started = Instant::now();
        let result = stream_download(&url, &dest, &progress, &cancel).and_then(|bytes| {
            if let Some(spec) = &checksum {
                phase.set(DownloadPhase::Verifying);
                downpour::verify::verify_file(&dest, spec)?;
            }
            Ok(DownloadReport {
                bytes_written: bytes,
                total_size: bytes,
                total_chunks: 1,
                elapsed: started.elapsed(),
                verified: checksum.is_some(),
            })
        });
        phase.set(match &result {
            Ok(_) => DownloadPhase::Complete,
            Err(_) => DownloadPhase::Failed,
        });
        let _ = result_tx.send(result);
    });

    let result = ui::run(ctx, result_rx);
    let _ = handle.join();
    result
}
