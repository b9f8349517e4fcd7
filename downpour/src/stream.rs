//! Single-stream fallback for servers without range support.
//!
//! One plain GET, one sequential write path. Used when the preflight does
//! not come back with `206 Partial Content`; the ranged engine never sees
//! such resources.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use reqwest::header::USER_AGENT;
use tracing::info;

use crate::error::{DownloadError, DownloadResult};
use crate::probe::DOWNPOUR_USER_AGENT;
use crate::progress::{CancelFlag, ProgressCounter};

/// Copy buffer for the sequential path (64 KiB).
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Download `url` into `dest` over a single connection.
///
/// The shared counter is credited per buffered write, so the same progress
/// observers work for both download paths. Returns the number of bytes
/// written.
pub fn stream_download(
    url: &str,
    dest: &Path,
    progress: &ProgressCounter,
    cancel: &CancelFlag,
) -> DownloadResult<u64> {
    let client = reqwest::blocking::Client::builder().timeout(None).build()?;

    let response = client
        .get(url)
        .header(USER_AGENT, DOWNPOUR_USER_AGENT)
        .send()?;
    let mut response = response.error_for_status()?;

    let mut file = File::create(dest).map_err(|e| DownloadError::io(dest, e))?;

    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let n = response
            .read(&mut buffer)
            .map_err(|e| DownloadError::io(dest, e))?;
        if n == 0 {
            break;
        }

        file.write_all(&buffer[..n])
            .map_err(|e| DownloadError::io(dest, e))?;
        progress.add(n as u64);
        written += n as u64;
    }

    file.sync_all().map_err(|e| DownloadError::io(dest, e))?;
    info!(url, bytes = written, "stream download complete");
    Ok(written)
}
