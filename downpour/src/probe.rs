//! Preflight probe: one request to learn the resource's size and whether
//! the server honours byte ranges.
//!
//! The probe is a GET with `Range: bytes=0-0` rather than a HEAD. It costs
//! one byte of transfer, but many servers answer HEAD incorrectly while
//! handling a one-byte range fine, and a `206` answer proves range support
//! instead of inferring it from an `Accept-Ranges` header.

use std::time::Duration;

use reqwest::header::{
    HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, RANGE, USER_AGENT,
};
use reqwest::StatusCode;

use crate::error::DownloadResult;

/// User-Agent sent on every request the downloader issues.
pub const DOWNPOUR_USER_AGENT: &str = "Mozilla/5.0 Downpour/1.0";

/// Client timeout for the preflight request.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the preflight learned about the remote resource.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// Authoritative length of the resource in bytes. Zero when the server
    /// reported nothing usable.
    pub total_size: u64,
    /// Whether the server answered the probe with `206 Partial Content`.
    pub accepts_ranges: bool,
    /// Filename derived from `Content-Disposition`, falling back to the
    /// last URL path segment. May be empty for pathless URLs.
    pub filename: String,
}

impl ResourceInfo {
    /// Whether the ranged multi-worker engine can be used for this resource.
    pub fn supports_parallel(&self) -> bool {
        self.accepts_ranges && self.total_size > 0
    }
}

/// Issue the preflight probe against `url`.
///
/// A `206` response marks the server range-capable and the total size is
/// read from the `Content-Range` denominator; any other status falls back
/// to `Content-Length` with ranges unsupported. Fails only if the request
/// itself cannot complete.
pub fn probe(url: &str) -> DownloadResult<ResourceInfo> {
    let client = reqwest::blocking::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .build()?;

    let response = client
        .get(url)
        .header(USER_AGENT, DOWNPOUR_USER_AGENT)
        .header(RANGE, "bytes=0-0")
        .send()?;

    let (total_size, accepts_ranges) = if response.status() == StatusCode::PARTIAL_CONTENT {
        (
            content_range_total(response.headers()).unwrap_or(0),
            true,
        )
    } else {
        (content_length(response.headers()).unwrap_or(0), false)
    };

    let filename = disposition_filename(response.headers())
        .unwrap_or_else(|| last_path_segment(response.url()));

    Ok(ResourceInfo {
        total_size,
        accepts_ranges,
        filename,
    })
}

/// Total size from a `Content-Range: bytes a-b/TOTAL` header.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

/// Filename from `Content-Disposition`, preferring the plain `filename`
/// parameter, then `filename*` with its RFC 5987 charset prefix stripped.
fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;

    let mut plain = None;
    let mut extended = None;
    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim() {
            "filename" => plain = Some(unquote(raw.trim()).to_string()),
            "filename*" => {
                let raw = raw.trim();
                let stripped = raw.split_once("''").map(|(_, v)| v).unwrap_or(raw);
                extended = Some(unquote(stripped).to_string());
            }
            _ => {}
        }
    }

    plain.or(extended).filter(|name| !name.is_empty())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn last_path_segment(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_content_range_total_parses_denominator() {
        let headers = headers_with("content-range", "bytes 0-0/5242880");
        assert_eq!(content_range_total(&headers), Some(5_242_880));
    }

    #[test]
    fn test_content_range_total_unknown_length() {
        let headers = headers_with("content-range", "bytes 0-0/*");
        assert_eq!(content_range_total(&headers), None);
    }

    #[test]
    fn test_content_range_total_missing_header() {
        assert_eq!(content_range_total(&HeaderMap::new()), None);
    }

    #[test]
    fn test_disposition_plain_filename() {
        let headers = headers_with("content-disposition", "attachment; filename=\"pack.tar.gz\"");
        assert_eq!(
            disposition_filename(&headers),
            Some("pack.tar.gz".to_string())
        );
    }

    #[test]
    fn test_disposition_unquoted_filename() {
        let headers = headers_with("content-disposition", "attachment; filename=data.iso");
        assert_eq!(disposition_filename(&headers), Some("data.iso".to_string()));
    }

    #[test]
    fn test_disposition_extended_filename_strips_charset() {
        let headers = headers_with(
            "content-disposition",
            "attachment; filename*=UTF-8''release.zip",
        );
        assert_eq!(
            disposition_filename(&headers),
            Some("release.zip".to_string())
        );
    }

    #[test]
    fn test_disposition_prefers_plain_over_extended() {
        let headers = headers_with(
            "content-disposition",
            "attachment; filename=\"a.bin\"; filename*=UTF-8''b.bin",
        );
        assert_eq!(disposition_filename(&headers), Some("a.bin".to_string()));
    }

    #[test]
    fn test_disposition_absent() {
        assert_eq!(disposition_filename(&HeaderMap::new()), None);
    }

    #[test]
    fn test_last_path_segment() {
        let url = reqwest::Url::parse("https://example.com/releases/v2/image.iso").unwrap();
        assert_eq!(last_path_segment(&url), "image.iso");
    }

    #[test]
    fn test_last_path_segment_trailing_slash_is_empty() {
        let url = reqwest::Url::parse("https://example.com/releases/").unwrap();
        assert_eq!(last_path_segment(&url), "");
    }

    #[test]
    fn test_supports_parallel() {
        let info = ResourceInfo {
            total_size: 100,
            accepts_ranges: true,
            filename: "f".to_string(),
        };
        assert!(info.supports_parallel());

        let no_ranges = ResourceInfo {
            accepts_ranges: false,
            ..info.clone()
        };
        assert!(!no_ranges.supports_parallel());

        let empty = ResourceInfo {
            total_size: 0,
            ..info
        };
        assert!(!empty.supports_parallel());
    }
}
