//! Byte-range reads from remote containers.
//!
//! The reader only needs one capability: "give me exactly `length` bytes at
//! `start`".  [`ByteRangeFetcher`] is that seam.  [`HttpRangeFetcher`] is the
//! production implementation, one blocking HTTP `Range` request per call.
//! Nothing here retries; a failed read fails the caller's whole operation.

use std::io::{self, Read};
use std::time::Duration;

use thiserror::Error;

/// Read timeout applied to every range request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request for {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("{url} answered status {status} to a range request")]
    Status { url: String, status: u16 },
    #[error("{url} ignored the range request starting at {start:#x}")]
    RangeIgnored { url: String, start: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub trait ByteRangeFetcher {
    /// Fetch `length` bytes starting at `start`.  Implementations should
    /// return exactly `length` bytes; callers treat fewer as a short read.
    fn fetch(&self, url: &str, start: u64, length: u32) -> Result<Vec<u8>, FetchError>;
}

impl<F: ByteRangeFetcher + ?Sized> ByteRangeFetcher for &F {
    fn fetch(&self, url: &str, start: u64, length: u32) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url, start, length)
    }
}

impl<F: ByteRangeFetcher + ?Sized> ByteRangeFetcher for Box<F> {
    fn fetch(&self, url: &str, start: u64, length: u32) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url, start, length)
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────────

/// Blocking HTTP range fetcher.
pub struct HttpRangeFetcher {
    agent: ureq::Agent,
}

impl HttpRangeFetcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self { agent }
    }
}

impl Default for HttpRangeFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteRangeFetcher for HttpRangeFetcher {
    fn fetch(&self, url: &str, start: u64, length: u32) -> Result<Vec<u8>, FetchError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = start + length as u64 - 1;
        tracing::debug!(url, start, length, "range request");

        let response = self
            .agent
            .get(url)
            .set("Range", &format!("bytes={start}-{end}"))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => FetchError::Status { url: url.to_owned(), status },
                other => FetchError::Http { url: url.to_owned(), message: other.to_string() },
            })?;

        match response.status() {
            206 => {}
            // A full response is only usable when it starts where we asked.
            200 if start == 0 => {}
            200 => return Err(FetchError::RangeIgnored { url: url.to_owned(), start }),
            status => return Err(FetchError::Status { url: url.to_owned(), status }),
        }

        let mut data = Vec::with_capacity(length as usize);
        response
            .into_reader()
            .take(length as u64)
            .read_to_end(&mut data)?;
        if data.len() < length as usize {
            tracing::warn!(url, start, length, received = data.len(), "short range read");
        }
        Ok(data)
    }
}
