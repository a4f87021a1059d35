//! HTTPS client policy for the index and gem downloads.
//!
//! One client serves both the compact index and artifact downloads. The
//! wrapped client handles transport framing and per-origin keep-alive; this
//! module pins the policy: HTTP/1.1 only, rustls against the system trust
//! store, a 30 second timeout, at most 10 redirect hops with HTTPS-to-HTTP
//! downgrades refused, at most 8 idle connections per host, and a 10 MiB cap
//! on buffered response bodies. Downloads stream one chunk at a time and are
//! not subject to the cap.

use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

/// Hard cap for buffered response bodies
pub const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Redirect hop limit
const MAX_REDIRECTS: usize = 10;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Per-origin idle connection bound
const POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Streaming read chunk size
const CHUNK_BYTES: usize = 8 * 1024;

/// Transport errors, reported with the offending host
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("invalid url {url:?}")]
    InvalidUrl { url: String },

    #[error("request to {host} failed: {source}")]
    Request {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{host} returned HTTP {status} for {url}")]
    Status {
        host: String,
        status: u16,
        url: String,
    },

    #[error("resource not found at {url}")]
    NotFound { url: String },

    #[error("response from {host} exceeds the {MAX_BODY_BYTES} byte cap")]
    TooLarge { host: String },

    #[error("failed reading response from {host}: {source}")]
    Body {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Blocking HTTPS client with the policy above baked in
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::blocking::Client,
}

impl HttpClient {
    /// Build a client with the default 30 second timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new() -> Result<Self, NetError> {
        Self::with_timeout(Duration::from_secs(crate::env_vars::timeout()))
    }

    /// Build a client with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed.
    pub fn with_timeout(timeout: Duration) -> Result<Self, NetError> {
        let redirect_policy = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            let started_https = attempt
                .previous()
                .first()
                .is_some_and(|url| url.scheme() == "https");
            if started_https && attempt.url().scheme() == "http" {
                return attempt.error("refusing redirect downgrade from https to http");
            }
            attempt.follow()
        });

        let inner = reqwest::blocking::Client::builder()
            .use_rustls_tls()
            .http1_only()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect_policy)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .user_agent(format!("seam/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NetError::Build)?;

        Ok(Self { inner })
    }

    /// Fetch a URL into memory, enforcing the body cap by streaming.
    ///
    /// # Errors
    ///
    /// `NotFound` for a 404, `Status` for other non-success statuses,
    /// `TooLarge` past the cap, and transport errors otherwise.
    pub fn get(&self, url: &str) -> Result<Vec<u8>, NetError> {
        let host = host_of(url);
        let response = self
            .inner
            .get(url)
            .send()
            .map_err(|source| NetError::Request {
                host: host.clone(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NetError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(NetError::Status {
                host,
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut body = Vec::new();
        let mut reader = response.take(MAX_BODY_BYTES + 1);
        reader
            .read_to_end(&mut body)
            .map_err(|source| NetError::Body {
                host: host.clone(),
                source,
            })?;

        if body.len() as u64 > MAX_BODY_BYTES {
            return Err(NetError::TooLarge { host });
        }

        Ok(body)
    }

    /// Stream a URL to an open file, one chunk at a time, with no size cap.
    ///
    /// The callback receives `(received, total)` after each chunk; the total
    /// is `None` when the server did not send a length. Returns the byte
    /// count.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::get`], plus I/O errors from the destination.
    pub fn download_to_file(
        &self,
        url: &str,
        output: &mut std::fs::File,
        on_chunk: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, NetError> {
        let host = host_of(url);
        let mut response = self
            .inner
            .get(url)
            .send()
            .map_err(|source| NetError::Request {
                host: host.clone(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NetError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(NetError::Status {
                host,
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        let mut received: u64 = 0;
        let mut chunk = [0u8; CHUNK_BYTES];

        loop {
            let count = response
                .read(&mut chunk)
                .map_err(|source| NetError::Body {
                    host: host.clone(),
                    source,
                })?;
            if count == 0 {
                break;
            }

            output
                .write_all(chunk.get(..count).unwrap_or_default())
                .map_err(|source| NetError::Body {
                    host: host.clone(),
                    source,
                })?;
            received += count as u64;
            on_chunk(received, total);
        }

        output.flush().map_err(|source| NetError::Body {
            host: host.clone(),
            source,
        })?;

        Ok(received)
    }
}

/// Best-effort host extraction for error messages
fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds() {
        assert!(HttpClient::with_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://rubygems.org/info/rack"), "rubygems.org");
        assert_eq!(host_of("not a url"), "not a url");
    }
}
