//! Parallel gem downloads.
//!
//! A bounded pool of worker threads drains a shared queue of download specs,
//! streaming each artifact to disk and reporting to the multi-row progress
//! display. Artifacts that fail are retried in platform-fallback rounds:
//! each spec carries an ordered list of URL variants (most specific platform
//! first, generic last), and every round re-issues the previous round's
//! failures with the next variant.

use crate::net::{HttpClient, NetError};
use crate::progress::MultiBar;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to download {label}: {source}")]
    Transport {
        label: String,
        #[source]
        source: NetError,
    },

    #[error("failed to write {label}: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {label}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        label: String,
        expected: String,
        actual: String,
    },
}

/// One artifact to fetch
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    /// URL variants to probe, most specific platform first
    pub urls: Vec<String>,
    /// Final on-disk location
    pub destination: PathBuf,
    /// Progress row label
    pub label: String,
    /// Expected SHA-256, when the index carried one
    pub checksum: Option<String>,
}

/// Manages parallel downloads over one HTTP client
#[derive(Debug)]
pub struct DownloadManager {
    client: HttpClient,
    jobs: usize,
    /// Per-chunk sleep, for rate-limit demos
    throttle: Option<Duration>,
}

impl DownloadManager {
    #[must_use]
    pub fn new(client: HttpClient, jobs: usize) -> Self {
        Self {
            client,
            jobs: jobs.max(1),
            throttle: None,
        }
    }

    /// Add an artificial per-chunk delay
    #[must_use]
    pub const fn with_throttle(mut self, throttle: Option<Duration>) -> Self {
        self.throttle = throttle;
        self
    }

    /// The worker count this manager runs with
    #[must_use]
    pub const fn jobs(&self) -> usize {
        self.jobs
    }

    /// Download every spec, retrying failures across URL variants.
    ///
    /// Returns one result slot per spec, carrying the byte count on success.
    /// Partial files are unlinked on failure.
    pub fn download_all(
        &self,
        specs: &[DownloadSpec],
        bar: &MultiBar,
    ) -> Vec<Result<u64, DownloadError>> {
        let results: Vec<Mutex<Option<Result<u64, DownloadError>>>> =
            specs.iter().map(|_| Mutex::new(None)).collect();

        let mut pending: Vec<usize> = (0..specs.len()).collect();
        let mut variant = 0usize;

        while !pending.is_empty() {
            self.run_round(specs, &pending, variant, &results, bar);

            variant += 1;
            pending.retain(|&index| {
                let failed = results.get(index).is_some_and(|slot| {
                    slot.lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .as_ref()
                        .is_some_and(Result::is_err)
                });
                let has_next_variant = specs
                    .get(index)
                    .is_some_and(|spec| variant < spec.urls.len());
                failed && has_next_variant
            });
        }

        results
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .unwrap_or_else(|| {
                        Err(DownloadError::Io {
                            label: String::new(),
                            source: std::io::Error::other("download was never attempted"),
                        })
                    })
            })
            .collect()
    }

    /// One parallel round over the currently pending spec indices
    fn run_round(
        &self,
        specs: &[DownloadSpec],
        pending: &[usize],
        variant: usize,
        results: &[Mutex<Option<Result<u64, DownloadError>>>],
        bar: &MultiBar,
    ) {
        let cursor = Mutex::new(0usize);
        let workers = self.jobs.min(pending.len());

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let cursor = &cursor;
                scope.spawn(move || {
                    loop {
                        let position = {
                            let mut cursor = cursor
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            let position = *cursor;
                            *cursor += 1;
                            position
                        };
                        let Some(&spec_index) = pending.get(position) else {
                            break;
                        };
                        let Some(spec) = specs.get(spec_index) else {
                            break;
                        };

                        let slot = bar.slot(worker, spec_index);
                        bar.set_label(slot, &spec.label);

                        let result = self.fetch_one(spec, variant, bar, slot);
                        match &result {
                            Ok(_) => bar.finish(slot),
                            Err(_) => bar.fail(slot),
                        }
                        if let Some(cell) = results.get(spec_index) {
                            *cell.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
                                Some(result);
                        }
                    }
                });
            }
        });
    }

    fn fetch_one(
        &self,
        spec: &DownloadSpec,
        variant: usize,
        bar: &MultiBar,
        slot: usize,
    ) -> Result<u64, DownloadError> {
        // Past-the-end variants reuse the last (generic) URL
        let url = spec
            .urls
            .get(variant)
            .or_else(|| spec.urls.last())
            .ok_or_else(|| DownloadError::Io {
                label: spec.label.clone(),
                source: std::io::Error::other("spec has no urls"),
            })?;

        let result = self.fetch_to_destination(url, spec, bar, slot);
        if result.is_err() {
            // Never leave partial output behind
            let _ = std::fs::remove_file(&spec.destination);
        }
        result
    }

    fn fetch_to_destination(
        &self,
        url: &str,
        spec: &DownloadSpec,
        bar: &MultiBar,
        slot: usize,
    ) -> Result<u64, DownloadError> {
        if let Some(parent) = spec.destination.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                label: spec.label.clone(),
                source,
            })?;
        }

        let mut file =
            std::fs::File::create(&spec.destination).map_err(|source| DownloadError::Io {
                label: spec.label.clone(),
                source,
            })?;

        let throttle = self.throttle;
        let bytes = self
            .client
            .download_to_file(url, &mut file, &mut |received, total| {
                bar.update(slot, received, total);
                if let Some(delay) = throttle {
                    std::thread::sleep(delay);
                }
            })
            .map_err(|source| DownloadError::Transport {
                label: spec.label.clone(),
                source,
            })?;
        drop(file);

        if let Some(expected) = &spec.checksum {
            let actual =
                compute_checksum(&spec.destination).map_err(|source| DownloadError::Io {
                    label: spec.label.clone(),
                    source,
                })?;
            if &actual != expected {
                return Err(DownloadError::ChecksumMismatch {
                    label: spec.label.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }
}

/// SHA-256 of a file, streamed in 8 KiB blocks
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_checksum(path: &Path) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(buffer.get(..count).unwrap_or_default());
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.gem");
        std::fs::write(&path, b"test content").unwrap();

        assert_eq!(
            compute_checksum(&path).unwrap(),
            "6ae8a75555209fd6c44157c0aed8016e763ff435a19cf186f76863140143ff72"
        );
    }

    #[test]
    fn checksum_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.gem");
        std::fs::File::create(&path).unwrap();

        assert_eq!(
            compute_checksum(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn manager_clamps_jobs() {
        let client = HttpClient::with_timeout(Duration::from_secs(1)).unwrap();
        let manager = DownloadManager::new(client, 0);
        assert_eq!(manager.jobs(), 1);
    }

    #[test]
    fn empty_spec_list_is_empty_results() {
        let client = HttpClient::with_timeout(Duration::from_secs(1)).unwrap();
        let manager = DownloadManager::new(client, 4);
        let bar = MultiBar::hidden(0);
        assert!(manager.download_all(&[], &bar).is_empty());
    }
}
