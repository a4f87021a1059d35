//! Install pipeline: fetch resolved gems into the artifact cache and unpack
//! them into a per-command environment.
//!
//! Downloads go through the worker pool with platform-fallback URL variants
//! (native artifact first, generic last). Unpacking writes the sidecar
//! markers per gem, and the environment's `.installed` marker is written
//! only after every gem is in place, so a partial install is never trusted
//! and re-running after an interruption is safe.

use crate::compact_index::CompactIndex;
use crate::download::{DownloadManager, DownloadSpec};
use crate::extract;
use crate::net::HttpClient;
use crate::paths;
use crate::progress::MultiBar;
use crate::version::Version;
use anyhow::{Context, Result, bail};
use std::path::Path;

/// Fixed-row progress is pleasant up to this many artifacts
const FIXED_MODE_LIMIT: usize = 8;

/// Install outcome counts
#[derive(Debug, Default, Copy, Clone)]
pub struct InstallReport {
    pub installed: usize,
    pub skipped: usize,
}

/// Drives download and unpack for one environment
#[derive(Debug)]
pub struct Installer<'a> {
    index: &'a mut CompactIndex,
    client: HttpClient,
    source: String,
    jobs: usize,
    quiet: bool,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(
        index: &'a mut CompactIndex,
        client: HttpClient,
        source: impl Into<String>,
        jobs: usize,
        quiet: bool,
    ) -> Self {
        Self {
            index,
            client,
            source: source.into(),
            jobs: jobs.max(1),
            quiet,
        }
    }

    /// Install `gems` into `env_dir`.
    ///
    /// A directory that already carries the completion marker is a cache
    /// hit and is left untouched.
    ///
    /// # Errors
    ///
    /// Fails on download, checksum, or extraction errors; the environment
    /// marker is not written in that case.
    pub fn install(
        &mut self,
        gems: &[(String, Version)],
        env_dir: &Path,
    ) -> Result<InstallReport> {
        let mut report = InstallReport::default();

        if paths::is_installed(env_dir) {
            crate::debug!("environment {} already installed", env_dir.display());
            report.skipped = gems.len();
            return Ok(report);
        }

        let gems_cache = paths::gems_cache_dir();
        std::fs::create_dir_all(&gems_cache)
            .with_context(|| format!("failed to create {}", gems_cache.display()))?;

        // Figure out what still needs downloading
        let mut specs = Vec::new();
        for (name, version) in gems {
            let full_name = format!("{name}-{version}");
            let destination = gems_cache.join(format!("{full_name}.gem"));
            if destination.is_file() {
                continue;
            }

            let checksum = self.index.checksum(name, version).unwrap_or_default();
            specs.push(DownloadSpec {
                urls: artifact_urls(&self.source, &full_name),
                destination,
                label: full_name,
                checksum,
            });
        }

        if !specs.is_empty() {
            let bar = if self.quiet {
                MultiBar::hidden(specs.len())
            } else if specs.len() <= FIXED_MODE_LIMIT {
                let labels: Vec<String> = specs.iter().map(|spec| spec.label.clone()).collect();
                MultiBar::fixed(&labels)
            } else {
                MultiBar::worker(self.jobs.min(specs.len()), specs.len())
            };

            let manager = DownloadManager::new(self.client.clone(), self.jobs);
            let results = manager.download_all(&specs, &bar);
            bar.close();

            for (spec, result) in specs.iter().zip(results) {
                if let Err(error) = result {
                    bail!("failed to fetch {}: {error}", spec.label);
                }
            }
        }

        // Unpack everything; stale partial trees are replaced wholesale
        for (name, version) in gems {
            let full_name = format!("{name}-{version}");
            let artifact = gems_cache.join(format!("{full_name}.gem"));
            let dest = env_dir.join("gems").join(&full_name);

            if dest.exists() {
                std::fs::remove_dir_all(&dest)
                    .with_context(|| format!("failed to clear {}", dest.display()))?;
            }
            extract::unpack(&artifact, &dest)
                .with_context(|| format!("failed to unpack {full_name}"))?;
            report.installed += 1;
        }

        paths::mark_installed(env_dir)
            .with_context(|| format!("failed to mark {} installed", env_dir.display()))?;

        Ok(report)
    }
}

/// The URL variants to probe for one artifact: native platform first
/// (glibc-suffixed, then plain), generic last.
fn artifact_urls(source: &str, full_name: &str) -> Vec<String> {
    let source = source.trim_end_matches('/');
    let platform = crate::environment::host_platform();
    vec![
        format!("{source}/downloads/{full_name}-{platform}-gnu.gem"),
        format!("{source}/downloads/{full_name}-{platform}.gem"),
        format!("{source}/downloads/{full_name}.gem"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_urls_most_specific_first() {
        let urls = artifact_urls("https://rubygems.org/", "rack-3.0.8");
        assert_eq!(urls.len(), 3);
        assert!(urls[0].ends_with("-gnu.gem"));
        assert_eq!(urls[2], "https://rubygems.org/downloads/rack-3.0.8.gem");
        assert!(urls[1].len() < urls[0].len());
    }

    #[test]
    fn installed_marker_short_circuits() {
        let temp = tempfile::tempdir().unwrap();
        paths::mark_installed(temp.path()).unwrap();

        let client = HttpClient::with_timeout(std::time::Duration::from_secs(1)).unwrap();
        let mut index = CompactIndex::new(client.clone(), "https://rubygems.org");
        let mut installer = Installer::new(&mut index, client, "https://rubygems.org", 2, true);

        let gems = vec![("rack".to_string(), Version::parse("3.0.8").unwrap())];
        let report = installer.install(&gems, temp.path()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.installed, 0);
    }
}
