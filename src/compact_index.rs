//! Compact-index client: per-package version lists with dependency vectors.
//!
//! Each package is fetched lazily from `GET /info/{name}`. The response is a
//! header section terminated by a `---` line, then one line per release:
//!
//! ```text
//! <version>[-<platform>] <dep,...>|<meta>
//! ```
//!
//! where a `<dep>` is `name:c1&c2` and `<meta>` holds `key:value` pairs such
//! as `checksum:` and `ruby:`. Only `ruby`-platform (or bare) versions take
//! part in resolution, and versions whose `ruby:` requirement rules out the
//! configured runtime are filtered. Entries are cached in memory for the
//! life of the client.

use crate::net::{HttpClient, NetError};
use crate::resolver::{DependencyProvider, ProviderError};
use crate::version::{ConstraintSet, Version};
use std::collections::HashMap;
use std::sync::Arc;

/// One package's cached release data, newest first.
///
/// The dependency vectors and checksums are parallel to `versions`, which
/// keeps the version listing itself allocation-free for the solver's
/// repeated queries.
#[derive(Debug, Default)]
pub struct PackageEntry {
    pub versions: Vec<Version>,
    pub dependencies: Vec<Vec<(String, ConstraintSet)>>,
    pub checksums: Vec<Option<String>>,
}

/// Client for a compact-index endpoint
#[derive(Debug)]
pub struct CompactIndex {
    client: HttpClient,
    base_url: String,
    ruby_version: Option<Version>,
    cache: HashMap<String, Arc<PackageEntry>>,
}

impl CompactIndex {
    /// Create a client for a base URL like `https://rubygems.org`.
    #[must_use]
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            client,
            base_url,
            ruby_version: None,
            cache: HashMap::new(),
        }
    }

    /// Filter versions whose `ruby:` requirement rules out this runtime
    #[must_use]
    pub fn with_ruby_version(mut self, version: Option<Version>) -> Self {
        self.ruby_version = version;
        self
    }

    /// Fetch (or reuse) the entry for one package. Unknown packages resolve
    /// to an empty entry; transport failures surface.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the index cannot be reached.
    pub fn entry(&mut self, name: &str) -> Result<Arc<PackageEntry>, NetError> {
        if let Some(entry) = self.cache.get(name) {
            return Ok(Arc::clone(entry));
        }

        let url = format!("{}/info/{}", self.base_url, name);
        let entry = match self.client.get(&url) {
            Ok(body) => {
                let text = String::from_utf8_lossy(&body);
                parse_info(&text, self.ruby_version.as_ref())
            }
            Err(NetError::NotFound { .. }) => PackageEntry::default(),
            Err(error) => return Err(error),
        };
        crate::debug!("index: {} has {} usable versions", name, entry.versions.len());

        let entry = Arc::new(entry);
        self.cache.insert(name.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// The recorded checksum for one exact version, if the index carried one
    ///
    /// # Errors
    ///
    /// Returns a transport error when the entry has to be fetched and fails.
    pub fn checksum(&mut self, name: &str, version: &Version) -> Result<Option<String>, NetError> {
        let entry = self.entry(name)?;
        Ok(entry
            .versions
            .iter()
            .position(|v| v == version)
            .and_then(|index| entry.checksums.get(index))
            .and_then(Clone::clone))
    }
}

impl DependencyProvider for CompactIndex {
    fn versions(&mut self, package: &str) -> Result<Vec<Version>, ProviderError> {
        let entry = self.entry(package).map_err(|source| ProviderError::Fetch {
            package: package.to_string(),
            source,
        })?;
        Ok(entry.versions.clone())
    }

    fn dependencies(
        &mut self,
        package: &str,
        version: &Version,
    ) -> Result<Vec<(String, ConstraintSet)>, ProviderError> {
        let entry = self.entry(package).map_err(|source| ProviderError::Fetch {
            package: package.to_string(),
            source,
        })?;
        Ok(entry
            .versions
            .iter()
            .position(|v| v == version)
            .and_then(|index| entry.dependencies.get(index))
            .cloned()
            .unwrap_or_default())
    }
}

/// Parse an `/info/{name}` body into a package entry
fn parse_info(text: &str, ruby_version: Option<&Version>) -> PackageEntry {
    let mut releases: Vec<(Version, Vec<(String, ConstraintSet)>, Option<String>)> = Vec::new();
    let mut in_body = false;

    for line in text.lines() {
        if !in_body {
            in_body = line.trim_end() == "---";
            continue;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(release) = parse_release_line(line, ruby_version) {
            releases.push(release);
        }
    }

    // Newest first, stably, so equal versions keep index order
    releases.sort_by(|a, b| b.0.cmp(&a.0));

    let mut entry = PackageEntry::default();
    for (version, dependencies, checksum) in releases {
        entry.versions.push(version);
        entry.dependencies.push(dependencies);
        entry.checksums.push(checksum);
    }
    entry
}

fn parse_release_line(
    line: &str,
    ruby_version: Option<&Version>,
) -> Option<(Version, Vec<(String, ConstraintSet)>, Option<String>)> {
    let (version_token, rest) = line.split_once(' ').unwrap_or((line, ""));

    // A `-x` suffix where `x` is a letter is a platform; only `ruby` (or a
    // bare version) participates in resolution.
    let version_text = match split_platform(version_token) {
        (version, Some(platform)) => {
            if platform != "ruby" {
                return None;
            }
            version
        }
        (version, None) => version,
    };
    let version = Version::parse(version_text).ok()?;

    let (deps_text, meta_text) = rest.split_once('|').unwrap_or((rest, ""));

    let mut checksum = None;
    let mut required_ruby: Option<ConstraintSet> = None;
    for pair in meta_text.split(',') {
        let Some((key, value)) = pair.split_once(':') else {
            continue;
        };
        match key.trim() {
            "checksum" => checksum = Some(value.trim().to_string()),
            "ruby" => {
                // Ampersands join ANDed constraints, same as dependencies
                required_ruby = ConstraintSet::parse(&value.replace('&', ",")).ok();
            }
            _ => {}
        }
    }

    if let (Some(required), Some(runtime)) = (&required_ruby, ruby_version)
        && !required.matches(runtime)
    {
        return None;
    }

    let mut dependencies = Vec::new();
    for dep in deps_text.split(',') {
        let dep = dep.trim();
        if dep.is_empty() {
            continue;
        }
        let Some((name, constraints)) = dep.split_once(':') else {
            continue;
        };
        // An unparseable constraint skips this dependency, not the release
        match ConstraintSet::parse(&constraints.replace('&', ",")) {
            Ok(set) => dependencies.push((name.trim().to_string(), set)),
            Err(_) => continue,
        }
    }

    Some((version, dependencies, checksum))
}

/// Split `1.2.3-arm64-darwin` into the version text and its platform suffix.
///
/// The platform starts at the first `-` followed by a letter; dashes
/// followed by digits stay part of the version text.
fn split_platform(token: &str) -> (&str, Option<&str>) {
    for (index, ch) in token.char_indices() {
        if ch == '-' {
            let next = token.get(index + 1..).and_then(|rest| rest.chars().next());
            if next.is_some_and(|c| c.is_ascii_alphabetic()) {
                let platform = token.get(index + 1..).unwrap_or_default();
                let version = token.get(..index).unwrap_or_default();
                return (version, Some(platform));
            }
        }
    }
    (token, None)
}
