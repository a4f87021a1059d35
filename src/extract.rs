//! Gem archive extraction.
//!
//! A `.gem` file is an outer uncompressed tar with three entries:
//! `metadata.gz` (gzipped YAML gemspec), `data.tar.gz` (gzipped tar of the
//! files to install), and `checksums.yaml.gz`. Unpacking streams the inner
//! archive through a temporary file and extracts it entry by entry so every
//! path can be validated: absolute paths are rejected and `..` components
//! may never escape the destination root, symlink targets included.
//! Sidecar markers (`.require_paths`, `.executables`) are written beside
//! the unpacked tree so later launches never reparse the gemspec.

use crate::gem_metadata::{self, GemspecInfo};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use thiserror::Error;

/// Cap for buffered single-entry reads (the gemspec is small)
pub const METADATA_CAP: u64 = 10 * 1024 * 1024;

/// Sidecar file listing the gem's load paths
pub const REQUIRE_PATHS_MARKER: &str = ".require_paths";

/// Sidecar file listing the gem's executables
pub const EXECUTABLES_MARKER: &str = ".executables";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read gem archive {gem}: {source}")]
    Io {
        gem: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid gem archive {gem}: {reason}")]
    BadArchive { gem: String, reason: String },

    #[error("entry {entry} not found in {gem}")]
    MissingEntry { gem: String, entry: String },

    #[error("entry {entry} exceeds the {limit} byte cap")]
    TooLarge { entry: String, limit: u64 },

    #[error("archive entry escapes the destination: {path}")]
    Traversal { path: String },
}

impl ExtractError {
    fn io(gem: &Path) -> impl Fn(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            gem: gem.display().to_string(),
            source,
        }
    }
}

/// What `unpack` learned about the gem, from the gemspec fields
#[derive(Debug, Clone, Default)]
pub struct UnpackedGem {
    pub require_paths: Vec<String>,
    pub executables: Vec<String>,
    pub bindir: String,
}

/// List the outer archive's entries as `(name, size)` pairs.
///
/// # Errors
///
/// Returns an error if the file cannot be read as a tar archive.
pub fn list_entries(gem_path: &Path) -> Result<Vec<(String, u64)>, ExtractError> {
    let file = fs::File::open(gem_path).map_err(ExtractError::io(gem_path))?;
    let mut archive = Archive::new(file);

    let mut entries = Vec::new();
    for entry in archive.entries().map_err(ExtractError::io(gem_path))? {
        let entry = entry.map_err(ExtractError::io(gem_path))?;
        let name = entry
            .path()
            .map_err(ExtractError::io(gem_path))?
            .display()
            .to_string();
        entries.push((name, entry.size()));
    }
    Ok(entries)
}

/// Read one outer entry into memory, bounded by `cap`.
///
/// # Errors
///
/// `MissingEntry` when absent, `TooLarge` past the cap, I/O otherwise.
pub fn read_entry(gem_path: &Path, name: &str, cap: u64) -> Result<Vec<u8>, ExtractError> {
    let file = fs::File::open(gem_path).map_err(ExtractError::io(gem_path))?;
    let mut archive = Archive::new(file);

    for entry in archive.entries().map_err(ExtractError::io(gem_path))? {
        let mut entry = entry.map_err(ExtractError::io(gem_path))?;
        let path = entry.path().map_err(ExtractError::io(gem_path))?;
        if path.to_str() != Some(name) {
            continue;
        }

        if entry.size() > cap {
            return Err(ExtractError::TooLarge {
                entry: name.to_string(),
                limit: cap,
            });
        }
        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buffer)
            .map_err(ExtractError::io(gem_path))?;
        return Ok(buffer);
    }

    Err(ExtractError::MissingEntry {
        gem: gem_path.display().to_string(),
        entry: name.to_string(),
    })
}

/// Stream one outer entry to an open file with no size cap.
///
/// # Errors
///
/// `MissingEntry` when absent, I/O otherwise.
pub fn stream_entry_to_file(
    gem_path: &Path,
    name: &str,
    output: &mut fs::File,
) -> Result<u64, ExtractError> {
    let file = fs::File::open(gem_path).map_err(ExtractError::io(gem_path))?;
    let mut archive = Archive::new(file);

    for entry in archive.entries().map_err(ExtractError::io(gem_path))? {
        let mut entry = entry.map_err(ExtractError::io(gem_path))?;
        let path = entry.path().map_err(ExtractError::io(gem_path))?;
        if path.to_str() != Some(name) {
            continue;
        }
        let bytes = std::io::copy(&mut entry, output).map_err(ExtractError::io(gem_path))?;
        return Ok(bytes);
    }

    Err(ExtractError::MissingEntry {
        gem: gem_path.display().to_string(),
        entry: name.to_string(),
    })
}

/// Unpack a gem's file tree into `dest_dir` and write the sidecar markers.
///
/// `data.tar.gz` is streamed to a temporary file first, then extracted
/// through gzip with per-entry sandbox validation. The temporary file is
/// removed on every exit path.
///
/// # Errors
///
/// Returns an error for missing entries, traversal attempts, or I/O
/// failures; partial state under a failed destination is the caller's to
/// discard (the `.installed` marker is never written by this function).
pub fn unpack(gem_path: &Path, dest_dir: &Path) -> Result<UnpackedGem, ExtractError> {
    // Gemspec fields drive the sidecars; missing metadata falls back to
    // defaults rather than failing the unpack.
    let info = match read_entry(gem_path, "metadata.gz", METADATA_CAP) {
        Ok(compressed) => {
            let mut decoder = GzDecoder::new(compressed.as_slice());
            let mut yaml = String::new();
            match decoder.read_to_string(&mut yaml) {
                Ok(_) => gem_metadata::parse_gemspec(&yaml),
                Err(_) => GemspecInfo::default(),
            }
        }
        Err(ExtractError::MissingEntry { .. }) => GemspecInfo::default(),
        Err(error) => return Err(error),
    };

    let mut temp = tempfile::NamedTempFile::new().map_err(ExtractError::io(gem_path))?;
    stream_entry_to_file(gem_path, "data.tar.gz", temp.as_file_mut())?;

    let reopened = temp.reopen().map_err(ExtractError::io(gem_path))?;
    let mut archive = Archive::new(GzDecoder::new(reopened));

    fs::create_dir_all(dest_dir).map_err(ExtractError::io(gem_path))?;

    for entry in archive.entries().map_err(ExtractError::io(gem_path))? {
        let mut entry = entry.map_err(ExtractError::io(gem_path))?;
        let entry_path = entry
            .path()
            .map_err(ExtractError::io(gem_path))?
            .into_owned();
        let relative = validate_entry_path(&entry_path)?;
        let target = dest_dir.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(ExtractError::io(gem_path))?;
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(ExtractError::io(gem_path))?;
                }
                let mut output = fs::File::create(&target).map_err(ExtractError::io(gem_path))?;
                std::io::copy(&mut entry, &mut output).map_err(ExtractError::io(gem_path))?;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(ExtractError::io(gem_path))?
                    .ok_or_else(|| ExtractError::BadArchive {
                        gem: gem_path.display().to_string(),
                        reason: format!("symlink {} without a target", relative.display()),
                    })?;
                validate_link_target(&relative, &link)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(ExtractError::io(gem_path))?;
                }
                #[cfg(unix)]
                {
                    let _ = fs::remove_file(&target);
                    std::os::unix::fs::symlink(&link, &target)
                        .map_err(ExtractError::io(gem_path))?;
                }
                #[cfg(not(unix))]
                drop(link);
            }
            // Hard links, devices, and the rest have no place in a gem
            _ => {}
        }
    }

    write_sidecars(dest_dir, &info).map_err(ExtractError::io(gem_path))?;

    Ok(UnpackedGem {
        require_paths: info.require_paths,
        executables: info.executables,
        bindir: info.bindir,
    })
}

fn write_sidecars(dest_dir: &Path, info: &GemspecInfo) -> std::io::Result<()> {
    let mut require_paths = fs::File::create(dest_dir.join(REQUIRE_PATHS_MARKER))?;
    for path in &info.require_paths {
        writeln!(require_paths, "{path}")?;
    }

    let mut executables = fs::File::create(dest_dir.join(EXECUTABLES_MARKER))?;
    for name in &info.executables {
        writeln!(executables, "{name}")?;
    }
    Ok(())
}

/// Validate one archive path: relative, and its `..` components never take
/// the cumulative depth negative.
fn validate_entry_path(path: &Path) -> Result<PathBuf, ExtractError> {
    if path.is_absolute() {
        return Err(ExtractError::Traversal {
            path: path.display().to_string(),
        });
    }

    let mut depth: i32 = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(ExtractError::Traversal {
                        path: path.display().to_string(),
                    });
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::Traversal {
                    path: path.display().to_string(),
                });
            }
        }
    }

    Ok(path.to_path_buf())
}

/// Validate a symlink target against the link's own directory depth
fn validate_link_target(link_path: &Path, target: &Path) -> Result<(), ExtractError> {
    if target.is_absolute() {
        return Err(ExtractError::Traversal {
            path: target.display().to_string(),
        });
    }

    // Depth of the directory containing the link
    let mut depth: i32 = link_path.components().count() as i32 - 1;
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(ExtractError::Traversal {
                        path: target.display().to_string(),
                    });
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::Traversal {
                    path: target.display().to_string(),
                });
            }
        }
    }
    Ok(())
}
