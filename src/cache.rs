//! Cache statistics and cleanup.

use std::fs;
use std::path::{Path, PathBuf};

/// Counts for one cache tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of files
    pub files: usize,
    /// Total size in bytes
    pub total_size: u64,
}

/// Walk a cache directory and count files and bytes.
///
/// A missing directory is empty, not an error.
///
/// # Errors
///
/// Returns an error if traversal fails mid-walk.
pub fn collect_stats(cache_dir: impl AsRef<Path>) -> std::io::Result<Stats> {
    let mut stats = Stats::default();
    let root = cache_dir.as_ref();
    if !root.exists() {
        return Ok(stats);
    }

    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                stats.files += 1;
                stats.total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }

    Ok(stats)
}

/// Remove a cache tree entirely. Missing trees are fine.
///
/// # Errors
///
/// Returns an error if removal fails.
pub fn clean(cache_dir: impl AsRef<Path>) -> std::io::Result<()> {
    let root = cache_dir.as_ref();
    if root.exists() {
        fs::remove_dir_all(root)?;
    }
    Ok(())
}

/// Render a byte count with binary units: `512 B`, `1.0 KiB`, `2.3 MiB`.
#[must_use]
pub fn human_bytes(size: u64) -> String {
    const UNITS: &[&str] = &["KiB", "MiB", "GiB", "TiB"];

    if size < 1024 {
        return format!("{size} B");
    }

    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_missing_directory() {
        let stats = collect_stats("/nonexistent/seam-cache").unwrap();
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn stats_count_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/x.gem"), b"1234").unwrap();
        fs::write(temp.path().join("a/b/y.gem"), b"12").unwrap();

        let stats = collect_stats(temp.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.total_size, 6);
    }

    #[test]
    fn clean_removes_tree() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("gems");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("x.gem"), b"x").unwrap();

        clean(&target).unwrap();
        assert!(!target.exists());
        clean(&target).unwrap();
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1024), "1.0 KiB");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(1024 * 1024), "1.0 MiB");
    }
}
