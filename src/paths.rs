//! Cache layout and Gemfile discovery.
//!
//! Artifacts live under `<cache>/seam/gems/`, unpacked per-command
//! environments under `<cache>/seam/env/<runtime-api>/<primary>/`. An
//! environment is only trusted once its `.installed` marker exists; the
//! marker is written last, so a killed install is simply re-run.
//! Gemfile discovery supports both the traditional (Gemfile/Gemfile.lock)
//! and modern (gems.rb/gems.locked) naming.

use crate::env_vars;
use std::path::{Path, PathBuf};

/// Completion marker written last into an environment directory
pub const INSTALLED_MARKER: &str = ".installed";

/// The root of all seam caches.
///
/// `XDG_CACHE_HOME` wins, then `~/.cache`, then a relative fallback for
/// pathological environments with no home at all.
#[must_use]
pub fn cache_root() -> PathBuf {
    if let Some(xdg) = env_vars::xdg_cache_home() {
        return PathBuf::from(xdg).join("seam");
    }
    if let Some(home) = env_vars::home() {
        return PathBuf::from(home).join(".cache").join("seam");
    }
    dirs::cache_dir()
        .map(|dir| dir.join("seam"))
        .unwrap_or_else(|| PathBuf::from(".seam-cache"))
}

/// Directory for downloaded `.gem` artifacts
#[must_use]
pub fn gems_cache_dir() -> PathBuf {
    cache_root().join("gems")
}

/// Directory for one unpacked environment
#[must_use]
pub fn env_cache_dir(runtime_api: &str, primary: &str) -> PathBuf {
    cache_root().join("env").join(runtime_api).join(primary)
}

/// Whether an environment directory finished installing
#[must_use]
pub fn is_installed(env_dir: &Path) -> bool {
    env_dir.join(INSTALLED_MARKER).is_file()
}

/// Write the completion marker. Call only after every gem is unpacked.
///
/// # Errors
///
/// Returns an error if the marker cannot be written.
pub fn mark_installed(env_dir: &Path) -> std::io::Result<()> {
    std::fs::write(env_dir.join(INSTALLED_MARKER), b"")
}

/// Find the Gemfile in `dir`: gems.rb (modern) wins over Gemfile
/// (traditional); defaults to Gemfile when neither exists.
#[must_use]
pub fn find_gemfile_in(dir: impl AsRef<Path>) -> PathBuf {
    let dir = dir.as_ref();

    let gems_rb = dir.join("gems.rb");
    if gems_rb.exists() {
        return gems_rb;
    }

    let gemfile = dir.join("Gemfile");
    if gemfile.exists() {
        return gemfile;
    }

    gemfile
}

/// Find the Gemfile in the current directory
#[must_use]
pub fn find_gemfile() -> PathBuf {
    find_gemfile_in(".")
}

/// The lock file that belongs to a Gemfile:
/// gems.rb maps to gems.locked, everything else appends `.lock`.
#[must_use]
pub fn lockfile_for_gemfile(gemfile: &Path) -> PathBuf {
    if let Some(file_name) = gemfile.file_name()
        && file_name == "gems.rb"
    {
        return gemfile.with_file_name("gems.locked");
    }

    let mut lockfile = gemfile.as_os_str().to_owned();
    lockfile.push(".lock");
    PathBuf::from(lockfile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn find_gemfile_prefers_gems_rb() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("gems.rb"), "source 'https://rubygems.org'\n").unwrap();
        fs::write(temp.path().join("Gemfile"), "source 'https://rubygems.org'\n").unwrap();

        let found = find_gemfile_in(temp.path());
        assert_eq!(found.file_name().unwrap(), "gems.rb");
    }

    #[test]
    fn find_gemfile_falls_back() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Gemfile"), "gem 'rack'\n").unwrap();
        assert_eq!(
            find_gemfile_in(temp.path()).file_name().unwrap(),
            "Gemfile"
        );
    }

    #[test]
    fn find_gemfile_defaults_when_absent() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            find_gemfile_in(temp.path()).file_name().unwrap(),
            "Gemfile"
        );
    }

    #[test]
    fn lockfile_mapping() {
        assert_eq!(
            lockfile_for_gemfile(Path::new("gems.rb")),
            Path::new("gems.locked")
        );
        assert_eq!(
            lockfile_for_gemfile(Path::new("custom/Gemfile")),
            Path::new("custom/Gemfile.lock")
        );
    }

    #[test]
    fn installed_marker_round_trip() {
        let temp = TempDir::new().unwrap();
        assert!(!is_installed(temp.path()));
        mark_installed(temp.path()).unwrap();
        assert!(is_installed(temp.path()));
    }

    #[test]
    fn env_dir_layout() {
        let dir = env_cache_dir("3.3.0", "rails-7.0.8");
        let text = dir.display().to_string();
        assert!(text.ends_with("env/3.3.0/rails-7.0.8"));
    }
}
