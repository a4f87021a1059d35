//! Environment variable handling.

use std::env;

/// Override for the gem source URL (`SEAM_GEM_SOURCE`).
pub fn gem_source() -> Option<String> {
    env::var("SEAM_GEM_SOURCE").ok().filter(|s| !s.is_empty())
}

/// Worker count for parallel downloads (`SEAM_JOBS`).
pub fn jobs() -> Option<usize> {
    env::var("SEAM_JOBS").ok().and_then(|s| s.parse().ok())
}

/// Per-request network timeout in seconds (`SEAM_TIMEOUT`, default 30).
pub fn timeout() -> u64 {
    env::var("SEAM_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(crate::net::DEFAULT_TIMEOUT_SECS)
}

/// Whether debug logging is enabled (`SEAM_DEBUG`).
pub fn debug_enabled() -> bool {
    env::var("SEAM_DEBUG").ok().is_some_and(|s| {
        let s = s.to_lowercase();
        s == "1" || s == "true" || s == "yes"
    })
}

/// Explicit ruby executable to launch with (`SEAM_RUBY`).
pub fn ruby_path() -> Option<String> {
    env::var("SEAM_RUBY").ok().filter(|s| !s.is_empty())
}

/// XDG cache root override (`XDG_CACHE_HOME`).
pub fn xdg_cache_home() -> Option<String> {
    env::var("XDG_CACHE_HOME").ok().filter(|s| !s.is_empty())
}

/// The user's home directory (`HOME`).
pub fn home() -> Option<String> {
    env::var("HOME").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_without_override() {
        // The variable is unset in test runs unless a caller exported it
        if env::var("SEAM_TIMEOUT").is_err() {
            assert_eq!(timeout(), crate::net::DEFAULT_TIMEOUT_SECS);
        }
    }

    #[test]
    fn empty_source_is_ignored() {
        if env::var("SEAM_GEM_SOURCE").is_err() {
            assert_eq!(gem_source(), None);
        }
    }
}
