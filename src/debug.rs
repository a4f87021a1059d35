//! Debug logging utilities.
//!
//! Debug output goes to stderr and is off unless enabled by the `--debug`
//! flag or `SEAM_DEBUG`. When disabled, logging costs one atomic load.

use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

/// Initialize debug mode from the command-line flag (environment wins too)
pub fn init_debug(enabled: bool) {
    let _ = DEBUG_ENABLED.set(enabled || crate::env_vars::debug_enabled());
}

/// Check if debug mode is enabled
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.get().copied().unwrap_or(false)
}

/// Print a debug message if debug mode is enabled
pub fn debug_log(message: &str) {
    if is_debug_enabled() {
        eprintln!("[seam] {message}");
    }
}

/// Convenience macro for formatted debug logging
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug_enabled() {
            eprintln!("[seam] {}", format_args!($($arg)*));
        }
    };
}
