//! Global runtime configuration.
//!
//! Holds the one process-wide switch: whether status lines are printed.
//! Set once at startup and read only from status reporting paths, so the
//! atomic load never sits inside a hot loop.

use std::sync::atomic::{AtomicBool, Ordering};

static QUIET: AtomicBool = AtomicBool::new(false);

/// Suppress `[ctx]` status lines on stderr.
#[inline]
pub fn set_quiet(enabled: bool) {
    QUIET.store(enabled, Ordering::Release);
}

/// Whether status output is suppressed.
#[inline]
pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Acquire)
}

/// Print a status line to stderr unless quiet mode is on.
pub fn status(args: std::fmt::Arguments) {
    if !is_quiet() {
        eprintln!("[ctx] {}", args);
    }
}

/// Status reporting macro. Formats like `println!` and writes to stderr.
#[macro_export]
macro_rules! status {
    ($($arg:tt)*) => {
        $crate::config::status(format_args!($($arg)*))
    };
}
