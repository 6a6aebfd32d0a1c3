//! Diagnostic output — human-readable lines to the process's standard
//! output. No structured logging: this stays a thin `println!` wrapper
//! rather than pulling in `log`/`tracing`.
//!
//! Mirrors `entities::log`/`logf`, retargeted from a debug log file to
//! stdout, with an `AllocConsole` call on Windows so output is visible
//! even when the host has no console.

#[cfg(windows)]
use winapi::um::consoleapi::AllocConsole;

/// Give ourselves a console on Windows if the host process doesn't have
/// one (GUI subsystem binaries, e.g. most ZDoom builds). Best-effort:
/// failure here is not fatal, it just means diagnostics are lost.
#[cfg(windows)]
pub fn ensure_console() {
    unsafe {
        AllocConsole();
    }
}

#[cfg(unix)]
pub fn ensure_console() {
    // POSIX hosts already have inherited stdio.
}

/// Print a line to the diagnostic stream.
pub fn line(s: &str) {
    println!("[rcon_inject] {s}");
}

/// Print a formatted line to the diagnostic stream.
#[macro_export]
macro_rules! diag {
    ($($arg:tt)*) => {
        $crate::diag::line(&format!($($arg)*))
    };
}
