//! Small, hand-rolled error types — mirrors `entities.rs`'s
//! `HOOK_STATUS`/`hook.rs`'s `Result<(), i32>` style rather than pulling
//! in `anyhow`/`thiserror`. Errors here never cross into the host's
//! threads: every caller in this crate degrades to a no-op on failure.

use std::fmt;

/// A required signature could not be located, or no resolver profile
/// matched.
#[derive(Debug)]
pub enum DiscoveryError {
    SignatureNotFound(&'static str),
    NoProfileMatched,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::SignatureNotFound(what) => {
                write!(f, "signature not found: {what}")
            }
            DiscoveryError::NoProfileMatched => write!(f, "no resolver profile matched"),
        }
    }
}

/// OS primitive failure in the RCON server.
#[derive(Debug)]
pub enum ServerError {
    Socket(std::io::Error),
    Bind(std::io::Error),
    Recv(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Socket(e) => write!(f, "socket: {e}"),
            ServerError::Bind(e) => write!(f, "bind: {e}"),
            ServerError::Recv(e) => write!(f, "recv: {e}"),
        }
    }
}

/// Failure to patch the host's formatted-print CALL site. The server
/// continues running without output mirroring when this occurs.
#[derive(Debug)]
pub enum PatchError {
    CallSiteNotFound,
    ProtectFailed,
    AllocFailed,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::CallSiteNotFound => write!(f, "call site not found"),
            PatchError::ProtectFailed => write!(f, "VirtualProtect failed"),
            PatchError::AllocFailed => write!(f, "VirtualAlloc failed"),
        }
    }
}

/// Format an error the way `rconserver.c`'s `cons_perror` does: as the
/// ASCII string `echo ERROR: <prefix>: <description>`, meant to be
/// submitted through `console_command_entry` so the host's `echo`
/// command surfaces it in the game's UI.
pub fn echo_error_line(prefix: &str, description: &str) -> String {
    format!("echo ERROR: {prefix}: {description}")
}
