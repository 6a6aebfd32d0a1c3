//! Hard-coded constants for the RCON bridge.
//!
//! The port, address, and opcodes are fixed — there is no configuration
//! surface to parse.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Loopback address and port the server binds to.
pub const RCON_PORT: u16 = 10666;

pub fn rcon_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), RCON_PORT)
}

/// Every datagram in both directions starts with this byte.
pub const WIRE_PREFIX: u8 = 0xFF;

// Client -> server opcodes.
pub const CLRC_BEGINCONNECTION: u8 = 52;
pub const CLRC_COMMAND: u8 = 54;

// Server -> client opcodes.
pub const SVRC_LOGGEDIN: u8 = 35;
pub const SVRC_MESSAGE: u8 = 37;

/// Largest payload `SVRC_MESSAGE` will carry.
pub const MAX_MESSAGE_PAYLOAD: usize = 4094;

/// Largest command payload accepted from `CLRC_COMMAND` before truncation.
pub const MAX_COMMAND_PAYLOAD: usize = 4094;

/// String literals the ZDoom resolver profile requires to be present.
pub const ZDOOM_PRINTF_STRING: &str = "\u{1c}GScript error, \"%s\" line %d:";
pub const ZDOOM_CONSOLE_STRING: &str = "toggle idmypos";

/// String literals the Russian-Doom resolver profile requires to be present.
pub const RDOOM_YOU_GOT_IT: &str = "YOU GOT IT";
pub const RDOOM_SECRET_REVEALED: &str = "A SECRET IS REVEALED";

/// Environment variable that may have been used to coerce the loader into
/// preloading this library; cleared on successful attach so child
/// processes don't inherit the injection.
#[cfg(unix)]
pub const INJECTION_ENV_VAR: &str = "LD_PRELOAD";

#[cfg(windows)]
pub const INJECTION_ENV_VAR: &str = "RCON_INJECT_LOAD";
