//! Component F — RCON protocol server.
//!
//! A UDP receive loop on a dedicated thread, bound to the hard-coded
//! loopback address in [`crate::config`]. Dispatch to the host is
//! abstracted behind [`CommandSink`] so the wire-handling logic (login
//! handshake, idempotence, truncation, unknown-opcode drop) can be
//! exercised against a recording stub without a real resolved function
//! pointer.

use crate::abi;
use crate::config::{
    self, CLRC_BEGINCONNECTION, CLRC_COMMAND, MAX_COMMAND_PAYLOAD, MAX_MESSAGE_PAYLOAD,
    SVRC_LOGGEDIN, SVRC_MESSAGE, WIRE_PREFIX,
};
use crate::diag;
use crate::errors::{self, ServerError};
use crate::resolve::ResolvedSymbols;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Whatever is capable of receiving a dispatched console command. The
/// live backend calls through the resolved host function pointer;
/// tests record invocations instead.
pub trait CommandSink: Send + Sync {
    fn dispatch(&self, cmd: &[u8]);
}

/// Dispatches through a resolved [`ResolvedSymbols`] record: the
/// primary `console_command_entry` target if present, else the
/// `console_player`/`give_artifact_entry` fallback pair.
pub struct HostConsoleSink {
    resolved: ResolvedSymbols,
}

impl HostConsoleSink {
    pub fn new(resolved: ResolvedSymbols) -> Self {
        HostConsoleSink { resolved }
    }
}

type FnGiveArtifact = unsafe extern "cdecl" fn(usize, i32, *const u8) -> i32;

impl CommandSink for HostConsoleSink {
    fn dispatch(&self, cmd: &[u8]) {
        if let Some((entry, abi)) = self.resolved.console_command_entry {
            unsafe { abi::call_console_command(abi, entry, cmd.as_ptr(), 0) };
            return;
        }
        if let (Some(player), Some(give_artifact)) =
            (self.resolved.console_player, self.resolved.give_artifact_entry)
        {
            unsafe {
                let f: FnGiveArtifact = std::mem::transmute(give_artifact);
                f(player, 1, std::ptr::null());
            }
            return;
        }
        diag!(
            "command dropped, no dispatch target resolved: {}",
            String::from_utf8_lossy(cmd).trim_end_matches('\0')
        );
    }
}

pub struct ServerState<S: CommandSink> {
    socket: UdpSocket,
    client: Mutex<Option<SocketAddr>>,
    is_ready: AtomicBool,
    sink: S,
}

impl<S: CommandSink> ServerState<S> {
    /// Bind to the hard-coded RCON address.
    pub fn bind(sink: S) -> Result<Self, ServerError> {
        Self::bind_addr(config::rcon_bind_addr(), sink)
    }

    /// Bind to an arbitrary address. Used by tests so parallel runs
    /// don't fight over the fixed port.
    pub fn bind_addr(addr: SocketAddr, sink: S) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr).map_err(ServerError::Bind)?;
        Ok(ServerState {
            socket,
            client: Mutex::new(None),
            is_ready: AtomicBool::new(false),
            sink,
        })
    }

    pub fn client_endpoint(&self) -> Option<SocketAddr> {
        *self.client.lock().unwrap()
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle one already-received datagram.
    pub fn handle_datagram(&self, from: SocketAddr, buf: &[u8]) {
        if buf.len() < 2 || buf[0] != WIRE_PREFIX {
            return;
        }

        match buf[1] {
            CLRC_BEGINCONNECTION => {
                *self.client.lock().unwrap() = Some(from);
                self.is_ready.store(true, Ordering::Release);
                let reply = [WIRE_PREFIX, SVRC_LOGGEDIN];
                let _ = self.socket.send_to(&reply, from);
                diag!("client {from} logged in");
            }
            CLRC_COMMAND => {
                if !self.is_ready.load(Ordering::Acquire) {
                    diag!("command dropped: host not ready");
                    return;
                }
                let end = buf.len().min(2 + MAX_COMMAND_PAYLOAD);
                let mut cmd = buf[2..end].to_vec();
                cmd.push(0);
                self.sink.dispatch(&cmd);
            }
            _ => {}
        }
    }

    /// Run the receive loop forever. Terminates silently on a
    /// `recvfrom` failure.
    pub fn run(&self) {
        let mut buf = [0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => self.handle_datagram(from, &buf[..n]),
                Err(e) => {
                    let mut cmd = errors::echo_error_line("recv", &e.to_string()).into_bytes();
                    cmd.push(0);
                    self.sink.dispatch(&cmd);
                    return;
                }
            }
        }
    }

    /// Mirror captured host output to the registered client, if any.
    /// The output trampoline's capture callback target.
    pub fn send_message(&self, payload: &[u8]) {
        let Some(client) = self.client_endpoint() else {
            return;
        };
        let end = payload.len().min(MAX_MESSAGE_PAYLOAD);
        let mut datagram = Vec::with_capacity(2 + end);
        datagram.push(WIRE_PREFIX);
        datagram.push(SVRC_MESSAGE);
        datagram.extend_from_slice(&payload[..end]);
        let _ = self.socket.send_to(&datagram, client);
    }

    /// Send an already wire-framed datagram to the registered client,
    /// if any. Used by the output trampoline, which frames its own
    /// messages via [`crate::trampoline::frame_message`].
    pub fn send_framed(&self, framed: &[u8]) {
        if let Some(client) = self.client_endpoint() {
            let _ = self.socket.send_to(framed, client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct NoOpSink;
    impl CommandSink for NoOpSink {
        fn dispatch(&self, _cmd: &[u8]) {}
    }

    struct RecordingSink {
        calls: StdMutex<Vec<(String, i32)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                calls: StdMutex::new(Vec::new()),
            }
        }
    }

    impl CommandSink for RecordingSink {
        fn dispatch(&self, cmd: &[u8]) {
            let s = String::from_utf8_lossy(cmd)
                .trim_end_matches('\0')
                .to_string();
            self.calls.lock().unwrap().push((s, 0));
        }
    }

    fn any_loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Round-trip login.
    #[test]
    fn round_trip_login_replies_loggedin() {
        let server = ServerState::bind_addr(any_loopback(), NoOpSink).unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind(any_loopback()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        client
            .send_to(&[WIRE_PREFIX, CLRC_BEGINCONNECTION], server_addr)
            .unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = server.socket.recv_from(&mut buf).unwrap();
        server.handle_datagram(from, &buf[..n]);

        let mut reply = [0u8; 16];
        let (rn, _) = client.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..rn], &[WIRE_PREFIX, SVRC_LOGGEDIN]);
        assert_eq!(server.client_endpoint(), Some(from));
        assert!(server.is_ready());
    }

    /// Idempotence of login.
    #[test]
    fn repeated_logins_from_same_endpoint_are_idempotent() {
        let server = ServerState::bind_addr(any_loopback(), NoOpSink).unwrap();
        let from: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        for _ in 0..10 {
            server.handle_datagram(from, &[WIRE_PREFIX, CLRC_BEGINCONNECTION]);
        }

        assert_eq!(server.client_endpoint(), Some(from));
        assert!(server.is_ready());
    }

    /// End-to-end command dispatch.
    #[test]
    fn dispatches_command_after_login() {
        let server = ServerState::bind_addr(any_loopback(), RecordingSink::new()).unwrap();
        let from: SocketAddr = "127.0.0.1:9998".parse().unwrap();

        server.handle_datagram(from, &[WIRE_PREFIX, CLRC_BEGINCONNECTION]);

        let mut datagram = vec![WIRE_PREFIX, CLRC_COMMAND];
        datagram.extend_from_slice(b"echo hi");
        server.handle_datagram(from, &datagram);

        let calls = server.sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("echo hi".to_string(), 0));
    }

    /// Ungreeted command is dropped.
    #[test]
    fn drops_command_before_login() {
        let server = ServerState::bind_addr(any_loopback(), RecordingSink::new()).unwrap();
        let from: SocketAddr = "127.0.0.1:9997".parse().unwrap();

        server.handle_datagram(from, &[WIRE_PREFIX, CLRC_COMMAND, b'x']);

        assert!(server.sink.calls.lock().unwrap().is_empty());
        assert!(!server.is_ready());
        assert_eq!(server.client_endpoint(), None);
    }

    /// Unknown opcode is a no-op.
    #[test]
    fn unknown_opcode_changes_nothing_and_does_not_reply() {
        let server = ServerState::bind_addr(any_loopback(), NoOpSink).unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind(any_loopback()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        let from: SocketAddr = "127.0.0.1:9996".parse().unwrap();
        server.handle_datagram(from, &[WIRE_PREFIX, 0x99]);

        assert_eq!(server.client_endpoint(), None);
        assert!(!server.is_ready());

        client.send_to(&[0], server_addr).unwrap();
        let mut buf = [0u8; 4];
        // Draining our own probe packet; the unknown-opcode handling
        // itself must never have sent anything to `from` (a different,
        // unbound address, so there's nothing to race against here).
        let _ = server.socket.recv_from(&mut buf);
    }

    /// Payloads at/over the 4094-byte command limit.
    #[test]
    fn command_payload_truncates_at_max_length() {
        let server = ServerState::bind_addr(any_loopback(), RecordingSink::new()).unwrap();
        let from: SocketAddr = "127.0.0.1:9995".parse().unwrap();
        server.handle_datagram(from, &[WIRE_PREFIX, CLRC_BEGINCONNECTION]);

        let mut datagram = vec![WIRE_PREFIX, CLRC_COMMAND];
        datagram.extend(std::iter::repeat(b'a').take(5000));
        server.handle_datagram(from, &datagram);

        let calls = server.sink.calls.lock().unwrap();
        assert_eq!(calls[0].0.len(), MAX_COMMAND_PAYLOAD);
    }

    /// Malformed/too-short datagrams are dropped.
    #[test]
    fn datagram_without_prefix_byte_is_dropped() {
        let server = ServerState::bind_addr(any_loopback(), NoOpSink).unwrap();
        let from: SocketAddr = "127.0.0.1:9994".parse().unwrap();
        server.handle_datagram(from, &[0x01, CLRC_BEGINCONNECTION]);
        server.handle_datagram(from, &[WIRE_PREFIX]);
        assert_eq!(server.client_endpoint(), None);
    }
}
