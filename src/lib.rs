//! Bootstrap (component G). On library attach: resolve the host's
//! signatures (component D); on success, spawn the RCON server thread
//! (component F) and, where supported, arm the output trampoline
//! (component E). Mirrors the original `lib.rs`'s shape — a dedicated
//! worker thread started from `DllMain` — generalized to run the
//! resolver instead of an ESP hook, plus a POSIX constructor path
//! that a Windows-only DLL never needed.

#![allow(non_snake_case)]

pub mod abi;
pub mod bytepattern;
pub mod config;
pub mod diag;
pub mod errors;
pub mod memmap;
pub mod resolve;
pub mod scan;
pub mod server;
pub mod trampoline;

use resolve::ResolvedSymbols;
use server::{CommandSink, HostConsoleSink, ServerState};

/// Runs the resolver, and if it succeeds, the RCON server loop forever
/// on the calling thread. Spawned onto its own thread by both entry
/// points below; never returns on success.
fn run(resolved: ResolvedSymbols) {
    if !resolved.can_arm() {
        diag!("resolved symbols incomplete, server will not start");
        return;
    }

    let printf_hook_site = resolved.printf_hook_site;
    let echo_sink = HostConsoleSink::new(resolved.clone());
    let sink = HostConsoleSink::new(resolved);
    let server = match ServerState::bind(sink) {
        Ok(server) => server,
        Err(e) => {
            let mut cmd = errors::echo_error_line("bind", &e.to_string()).into_bytes();
            cmd.push(0);
            echo_sink.dispatch(&cmd);
            return;
        }
    };
    let server = std::sync::Arc::new(server);

    maybe_install_trampoline(printf_hook_site, &server);

    diag!("RCON server listening on {}", config::rcon_bind_addr());
    server.run();
}

#[cfg(all(windows, target_arch = "x86"))]
fn maybe_install_trampoline(
    printf_hook_site: Option<usize>,
    server: &std::sync::Arc<ServerState<HostConsoleSink>>,
) {
    use memmap::Protection;

    let Some(site) = printf_hook_site else {
        return;
    };
    if !trampoline::can_intercept_output() {
        return;
    }

    let call_site = memmap::scan_regions(Protection::ExecRead, |region| {
        if site >= region.base && site < region.base + region.size {
            let bytes =
                unsafe { std::slice::from_raw_parts(region.base as *const u8, region.size) };
            trampoline::find_intercept_call_site(bytes, region.base, site)
        } else {
            None
        }
    });

    let Some(call_site) = call_site else {
        diag!("trampoline call site not found");
        return;
    };

    let server_for_sink = std::sync::Arc::clone(server);
    trampoline::live::register_capture_sink(Box::new(move |framed: &[u8]| {
        server_for_sink.send_framed(framed);
    }));

    match unsafe { trampoline::live::install(call_site) } {
        Ok(_installed) => diag!("output trampoline installed at {call_site:#x}"),
        Err(e) => diag!("trampoline install failed: {e}"),
    }
}

#[cfg(not(all(windows, target_arch = "x86")))]
fn maybe_install_trampoline(
    _printf_hook_site: Option<usize>,
    _server: &std::sync::Arc<ServerState<HostConsoleSink>>,
) {
}

fn attach() {
    diag::ensure_console();
    diag!("attaching");

    std::env::remove_var(config::INJECTION_ENV_VAR);

    std::thread::spawn(|| {
        // SAFETY: called once, before any other component depends on
        // the result, as required by `resolve::resolve`.
        match unsafe { resolve::resolve() } {
            Ok(resolved) => run(resolved),
            Err(e) => diag!("resolver failed, bootstrap is a no-op: {e}"),
        }
    });
}

#[cfg(unix)]
#[ctor::ctor]
fn posix_attach() {
    attach();
}

#[cfg(windows)]
mod windows_entry {
    use super::attach;
    use winapi::shared::minwindef::{BOOL, DWORD, HINSTANCE, LPVOID, TRUE};
    use winapi::um::libloaderapi::DisableThreadLibraryCalls;
    use winapi::um::winnt::DLL_PROCESS_ATTACH;

    #[no_mangle]
    pub unsafe extern "system" fn DllMain(
        hinst: HINSTANCE,
        reason: DWORD,
        _reserved: LPVOID,
    ) -> BOOL {
        if reason == DLL_PROCESS_ATTACH {
            DisableThreadLibraryCalls(hinst);
            attach();
        }
        TRUE
    }
}
