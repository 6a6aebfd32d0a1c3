//! ABI tag for the resolved console-command entry, and the per-ABI
//! trampolines needed to call a function pointer whose calling
//! convention is only known at runtime. Calling such a pointer requires
//! either an ABI-specific trampoline compiled for each case, or an FFI
//! facility that exposes the calling convention explicitly; this module
//! takes the former approach.
//!
//! Restricted to 32/64-bit little-endian x86; the `extern` ABI strings
//! used here (`sysv64`, `win64`, `cdecl`, `stdcall`, `fastcall`) are only
//! meaningful on that family of targets.

/// Calling convention of the resolved `console_command_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAbi {
    /// x86-64 SysV (non-Windows 64-bit hosts).
    SysV64,
    /// x86-64 Windows calling convention.
    Win64,
    /// x86-32 cdecl (caller pops the stack).
    Cdecl,
    /// x86-32 stdcall (callee pops the stack) — Windows only.
    Stdcall,
    /// x86-32 fastcall, first argument in ECX — Windows only.
    Fastcall,
}

type FnSysV64 = unsafe extern "sysv64" fn(*const u8, i32);
type FnWin64 = unsafe extern "win64" fn(*const u8, i32);
type FnCdecl = unsafe extern "cdecl" fn(*const u8, i32);
type FnStdcall = unsafe extern "stdcall" fn(*const u8, i32);
type FnFastcall = unsafe extern "fastcall" fn(*const u8, i32);

/// Call the resolved console-command entry with its recorded ABI.
/// `cmd` must be a valid, NUL-terminated ASCII command pointer for the
/// duration of the call; the target signature is
/// `(pointer-to-ASCII-bytes, integer) -> void`.
///
/// # Safety
/// `entry` must be the address of a host function matching the
/// documented signature under `abi`'s calling convention.
pub unsafe fn call_console_command(abi: ConsoleAbi, entry: usize, cmd: *const u8, flags: i32) {
    match abi {
        ConsoleAbi::SysV64 => {
            let f: FnSysV64 = std::mem::transmute(entry);
            f(cmd, flags);
        }
        ConsoleAbi::Win64 => {
            let f: FnWin64 = std::mem::transmute(entry);
            f(cmd, flags);
        }
        ConsoleAbi::Cdecl => {
            let f: FnCdecl = std::mem::transmute(entry);
            f(cmd, flags);
        }
        ConsoleAbi::Stdcall => {
            let f: FnStdcall = std::mem::transmute(entry);
            f(cmd, flags);
        }
        ConsoleAbi::Fastcall => {
            let f: FnFastcall = std::mem::transmute(entry);
            f(cmd, flags);
        }
    }
}

/// The ABI a console-command entry resolves to for the current target,
/// when discovered via the plain push/call idiom (C.3) rather than the
/// fastcall/MOV-ECX idiom (C.4).
pub const fn native_call_abi(is_64_bit: bool, is_windows: bool) -> ConsoleAbi {
    match (is_64_bit, is_windows) {
        (true, true) => ConsoleAbi::Win64,
        (true, false) => ConsoleAbi::SysV64,
        (false, true) => ConsoleAbi::Stdcall,
        (false, false) => ConsoleAbi::Cdecl,
    }
}
