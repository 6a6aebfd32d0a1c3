//! Component E — output-interception trampoline.
//!
//! Intrinsically x86-32 machine code; everything that assembles or
//! installs the stub is gated to `cfg(all(windows, target_arch =
//! "x86"))` behind [`can_intercept_output`], the capability predicate.
//! The call-site scan and the captured-output formatter are kept
//! target-independent and pure so they stay testable everywhere else.

use crate::bytepattern::read_u8;
use crate::config::{SVRC_MESSAGE, WIRE_PREFIX};

/// True only on the one target this module's machine code targets.
pub const fn can_intercept_output() -> bool {
    cfg!(all(windows, target_arch = "x86"))
}

/// Pure scan: starting at `printf_hook_site`, walk
/// forward looking for a `B9` (MOV ECX, imm32) opcode whose preceding
/// byte's high nibble is `0x5` (a PUSH of some register) — the
/// argument-preparation idiom that precedes the CALL we want to divert.
/// Gives up at the first `0xCC` padding byte. Returns the offset of the
/// `B9` opcode.
pub fn find_intercept_call_site(
    region: &[u8],
    region_base: usize,
    printf_hook_site: usize,
) -> Option<usize> {
    let start = printf_hook_site.checked_sub(region_base)?;
    let mut pos = start;
    while pos < region.len() {
        if read_u8(region, pos) == Some(0xCC) {
            return None;
        }
        if pos > start && read_u8(region, pos) == Some(0xB9) {
            if let Some(prev) = read_u8(region, pos - 1) {
                if prev & 0xF0 == 0x50 {
                    return Some(region_base + pos);
                }
            }
        }
        pos += 1;
    }
    None
}

/// One recovered varargs argument, already classified by conversion
/// specifier. Kept separate from raw memory access so the formatter
/// itself stays pure and testable.
#[derive(Debug, Clone, Copy)]
pub enum HostArg<'a> {
    Str(&'a [u8]),
    Int(i32),
    UInt(u32),
    Char(u8),
}

/// Expand `fmt` (a printf-style format string, no trailing NUL) against
/// `args`, supporting the conversions this capture path needs to
/// handle (`%s %d %i %x %c %%`); unrecognised specifiers are copied
/// through literally. Truncates at [`crate::config::MAX_MESSAGE_PAYLOAD`].
pub fn format_host_message(fmt: &[u8], args: &[HostArg<'_>]) -> Vec<u8> {
    use crate::config::MAX_MESSAGE_PAYLOAD;

    let mut out = Vec::new();
    let mut arg_index = 0usize;
    let mut i = 0usize;
    while i < fmt.len() && out.len() < MAX_MESSAGE_PAYLOAD {
        let b = fmt[i];
        if b == b'%' && i + 1 < fmt.len() {
            i += 1;
            match fmt[i] {
                b's' => {
                    if let Some(HostArg::Str(s)) = args.get(arg_index) {
                        let end = s.len().min(MAX_MESSAGE_PAYLOAD - out.len());
                        out.extend_from_slice(&s[..end]);
                    }
                    arg_index += 1;
                }
                b'd' | b'i' => {
                    if let Some(HostArg::Int(v)) = args.get(arg_index) {
                        out.extend_from_slice(v.to_string().as_bytes());
                    }
                    arg_index += 1;
                }
                b'x' => {
                    if let Some(HostArg::UInt(v)) = args.get(arg_index) {
                        out.extend_from_slice(format!("{v:x}").as_bytes());
                    }
                    arg_index += 1;
                }
                b'c' => {
                    if let Some(HostArg::Char(v)) = args.get(arg_index) {
                        out.push(*v);
                    }
                    arg_index += 1;
                }
                b'%' => out.push(b'%'),
                other => {
                    out.push(b'%');
                    out.push(other);
                }
            }
        } else {
            out.push(b);
        }
        i += 1;
    }
    out
}

/// Prefix a captured message with the `SVRC_MESSAGE` wire header.
pub fn frame_message(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(2 + payload.len());
    framed.push(WIRE_PREFIX);
    framed.push(SVRC_MESSAGE);
    framed.extend_from_slice(payload);
    framed
}

#[cfg(all(windows, target_arch = "x86"))]
pub mod live {
    //! The actual self-modifying half: stub assembly, `VirtualAlloc`,
    //! and the raw `E8 rel32` call-site overwrite.

    use super::{format_host_message, frame_message, HostArg};
    use crate::errors::PatchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use winapi::ctypes::c_void;
    use winapi::shared::minwindef::{DWORD, LPVOID};
    use winapi::um::memoryapi::{VirtualAlloc, VirtualProtect};
    use winapi::um::processthreadsapi::CreateThread;
    use winapi::um::synchapi::WaitForSingleObject;
    use winapi::um::winbase::INFINITE;
    use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE};

    const STUB_SIZE: usize = 54;

    /// Where captured output goes once formatted; set once at install
    /// time, read from the transient capture thread.
    static CAPTURE_SINK: AtomicUsize = AtomicUsize::new(0);

    type CaptureSink = dyn Fn(&[u8]) + Send + Sync;

    pub struct InstalledTrampoline {
        pub call_site: usize,
        original_bytes: [u8; 5],
    }

    fn push_imm32(buf: &mut Vec<u8>, value: u32) {
        buf.push(0x68);
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn mov_eax_call(buf: &mut Vec<u8>, target: usize) {
        buf.push(0xB8);
        buf.extend_from_slice(&(target as u32).to_le_bytes());
        buf.extend_from_slice(&[0xFF, 0xD0]); // CALL EAX
    }

    /// Assemble the 54-byte stub.
    fn assemble_stub(original_bytes: &[u8; 5]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STUB_SIZE);
        buf.push(0x60); // PUSHA

        push_imm32(&mut buf, 0); // lpThreadId = NULL
        push_imm32(&mut buf, 0); // dwCreationFlags = 0
        buf.push(0x54); // PUSH ESP (lpParameter: saved register frame)
        push_imm32(&mut buf, capture_thread_proc as usize as u32); // lpStartAddress
        push_imm32(&mut buf, 0); // dwStackSize = 0 (default)
        push_imm32(&mut buf, 0); // lpThreadAttributes = NULL
        mov_eax_call(&mut buf, CreateThread as usize);

        push_imm32(&mut buf, INFINITE); // dwMilliseconds
        buf.push(0x50); // PUSH EAX (the handle CreateThread returned)
        mov_eax_call(&mut buf, WaitForSingleObject as usize);

        buf.push(0x61); // POPA
        buf.extend_from_slice(original_bytes);
        buf.push(0xC3); // RET

        debug_assert_eq!(buf.len(), STUB_SIZE);
        buf
    }

    /// Read a NUL-terminated format string and its stack-slot varargs
    /// out of the PUSHA-saved frame, then hand off to the pure
    /// formatter. The offsets are empirically tuned and not invariant
    /// across host binaries.
    unsafe fn capture_and_format(saved_frame: *const u32) -> Vec<u8> {
        let fmt_ptr = *saved_frame.add(13) as *const u8;
        let args_base = saved_frame.add(14) as *const u32;

        if fmt_ptr.is_null() {
            return Vec::new();
        }

        let mut fmt_len = 0usize;
        while *fmt_ptr.add(fmt_len) != 0 && fmt_len < 4096 {
            fmt_len += 1;
        }
        let fmt = std::slice::from_raw_parts(fmt_ptr, fmt_len);

        let mut args = Vec::new();
        let mut arg_slot = 0isize;
        let mut i = 0usize;
        while i < fmt.len() {
            if fmt[i] == b'%' && i + 1 < fmt.len() {
                i += 1;
                let slot = *args_base.offset(arg_slot);
                match fmt[i] {
                    b's' => {
                        let s_ptr = slot as *const u8;
                        let mut len = 0usize;
                        if !s_ptr.is_null() {
                            while *s_ptr.add(len) != 0 && len < 4096 {
                                len += 1;
                            }
                            args.push(HostArg::Str(std::slice::from_raw_parts(s_ptr, len)));
                        } else {
                            args.push(HostArg::Str(&[]));
                        }
                        arg_slot += 1;
                    }
                    b'd' | b'i' => {
                        args.push(HostArg::Int(slot as i32));
                        arg_slot += 1;
                    }
                    b'x' => {
                        args.push(HostArg::UInt(slot));
                        arg_slot += 1;
                    }
                    b'c' => {
                        args.push(HostArg::Char(slot as u8));
                        arg_slot += 1;
                    }
                    b'%' => {}
                    _ => {}
                }
            }
            i += 1;
        }

        format_host_message(fmt, &args)
    }

    unsafe extern "system" fn capture_thread_proc(lp_param: LPVOID) -> DWORD {
        let saved_frame = lp_param as *const u32;
        let message = capture_and_format(saved_frame);
        let framed = frame_message(&message);

        let ptr = CAPTURE_SINK.load(Ordering::Acquire);
        if ptr != 0 {
            let sink = &*(ptr as *const Box<CaptureSink>);
            sink(&framed);
        }
        0
    }

    /// Register where formatted, framed captures should be sent. Leaks
    /// the boxed closure deliberately: it must outlive every future
    /// invocation of the patched call site, which is the remaining
    /// lifetime of the process, which is read-only after publication.
    pub fn register_capture_sink(sink: Box<CaptureSink>) {
        let ptr = Box::into_raw(Box::new(sink));
        CAPTURE_SINK.store(ptr as usize, Ordering::Release);
    }

    /// # Safety
    /// `call_site` must be the address of a live `E8 rel32` instruction
    /// inside the host image, with at least 5 bytes of valid, currently
    /// mapped executable memory.
    pub unsafe fn install(call_site: usize) -> Result<InstalledTrampoline, PatchError> {
        let original = std::slice::from_raw_parts(call_site as *const u8, 5);
        let mut original_bytes = [0u8; 5];
        original_bytes.copy_from_slice(original);

        let stub_mem = VirtualAlloc(
            std::ptr::null_mut(),
            STUB_SIZE,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        ) as *mut u8;
        if stub_mem.is_null() {
            return Err(PatchError::AllocFailed);
        }

        let stub = assemble_stub(&original_bytes);
        std::ptr::copy_nonoverlapping(stub.as_ptr(), stub_mem, stub.len());

        let mut old_protect: DWORD = 0;
        let ok = VirtualProtect(
            call_site as *mut c_void,
            5,
            PAGE_EXECUTE_READWRITE,
            &mut old_protect,
        );
        if ok == 0 {
            return Err(PatchError::ProtectFailed);
        }

        let rel32 = (stub_mem as i64 - (call_site as i64 + 5)) as i32;
        let patch = call_site as *mut u8;
        *patch = 0xE8;
        std::ptr::copy_nonoverlapping(rel32.to_le_bytes().as_ptr(), patch.add(1), 4);

        let mut restored: DWORD = 0;
        VirtualProtect(call_site as *mut c_void, 5, old_protect, &mut restored);

        Ok(InstalledTrampoline {
            call_site,
            original_bytes,
        })
    }
}
