//! Component B — byte-pattern utilities.
//!
//! A `memmem`-equivalent linear substring search plus little-endian
//! integer splice helpers used by the signature scanners and the
//! trampoline's relative-displacement math. Grounded in
//! `examples/original_source/c/injector-windows.c`'s hand-rolled
//! `memmem` (the Windows C runtime this was built against didn't
//! expose one): a plain byte-by-byte linear scan, no alignment
//! assumptions, tolerant of NUL bytes in both haystack and needle.

/// First occurrence of `needle` in `haystack`, or `None` if absent or if
/// `needle` is longer than `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read a little-endian `u32` at `offset`, or `None` if it would run
/// past the end of `buf`.
#[inline]
pub fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Read a little-endian `i32` at `offset`, or `None` if it would run
/// past the end of `buf`.
#[inline]
pub fn read_i32_le(buf: &[u8], offset: usize) -> Option<i32> {
    read_u32_le(buf, offset).map(|v| v as i32)
}

/// Read a single byte at `offset`.
#[inline]
pub fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}
