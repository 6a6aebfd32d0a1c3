//! Component C — signature scanners.
//!
//! Eight scan kernels, C.1 through C.8 (including the two named variants
//! of C.6). Each takes the bytes of one region (as yielded by
//! [`crate::memmap`]) plus its base address and a query, and returns
//! `Some(absolute_address)` or `None`. Kept as pure functions over
//! `&[u8]` so they can be driven against synthetic "host image" buffers
//! without a real process mapping.

use crate::bytepattern::{find, read_i32_le, read_u32_le, read_u8};

/// C.1 — first occurrence of a string literal. Returns the absolute
/// address of the match; the exact length of `needle` is the match
/// key (no trailing NUL).
pub fn scan_string(region: &[u8], region_base: usize, needle: &[u8]) -> Option<usize> {
    find(region, needle).map(|off| region_base + off)
}

/// C.2 — 64-bit RIP-relative code reference. `windows` selects the LEA
/// register (`LEA RCX` on Windows vs `LEA RDI` elsewhere).
pub fn scan_code_ref_64(
    region: &[u8],
    region_base: usize,
    target: usize,
    windows: bool,
) -> Option<usize> {
    let prefix: [u8; 3] = if windows {
        [0x48, 0x8D, 0x0D]
    } else {
        [0x48, 0x8D, 0x3D]
    };

    let mut cursor = 0usize;
    while let Some(rel) = find(&region[cursor..], &prefix) {
        let pos = cursor + rel;
        let disp_off = pos + 3;
        if let Some(disp) = read_i32_le(region, disp_off) {
            let rip_after = region_base + disp_off + 4;
            let candidate = (rip_after as i64 + disp as i64) as usize;
            if candidate == target {
                let search_start = disp_off + 4;
                if let Some(call_target) =
                    find_call_target(region, region_base, search_start, windows)
                {
                    return Some(call_target);
                }
            }
        }
        cursor = pos + 1;
    }
    None
}

/// Find the first `E8` CALL within 64 bytes of `search_start`, compute
/// its target, and accept it only if the bytes preceding it mark a
/// function boundary (three `0xCC` pads on Windows, a single `0x00`
/// pad elsewhere, or an explicit `push rbp; mov rbp, rsp` prologue).
fn find_call_target(
    region: &[u8],
    region_base: usize,
    search_start: usize,
    windows: bool,
) -> Option<usize> {
    let search_end = (search_start + 64).min(region.len());
    if search_start >= search_end {
        return None;
    }
    let e8_rel = find(&region[search_start..search_end], &[0xE8])?;
    let e8_pos = search_start + e8_rel;
    let call_disp = read_i32_le(region, e8_pos + 1)?;
    let call_target = ((region_base + e8_pos + 5) as i64 + call_disp as i64) as usize;

    if accept_call_target(region, region_base, call_target, windows) {
        Some(call_target)
    } else {
        None
    }
}

fn accept_call_target(region: &[u8], region_base: usize, call_target: usize, windows: bool) -> bool {
    if call_target < region_base {
        return false;
    }
    let off = call_target - region_base;
    if let Some(slice) = region.get(off..off + 4) {
        if slice == [0x55, 0x48, 0x89, 0xE5] {
            return true;
        }
    }
    if windows {
        off >= 3 && region.get(off - 3..off) == Some(&[0xCC, 0xCC, 0xCC][..])
    } else {
        off >= 1 && region.get(off - 1) == Some(&0x00)
    }
}

/// C.3 — 32-bit push/call idiom: `68 <imm32> E8 <rel32>`.
pub fn scan_code_ref_32_push(region: &[u8], region_base: usize, target: usize) -> Option<usize> {
    scan_32_idiom(region, region_base, target, 0x68)
}

/// C.4 — 32-bit fastcall/MOV-ECX idiom: `B9 <imm32> E8 <rel32>`.
pub fn scan_code_ref_32_movecx(region: &[u8], region_base: usize, target: usize) -> Option<usize> {
    scan_32_idiom(region, region_base, target, 0xB9)
}

fn scan_32_idiom(region: &[u8], region_base: usize, target: usize, opcode: u8) -> Option<usize> {
    let target_bytes = (target as u32).to_le_bytes();
    let needle = [
        opcode,
        target_bytes[0],
        target_bytes[1],
        target_bytes[2],
        target_bytes[3],
    ];

    let mut cursor = 0usize;
    while let Some(rel) = find(&region[cursor..], &needle) {
        let pos = cursor + rel;
        if read_u8(region, pos + 5) == Some(0xE8) {
            if let Some(call_disp) = read_i32_le(region, pos + 6) {
                let call_target = ((region_base + pos + 10) as i64 + call_disp as i64) as usize;
                return Some(call_target);
            }
        }
        cursor = pos + 1;
    }
    None
}

/// C.5 — data-store scan: `C7 05 <imm32-addr> <imm32-value>` with
/// `imm32-value == target`. Returns the `imm32-addr` *field's value*
/// (the destination global's address), not a position in the region.
pub fn scan_data_store(region: &[u8], target: usize) -> Option<usize> {
    let needle = [0xC7, 0x05];
    let mut cursor = 0usize;
    while let Some(rel) = find(&region[cursor..], &needle) {
        let pos = cursor + rel;
        if let (Some(addr_field), Some(value_field)) =
            (read_u32_le(region, pos + 2), read_u32_le(region, pos + 6))
        {
            if value_field as usize == target {
                return Some(addr_field as usize);
            }
        }
        cursor = pos + 1;
    }
    None
}

fn find_a1_match(region: &[u8], region_base: usize, target: usize) -> Option<usize> {
    let target_bytes = (target as u32).to_le_bytes();
    let needle = [
        0xA1,
        target_bytes[0],
        target_bytes[1],
        target_bytes[2],
        target_bytes[3],
    ];
    find(region, &needle).map(|off| region_base + off)
}

/// C.6, `load-func` variant — `A1 <imm32-addr>` with `imm32-addr ==
/// target`; round the match's address down to a 16-byte boundary, then
/// walk backward in 16-byte steps (up to 16 times) for a function
/// prologue, returning the function's start address.
pub fn scan_data_load_func(region: &[u8], region_base: usize, target: usize) -> Option<usize> {
    let match_addr = find_a1_match(region, region_base, target)?;
    let mut addr = match_addr & !0xF;

    for _ in 0..16 {
        let off = addr.checked_sub(region_base)?;
        if off >= region.len() {
            return None;
        }
        if region[off] == 0x55 {
            return Some(addr);
        }
        let prev = off.checked_sub(1).and_then(|p| region.get(p));
        if prev == Some(&0x90) || prev == Some(&0xC3) {
            return Some(addr);
        }
        addr = addr.checked_sub(16)?;
    }
    None
}

/// C.6, `load` variant — same backward walk, but the result is the
/// location of the matched instruction itself.
pub fn scan_data_load(region: &[u8], region_base: usize, target: usize) -> Option<usize> {
    find_a1_match(region, region_base, target)
}

/// C.7 — load-argument scan. `function_base` must lie inside `region`;
/// searches forward for `C7 44 24 <disp8> <imm32>` writing
/// `literal_value` to the argument slot at `[ESP + argument_index * 4]`,
/// then finds the following CALL (as in C.2/C.3) and accepts it only if
/// the call target is 16-byte aligned.
pub fn scan_load_argument(
    region: &[u8],
    region_base: usize,
    function_base: usize,
    argument_index: i64,
    literal_value: u32,
) -> Option<usize> {
    let start_off = function_base.checked_sub(region_base)?;
    if start_off >= region.len() {
        return None;
    }

    let disp8 = (argument_index * 4) as u8;
    let lit = literal_value.to_le_bytes();
    let needle = [0xC7, 0x44, 0x24, disp8, lit[0], lit[1], lit[2], lit[3]];

    let rel = find(&region[start_off..], &needle)?;
    let pos = start_off + rel;
    let search_start = pos + needle.len();
    let search_end = (search_start + 64).min(region.len());
    if search_start >= search_end {
        return None;
    }

    let e8_rel = find(&region[search_start..search_end], &[0xE8])?;
    let e8_pos = search_start + e8_rel;
    let call_disp = read_i32_le(region, e8_pos + 1)?;
    let call_target = ((region_base + e8_pos + 5) as i64 + call_disp as i64) as usize;

    if call_target % 16 == 0 {
        Some(call_target)
    } else {
        None
    }
}

/// C.8 — multiply-add idiom, starting the search at `start_addr`:
/// `89 44 24 04 | 69 05 <imm32-addr> <imm32-mul> | 05 <imm32-add> |
/// 89 04 24 | E8 <rel32>`. Returns the `imm32-addr` field — the
/// address of the indexed global the multiply scales.
pub fn scan_mul_add(region: &[u8], region_base: usize, start_addr: usize) -> Option<usize> {
    let start_off = start_addr.checked_sub(region_base)?;
    let prefix = [0x89u8, 0x44, 0x24, 0x04, 0x69, 0x05];
    let rel = find(region.get(start_off..)?, &prefix)?;
    let pos = start_off + rel;

    let addr_off = pos + prefix.len();
    let imm_addr = read_u32_le(region, addr_off)?;
    let mul_off = addr_off + 4;
    read_u32_le(region, mul_off)?;
    let add_opcode_off = mul_off + 4;
    if read_u8(region, add_opcode_off)? != 0x05 {
        return None;
    }
    let add_off = add_opcode_off + 1;
    read_u32_le(region, add_off)?;
    let store_off = add_off + 4;
    if region.get(store_off..store_off + 3)? != [0x89, 0x04, 0x24] {
        return None;
    }
    let e8_off = store_off + 3;
    if read_u8(region, e8_off)? != 0xE8 {
        return None;
    }

    Some(imm_addr as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an exec buffer whose `LEA`+`CALL` pair references `target`
    /// and whose call target is prologue-prefixed with `55 48 89 E5` —
    /// Minimal ZDoom resolve, x86-64 SysV.
    #[test]
    fn code_ref_64_finds_prologue_prefixed_call_target() {
        let region_base = 0x1000usize;
        let target = 0x9400usize; // pretend this is where the string lives

        let mut buf = vec![0x90u8; 0x100]; // NOP padding
        // LEA RDI, [RIP+disp32] at offset 0
        buf[0] = 0x48;
        buf[1] = 0x8D;
        buf[2] = 0x3D;
        let rip_after = region_base + 3 + 4;
        let disp = target as i64 - rip_after as i64;
        buf[3..7].copy_from_slice(&(disp as i32).to_le_bytes());

        // CALL at offset 10, targeting offset 0x50 within this same buffer.
        let call_pos = 10usize;
        buf[call_pos] = 0xE8;
        let call_target_off = 0x50usize;
        let call_target_abs = region_base + call_target_off;
        let rel32 = call_target_abs as i64 - (region_base + call_pos + 5) as i64;
        buf[call_pos + 1..call_pos + 5].copy_from_slice(&(rel32 as i32).to_le_bytes());

        // Prologue at the call target.
        buf[call_target_off..call_target_off + 4].copy_from_slice(&[0x55, 0x48, 0x89, 0xE5]);

        let found = scan_code_ref_64(&buf, region_base, target, false);
        assert_eq!(found, Some(call_target_abs));
    }

    #[test]
    fn code_ref_64_rejects_non_matching_lea() {
        let region_base = 0x1000usize;
        let mut buf = vec![0x90u8; 64];
        buf[0] = 0x48;
        buf[1] = 0x8D;
        buf[2] = 0x3D;
        buf[3..7].copy_from_slice(&0i32.to_le_bytes()); // disp=0, points to rip_after itself

        assert_eq!(scan_code_ref_64(&buf, region_base, 0xDEAD_BEEF, false), None);
    }

    #[test]
    fn code_ref_32_push_idiom_finds_stdcall_call_target() {
        let region_base = 0x2000usize;
        let target = 0xABCDusize;
        let mut buf = vec![0u8; 64];
        buf[0] = 0x68;
        buf[1..5].copy_from_slice(&(target as u32).to_le_bytes());
        buf[5] = 0xE8;
        let call_target_abs = region_base + 0x20;
        let rel32 = call_target_abs as i64 - (region_base + 10) as i64;
        buf[6..10].copy_from_slice(&(rel32 as i32).to_le_bytes());

        assert_eq!(
            scan_code_ref_32_push(&buf, region_base, target),
            Some(call_target_abs)
        );
    }

    #[test]
    fn code_ref_32_movecx_idiom_flags_fastcall_site() {
        let region_base = 0x2000usize;
        let target = 0x5678usize;
        let mut buf = vec![0u8; 64];
        buf[0] = 0xB9;
        buf[1..5].copy_from_slice(&(target as u32).to_le_bytes());
        buf[5] = 0xE8;
        let call_target_abs = region_base + 0x30;
        let rel32 = call_target_abs as i64 - (region_base + 10) as i64;
        buf[6..10].copy_from_slice(&(rel32 as i32).to_le_bytes());

        assert_eq!(scan_code_ref_32_push(&buf, region_base, target), None);
        assert_eq!(
            scan_code_ref_32_movecx(&buf, region_base, target),
            Some(call_target_abs)
        );
    }

    #[test]
    fn data_store_returns_destination_global_address() {
        let target = 0x600usize; // e.g. where "YOU GOT IT" lives
        let global_addr = 0x00AABBCCu32;
        let mut buf = vec![0u8; 32];
        buf[0] = 0xC7;
        buf[1] = 0x05;
        buf[2..6].copy_from_slice(&global_addr.to_le_bytes());
        buf[6..10].copy_from_slice(&(target as u32).to_le_bytes());

        assert_eq!(scan_data_store(&buf, target), Some(global_addr as usize));
    }

    #[test]
    fn data_load_func_walks_back_to_prologue() {
        let region_base = 0x3000usize;
        let target = 0x00AABBCCusize;
        let mut buf = vec![0x90u8; 0x60];

        // Function prologue at a 16-byte-aligned offset.
        let func_off = 0x20usize;
        buf[func_off] = 0x55;

        // A1 <target> a little further along, inside the same function.
        let load_off = 0x2Busize;
        buf[load_off] = 0xA1;
        buf[load_off + 1..load_off + 5].copy_from_slice(&(target as u32).to_le_bytes());

        let found = scan_data_load_func(&buf, region_base, target);
        assert_eq!(found, Some(region_base + func_off));

        let found_load = scan_data_load(&buf, region_base, target);
        assert_eq!(found_load, Some(region_base + load_off));
    }

    #[test]
    fn russian_doom_give_artifact_via_load_argument() {
        // The give_artifact_entry half of the Russian-Doom profile.
        let region_base = 0x4000usize;
        let mut buf = vec![0x90u8; 0x80];

        let func_off = 0x10usize;
        let function_base = region_base + func_off;
        buf[func_off] = 0x55; // prologue marker, unused by scan_load_argument itself

        // C7 44 24 08 00000000 at a known offset within the function.
        let pattern_off = func_off + 4;
        buf[pattern_off] = 0xC7;
        buf[pattern_off + 1] = 0x44;
        buf[pattern_off + 2] = 0x24;
        buf[pattern_off + 3] = 0x08; // argument_index 2 * word size 4
        buf[pattern_off + 4..pattern_off + 8].copy_from_slice(&0u32.to_le_bytes());

        let e8_pos = pattern_off + 8 + 3;
        buf[e8_pos] = 0xE8;
        let call_target_abs = region_base + 0x40; // 16-byte aligned
        let rel32 = call_target_abs as i64 - (region_base + e8_pos + 5) as i64;
        buf[e8_pos + 1..e8_pos + 5].copy_from_slice(&(rel32 as i32).to_le_bytes());

        let found = scan_load_argument(&buf, region_base, function_base, 2, 0);
        assert_eq!(found, Some(call_target_abs));
    }

    #[test]
    fn load_argument_rejects_misaligned_call_target() {
        let region_base = 0x4000usize;
        let mut buf = vec![0x90u8; 0x80];
        let function_base = region_base;
        buf[0] = 0xC7;
        buf[1] = 0x44;
        buf[2] = 0x24;
        buf[3] = 0x00;
        buf[4..8].copy_from_slice(&0u32.to_le_bytes());
        let e8_pos = 8;
        buf[e8_pos] = 0xE8;
        let call_target_abs = region_base + 0x11; // not 16-byte aligned
        let rel32 = call_target_abs as i64 - (region_base + e8_pos + 5) as i64;
        buf[e8_pos + 1..e8_pos + 5].copy_from_slice(&(rel32 as i32).to_le_bytes());

        assert_eq!(scan_load_argument(&buf, region_base, function_base, 0, 0), None);
    }

    #[test]
    fn mul_add_returns_indexed_global_address() {
        let region_base = 0x5000usize;
        let start_addr = region_base + 0x8;
        let mut buf = vec![0x90u8; 64];

        let off = 0x8usize;
        buf[off..off + 6].copy_from_slice(&[0x89, 0x44, 0x24, 0x04, 0x69, 0x05]);
        let addr_off = off + 6;
        let global = 0x00CAFEBAu32;
        buf[addr_off..addr_off + 4].copy_from_slice(&global.to_le_bytes());
        buf[addr_off + 4..addr_off + 8].copy_from_slice(&4u32.to_le_bytes()); // multiplier
        let add_op = addr_off + 8;
        buf[add_op] = 0x05;
        buf[add_op + 1..add_op + 5].copy_from_slice(&0u32.to_le_bytes());
        let store_off = add_op + 5;
        buf[store_off..store_off + 3].copy_from_slice(&[0x89, 0x04, 0x24]);
        buf[store_off + 3] = 0xE8;
        buf[store_off + 4..store_off + 8].copy_from_slice(&0i32.to_le_bytes());

        assert_eq!(
            scan_mul_add(&buf, region_base, start_addr),
            Some(global as usize)
        );
    }

    #[test]
    fn string_scan_does_not_match_across_region_boundary() {
        // Scanners operate strictly per-region.
        let region_a = b"toggle idmy";
        let region_b = b"pos rest of data";
        assert_eq!(scan_string(region_a, 0, b"toggle idmypos"), None);
        assert_eq!(scan_string(region_b, 0, b"toggle idmypos"), None);
    }
}
