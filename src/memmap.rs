//! Component A — memory-map enumerator.
//!
//! Walks the current process's own mappings, filtered by protection
//! class, and yields them to a callback. The first non-null callback
//! result aborts iteration and propagates out as the scan result — the
//! same shape as `injector-linux.c`/`injector-windows.c`'s `scan()`
//! helpers and `find_gengfuncs_in_client`/`scan_with_pattern`
//! (`entities.rs`).

/// The two protection classes the resolver ever needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ExecRead,
}

/// An ephemeral record describing one mapped region. Never stored past
/// a single scan call.
#[derive(Debug, Clone, Copy)]
pub struct MapRegion {
    pub base: usize,
    pub size: usize,
    pub protection: Protection,
}

/// Enumerate the process's own mappings matching `class`, calling `f`
/// on each. The first `Some` returned by `f` stops iteration and is
/// returned; otherwise returns `None` once all regions are exhausted.
pub fn scan_regions<T>(class: Protection, f: impl FnMut(MapRegion) -> Option<T>) -> Option<T> {
    imp::scan_regions(class, f)
}

#[cfg(unix)]
mod imp {
    use super::{MapRegion, Protection};
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    /// Parse one `/proc/self/maps` line into `(base, size, perm_word)`.
    /// Fields, in order: address range, permission word, offset, dev,
    /// inode, pathname (pathname is ignored here).
    fn parse_line(line: &str) -> Option<(usize, usize, &str, &str)> {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let perm = fields.next()?;
        let _offset = fields.next()?;
        let dev = fields.next()?;
        let (start_s, end_s) = range.split_once('-')?;
        let start = usize::from_str_radix(start_s, 16).ok()?;
        let end = usize::from_str_radix(end_s, 16).ok()?;
        Some((start, end - start, perm, dev))
    }

    fn perm_matches(perm: &str, class: Protection) -> bool {
        match class {
            Protection::ReadOnly => perm.starts_with("r--p"),
            Protection::ExecRead => perm.starts_with("r-xp"),
        }
    }

    pub fn scan_regions<T>(
        class: Protection,
        mut f: impl FnMut(MapRegion) -> Option<T>,
    ) -> Option<T> {
        let file = File::open("/proc/self/maps").ok()?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let Ok(line) = line else { break };
            let Some((base, size, perm, dev)) = parse_line(&line) else {
                break;
            };

            // Deliberately preserved from injector-linux.c: the scan
            // terminates entirely (not just skips) on the first
            // anonymous mapping, rather than continuing past it.
            if dev == "00:00" {
                break;
            }

            if !perm_matches(perm, class) {
                continue;
            }

            let region = MapRegion {
                base,
                size,
                protection: class,
            };
            if let Some(result) = f(region) {
                return Some(result);
            }
        }
        None
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_a_typical_maps_line() {
            let line = "00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/hl_linux";
            let (base, size, perm, dev) = parse_line(line).unwrap();
            assert_eq!(base, 0x0040_0000);
            assert_eq!(size, 0x0005_2000);
            assert_eq!(perm, "r-xp");
            assert_eq!(dev, "08:02");
        }

        #[test]
        fn read_only_perm_matches_only_r_dash_dash_p() {
            assert!(perm_matches("r--p", Protection::ReadOnly));
            assert!(!perm_matches("r-xp", Protection::ReadOnly));
            assert!(!perm_matches("rw-p", Protection::ReadOnly));
        }

        #[test]
        fn exec_read_perm_matches_only_r_dash_x_p() {
            assert!(perm_matches("r-xp", Protection::ExecRead));
            assert!(!perm_matches("r--p", Protection::ExecRead));
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::{MapRegion, Protection};
    use winapi::shared::minwindef::LPCVOID;
    use winapi::um::libloaderapi::GetModuleHandleA;
    use winapi::um::memoryapi::VirtualQuery;
    use winapi::um::winnt::{
        MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE_READ, PAGE_READONLY,
    };

    fn class_flag(class: Protection) -> u32 {
        match class {
            Protection::ReadOnly => PAGE_READONLY,
            Protection::ExecRead => PAGE_EXECUTE_READ,
        }
    }

    pub fn scan_regions<T>(
        class: Protection,
        mut f: impl FnMut(MapRegion) -> Option<T>,
    ) -> Option<T> {
        unsafe {
            let current = GetModuleHandleA(std::ptr::null());
            let mut addr: usize = 0;
            let wanted = class_flag(class);

            loop {
                let mut mbi: MEMORY_BASIC_INFORMATION = std::mem::zeroed();
                let ret = VirtualQuery(
                    addr as LPCVOID,
                    &mut mbi,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                );
                if ret == 0 {
                    break;
                }

                let region_size = mbi.RegionSize;
                let next = (mbi.BaseAddress as usize).saturating_add(region_size);

                let belongs_to_host = mbi.AllocationBase as *mut _ == current as *mut _;
                if belongs_to_host && mbi.State == MEM_COMMIT && mbi.Protect == wanted {
                    let region = MapRegion {
                        base: mbi.BaseAddress as usize,
                        size: region_size,
                        protection: class,
                    };
                    if let Some(result) = f(region) {
                        return Some(result);
                    }
                }

                if next <= addr {
                    break;
                }
                addr = next;
            }
        }
        None
    }
}
