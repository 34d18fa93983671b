//! Kernel banner scan.
//!
//! The banner is the kernel's constant `"Linux version ..."` string,
//! embedded once in the kernel image. Locating it is how setup
//! fingerprints the running kernel without any prior knowledge of where
//! the kernel was loaded (KASLR shifts it every boot).

use memchr::memmem;
use vmi_core::{DebugPlane, Dtb, Reader, Va};

/// Lower bound of the kernel-virtual range scanned for the banner.
pub const SCAN_START: u64 = 0xFFFF_FFFF_8000_0000;
/// Upper (exclusive) bound of the kernel-virtual range scanned for the
/// banner.
pub const SCAN_END: u64 = 0xFFFF_FFFF_FFF0_0000;

const PAGE_SIZE: u64 = 4096;
const NEEDLE: &[u8] = b"Linux version";
const MAX_BANNER_LEN: usize = 256;

/// Scans `[SCAN_START, SCAN_END)` in `PAGE_SIZE` steps for the literal
/// `"Linux version"`, reading each page with a trailing overlap of
/// `NEEDLE.len() - 1` bytes so a match straddling a page boundary is not
/// missed. Returns the address of the start of the match
/// for every candidate found, in ascending order.
pub fn scan_candidates(plane: &dyn DebugPlane, kdtb: Dtb) -> Vec<Va> {
    let mut candidates = Vec::new();
    let overlap = (NEEDLE.len() - 1) as u64;

    let mut addr = SCAN_START;
    while addr < SCAN_END {
        let len = (PAGE_SIZE + overlap) as usize;
        let Some(buf) = plane.read_virtual(kdtb, Va(addr), len) else {
            addr += PAGE_SIZE;
            continue;
        };

        for pos in memmem::find_iter(&buf, NEEDLE) {
            candidates.push(Va(addr + pos as u64));
        }

        addr += PAGE_SIZE;
    }

    candidates
}

/// Reads the NUL-terminated banner string starting at `candidate`,
/// stripping a trailing newline.
pub fn read_banner(plane: &dyn DebugPlane, reader: &Reader, candidate: Va) -> Option<String> {
    let s = reader.read_cstr(plane, candidate, 64, MAX_BANNER_LEN)?;
    Some(s.trim_end_matches('\n').to_string())
}
