//! Memory reader.
//!
//! Presents a uniform "read N bytes at guest-virtual address" view by
//! selecting the kernel or the user page directory per address and
//! delegating translation, page by page, to the debug plane.

use crate::{DebugPlane, Dtb, Va};

/// A dual-DTB memory reader.
///
/// Carries two directory-table bases: `kdtb`, set once at the end of
/// [`setup`](crate) and never mutated afterwards, and `udtb`, rebound per
/// process by the caller. [`Reader::read`] picks between them based on
/// whether the target address is a kernel- or user-space address, so
/// callers can "follow a pointer" without knowing in advance which half of
/// the address space it lands in — and a kernel thread (no `mm`, `udtb ==
/// 0`) can still read kernel addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reader {
    /// Directory-table base for kernel-space addresses.
    pub kdtb: Dtb,
    /// Directory-table base for user-space addresses, or [`Dtb::NONE`] for
    /// a kernel thread / before any process context has been established.
    pub udtb: Dtb,
}

impl Reader {
    /// Creates a reader with no DTBs bound yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn dtb_for(&self, virt: Va) -> Dtb {
        if virt.is_kernel_address() {
            self.kdtb
        }
        else {
            self.udtb
        }
    }

    /// Reads `len` bytes at `virt`, selecting `kdtb` or `udtb` depending on
    /// whether `virt` is a kernel address. Fails atomically: either all
    /// `len` bytes are returned, or `None`.
    pub fn read(&self, plane: &dyn DebugPlane, virt: Va, len: usize) -> Option<Vec<u8>> {
        let dtb = self.dtb_for(virt);
        if dtb.is_none() {
            return None;
        }

        plane.read_virtual(dtb, virt, len)
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes starting at
    /// `virt`, growing the read in `chunk` byte chunks so callers can
    /// amortize round-trips for long strings.
    pub fn read_cstr(
        &self,
        plane: &dyn DebugPlane,
        virt: Va,
        chunk: usize,
        max_len: usize,
    ) -> Option<String> {
        let mut result = Vec::new();
        let mut offset = 0u64;

        while result.len() < max_len {
            let buf = self.read(plane, virt + offset, chunk)?;
            match buf.iter().position(|&b| b == 0) {
                Some(nul) => {
                    result.extend_from_slice(&buf[..nul]);
                    return Some(String::from_utf8_lossy(&result).into_owned());
                }
                None => {
                    result.extend_from_slice(&buf);
                    offset += chunk as u64;
                }
            }
        }

        Some(String::from_utf8_lossy(&result[..max_len.min(result.len())]).into_owned())
    }

    /// Reads a single byte.
    pub fn read_u8(&self, plane: &dyn DebugPlane, virt: Va) -> Option<u8> {
        self.read(plane, virt, 1).map(|b| b[0])
    }

    /// Reads a little-endian 32-bit unsigned integer.
    pub fn read_le32(&self, plane: &dyn DebugPlane, virt: Va) -> Option<u32> {
        let buf = self.read(plane, virt, 4)?;
        Some(u32::from_le_bytes(buf.try_into().ok()?))
    }

    /// Reads a little-endian 64-bit unsigned integer.
    pub fn read_u64(&self, plane: &dyn DebugPlane, virt: Va) -> Option<u64> {
        let buf = self.read(plane, virt, 8)?;
        Some(u64::from_le_bytes(buf.try_into().ok()?))
    }

    /// Reads a guest-virtual pointer (alias of [`read_u64`](Self::read_u64)
    /// wrapped as [`Va`], since pointers are pervasive in kernel-structure
    /// parsing).
    pub fn read_va(&self, plane: &dyn DebugPlane, virt: Va) -> Option<Va> {
        self.read_u64(plane, virt).map(Va::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlane;

    #[test]
    fn read_fails_without_matching_dtb() {
        let plane = MockPlane::new();
        let reader = Reader::new();

        // No kdtb/udtb bound yet: both halves of the address space fail.
        assert!(reader.read(&plane, Va(0x1000), 8).is_none());
        assert!(reader
            .read(&plane, Va(0xffff_ffff_8000_0000), 8)
            .is_none());
    }

    #[test]
    fn read_selects_kernel_or_user_dtb() {
        let mut plane = MockPlane::new();
        plane.map_virtual(Dtb(1), Va(0x1000), &[1, 2, 3, 4]);
        plane.map_virtual(Dtb(2), Va(0xffff_ffff_8000_0000), &[5, 6, 7, 8]);

        let reader = Reader {
            kdtb: Dtb(2),
            udtb: Dtb(1),
        };

        assert_eq!(reader.read(&plane, Va(0x1000), 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(
            reader.read(&plane, Va(0xffff_ffff_8000_0000), 4).unwrap(),
            vec![5, 6, 7, 8]
        );
    }

    #[test]
    fn read_cstr_stops_at_nul_across_chunks() {
        let mut plane = MockPlane::new();
        let mut data = b"swapper".to_vec();
        data.push(0);
        data.extend_from_slice(b"trailing-garbage");
        plane.map_virtual(Dtb(1), Va(0x2000), &data);

        let reader = Reader {
            kdtb: Dtb(1),
            udtb: Dtb(1),
        };

        let s = reader.read_cstr(&plane, Va(0x2000), 4, 64).unwrap();
        assert_eq!(s, "swapper");
    }
}
