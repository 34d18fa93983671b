use serde::{Deserialize, Serialize};

use super::macros::impl_ops;

impl_ops!(Va, u64, "guest virtual address");
impl_ops!(Pa, u64, "guest physical address");
impl_ops!(Dtb, u64, "directory-table base (page-directory root)");

/// The boundary between user-space and kernel-space on x86-64: addresses
/// strictly above this value are kernel-space.
pub const KERNEL_SPACE_START: u64 = 0x8000_0000_0000_0000;

impl Va {
    /// Returns `true` if this address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if this address lies in the canonical kernel half of
    /// the address space (i.e. `addr > 0x7FFF_FFFF_FFFF_FFFF`).
    pub fn is_kernel_address(self) -> bool {
        self.0 > (KERNEL_SPACE_START - 1)
    }
}

impl Pa {
    /// Returns `true` if this address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Dtb {
    /// The kernel-thread sentinel: no user address space.
    pub const NONE: Dtb = Dtb(0);

    /// Returns `true` if this DTB denotes "no address space" (a kernel
    /// thread with no `mm_struct`).
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Masks off the low 13 bits of a raw `CR3` value, matching the
    /// meltdown-mitigation (KPTI) PCID/bit layout.
    pub fn from_cr3(cr3: u64) -> Self {
        Self(cr3 & !0x1fff)
    }
}

/// A guest process handle: `{id, dtb}`.
///
/// `id` is the guest-virtual address of a `task_struct` that is a
/// thread-group leader. `dtb` is the directory-table base of that process's
/// address space, or [`Dtb::NONE`] for a kernel thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Process {
    /// Address of the thread-group leader's `task_struct`.
    pub id: Va,
    /// Directory-table base of the process's address space.
    pub dtb: Dtb,
}

/// A guest thread handle: the guest-virtual address of a `task_struct`,
/// which may or may not be a thread-group leader.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thread {
    /// Address of the thread's `task_struct`.
    pub id: Va,
}

impl From<Va> for Thread {
    fn from(id: Va) -> Self {
        Self { id }
    }
}

impl From<Process> for Thread {
    fn from(proc: Process) -> Self {
        Self { id: proc.id }
    }
}

/// An opaque module handle.
///
/// Linux carries no loadable-kernel-module enumeration in this engine
/// (see [`crate`] crate docs); the type exists only so the API surface
/// matches other guest OSes that do resolve real modules.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

/// An opaque virtual-memory-area handle, for the same reason as
/// [`ModuleId`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmaId(pub u64);

/// An opaque driver handle, for the same reason as [`ModuleId`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverId(pub u64);

/// A `{base, size}` address range, used to report a module's, VMA's, or
/// driver's extent once real enumeration resolves one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// The first address in the range.
    pub base: Va,
    /// The range's length in bytes.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_space_boundary() {
        assert!(!Va(0x7fff_ffff_ffff_ffff).is_kernel_address());
        assert!(Va(0x8000_0000_0000_0000).is_kernel_address());
        assert!(Va(0xffff_ffff_ffff_ffff).is_kernel_address());
    }

    #[test]
    fn dtb_strips_low_bits() {
        let dtb = Dtb::from_cr3(0xdead_1fff);
        assert_eq!(dtb.0 & 0x1fff, 0);
    }
}
