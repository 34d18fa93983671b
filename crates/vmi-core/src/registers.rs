/// General-purpose and control registers exposed by the debug plane.
///
/// Only the registers this engine actually touches are enumerated; the
/// debug plane ABI itself carries the full x86-64 register file, but the
/// guest-OS model and execution controller only ever need these.
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Rip,
    Rsp,
    Cr3,
    Cs,
    Dr0,
    Dr1,
    Dr2,
    Dr3,
    Dr6,
    Dr7,
}

/// Model-specific registers exposed by the debug plane.
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Msr {
    GsBase,
    KernelGsBase,
}

/// Low two bits of the `CS` selector: the current privilege ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ring(pub u8);

impl Ring {
    /// Kernel mode.
    pub const KERNEL: Ring = Ring(0);
    /// User mode.
    pub const USER: Ring = Ring(3);

    /// Extracts the ring from a raw `CS` selector value.
    pub fn from_cs(cs: u64) -> Self {
        Self((cs & 0b11) as u8)
    }

    /// Returns `true` if this is user mode (ring 3).
    pub fn is_user(self) -> bool {
        self.0 == 3
    }
}
