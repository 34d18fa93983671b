//! Process "32-bit-ness" derived from thread-info flags.

use crate::version::KernelVersion;

const TIF_IA32: u32 = 1 << 17;
const TIF_ADDR32: u32 = 1 << 29;
const TIF_X32: u32 = 1 << 30;

/// Whether a process is running in 32-bit compatibility mode, derived
/// from its thread-info flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcFlags {
    /// No 32-bit compatibility bits are set.
    None,
    /// The process is running in 32-bit compatibility mode.
    ThirtyTwoBit,
}

/// Classifies raw thread-info `flags` for the running kernel `version`.
/// Bit positions are fixed for x86-64; no other-architecture branching.
pub fn classify(flags: u32, version: &KernelVersion) -> ProcFlags {
    let mut mask = TIF_IA32;
    if version.at_least(3, 4) {
        mask |= TIF_ADDR32 | TIF_X32;
    }

    if flags & mask != 0 {
        ProcFlags::ThirtyTwoBit
    }
    else {
        ProcFlags::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_relevant_bits_is_none() {
        let v = KernelVersion::parse("5.15.0").unwrap();
        assert_eq!(classify(0, &v), ProcFlags::None);
    }

    #[test]
    fn tif_ia32_is_32bit_on_any_version() {
        let v = KernelVersion::parse("3.0.0").unwrap();
        assert_eq!(classify(TIF_IA32, &v), ProcFlags::ThirtyTwoBit);
    }

    #[test]
    fn tif_addr32_only_counts_from_3_4() {
        let old = KernelVersion::parse("3.3.0").unwrap();
        let new = KernelVersion::parse("3.4.0").unwrap();

        assert_eq!(classify(TIF_ADDR32, &old), ProcFlags::None);
        assert_eq!(classify(TIF_ADDR32, &new), ProcFlags::ThirtyTwoBit);
    }
}
