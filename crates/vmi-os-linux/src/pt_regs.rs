//! `pt_regs` location on the kernel stack.
//!
//! `THREAD_SIZE_ORDER` and `TOP_OF_KERNEL_STACK_PADDING` are the only
//! version-dependent knobs in the whole engine; isolating them to a pure
//! function of `(version, has_kasan)` is what keeps future kernel-version
//! support from touching anything else.

use crate::version::KernelVersion;

/// The kernel-stack size is `PAGE_SIZE << thread_size_order(...)`.
pub fn thread_size_order(version: &KernelVersion, has_kasan: bool) -> u32 {
    if !version.at_least(3, 15) {
        1
    }
    else if !version.at_least(4, 0) {
        2
    }
    else {
        2 + u32::from(has_kasan)
    }
}

/// Trailing padding left unused at the top of the kernel stack.
pub fn top_of_kernel_stack_padding(version: &KernelVersion) -> u64 {
    if version.at_least(4, 0) {
        0
    }
    else {
        8
    }
}

/// Computes the address of the saved `pt_regs` on a thread's kernel
/// stack:
///
/// ```text
/// pt_regs_ptr = stack_base + (PAGE_SIZE << thread_size_order) - padding - pt_regs_size
/// ```
pub fn locate(
    version: &KernelVersion,
    has_kasan: bool,
    stack_base: u64,
    pt_regs_size: u64,
) -> u64 {
    const PAGE_SIZE: u64 = 4096;

    let thread_size = PAGE_SIZE << thread_size_order(version, has_kasan);
    let padding = top_of_kernel_stack_padding(version);

    stack_base + thread_size - padding - pt_regs_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_3_15_uses_order_one_and_padding() {
        let v = KernelVersion::parse("3.10.0").unwrap();
        assert_eq!(thread_size_order(&v, false), 1);
        assert_eq!(top_of_kernel_stack_padding(&v), 8);
    }

    #[test]
    fn between_3_15_and_4_0_uses_order_two_and_padding() {
        let v = KernelVersion::parse("3.16.0").unwrap();
        assert_eq!(thread_size_order(&v, false), 2);
        assert_eq!(top_of_kernel_stack_padding(&v), 8);
    }

    #[test]
    fn post_4_0_adds_kasan_order_and_drops_padding() {
        let v = KernelVersion::parse("5.15.0").unwrap();
        assert_eq!(thread_size_order(&v, false), 2);
        assert_eq!(thread_size_order(&v, true), 3);
        assert_eq!(top_of_kernel_stack_padding(&v), 0);
    }

    #[test]
    fn locate_computes_top_of_stack_minus_pt_regs() {
        let v = KernelVersion::parse("5.15.0").unwrap();
        let stack_base = 0xffff_8880_0000_0000u64;
        let pt_regs_size = 0x110;
        let addr = locate(&v, false, stack_base, pt_regs_size);
        assert_eq!(addr, stack_base + (4096 << 2) - pt_regs_size);
    }
}
