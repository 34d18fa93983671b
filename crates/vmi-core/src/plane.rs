//! Debug-plane client.
//!
//! A thin, typed wrapper over a hypervisor's debugging/fault-injection
//! back-channel: a named shared-memory region exposing pause/resume/step,
//! hardware breakpoints, register & MSR r/w, physical memory r/w, and
//! virtual-to-physical translation under a chosen page directory.
//!
//! The back-channel itself (the shared-memory ABI, its wire format, the
//! process that serves it) is explicitly out of scope for this crate: only the interface in [`DebugPlane`] matters. Production code talks
//! to a real back-channel through a driver implementing this trait; tests
//! use [`crate::mock::MockPlane`].

use crate::{Dtb, Msr, Pa, Register, Va};

/// Upper bound on the number of simultaneously installed hardware
/// breakpoints.
pub const MAX_BREAKPOINT: usize = 256;

/// A small integer identifying one breakpoint slot, `0..MAX_BREAKPOINT`.
pub type BreakpointId = usize;

/// The kind of access a hardware breakpoint traps on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointType {
    /// Traps on instruction fetch.
    Execute,
    /// Traps on data read.
    Read,
    /// Traps on data write.
    Write,
    /// Traps on either data read or write.
    ReadWrite,
}

/// The width, in bytes, of the memory region a data breakpoint watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLength {
    /// 1 byte.
    One = 1,
    /// 2 bytes.
    Two = 2,
    /// 4 bytes.
    Four = 4,
    /// 8 bytes.
    Eight = 8,
}

/// Whether a breakpoint address is a virtual or a physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// The address is a guest-virtual address, translated under the
    /// breakpoint's associated DTB.
    Virtual,
    /// The address is a guest-physical address.
    Physical,
}

/// The `CR3`-write filter applied to a hardware breakpoint.
///
/// `BP_CR3_ON_WRITINGS` is the mechanism [`crate::ExecutionController`] uses
/// to detect context switches during [`proc_join`](crate) without installing
/// a breakpoint on any particular address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cr3Filter {
    /// The breakpoint fires regardless of the active address space.
    #[default]
    None,
    /// The breakpoint fires on any write to `CR3` (a context switch).
    OnWritings,
}

/// The configuration of a single hardware breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointSpec {
    /// The access type to trap on.
    pub kind: BreakpointType,
    /// Whether `address` is virtual or physical.
    pub address_kind: AddressKind,
    /// The address to trap on.
    pub address: u64,
    /// The width of the watched region, for data breakpoints.
    pub length: AccessLength,
    /// The `CR3`-write filter.
    pub cr3_filter: Cr3Filter,
}

impl BreakpointSpec {
    /// Builds an execution breakpoint at a virtual address with no `CR3`
    /// filter, the common case for [`ExecutionController::run_to`].
    ///
    /// [`ExecutionController::run_to`]: crate::ExecutionController::run_to
    pub fn execute(address: Va) -> Self {
        Self {
            kind: BreakpointType::Execute,
            address_kind: AddressKind::Virtual,
            address: address.0,
            length: AccessLength::One,
            cr3_filter: Cr3Filter::None,
        }
    }

    /// Builds a breakpoint that fires only on a write to `CR3`, independent
    /// of any particular address (used to detect context switches).
    pub fn cr3_write_trap() -> Self {
        Self {
            kind: BreakpointType::Execute,
            address_kind: AddressKind::Virtual,
            address: 0,
            length: AccessLength::One,
            cr3_filter: Cr3Filter::OnWritings,
        }
    }
}

/// The run/pause state of the guest, as last reported by the plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaneState {
    /// The guest vCPU is running.
    Running,
    /// The guest vCPU is paused.
    #[default]
    Paused,
}

/// A thin, typed wrapper over the hypervisor debugging/fault-injection
/// back-channel.
///
/// Every operation either succeeds or fails with a boolean outcome; there
/// is no partial-read semantics. Implementations are expected
/// to be trivially mockable, since this is the seam at which tests replace
/// a live hypervisor with a scripted guest.
pub trait DebugPlane {
    /// Initializes the connection to the back-channel.
    fn init(&mut self) -> bool;

    /// Pauses the guest, clears every hardware breakpoint slot, and zeroes
    /// `DR0`-`DR3`, `DR6`, `DR7`. Idempotent: a second call is a no-op that
    /// still reports the clean state.
    fn reset(&mut self);

    /// Returns the current run/pause state, or `None` if the plane could
    /// not be queried.
    fn state(&self) -> Option<PlaneState>;

    /// Returns `true` if the state has changed since it was last observed.
    fn state_changed(&self) -> bool;

    /// Pauses the guest. Returns `false` on transport failure.
    fn pause(&mut self) -> bool;

    /// Resumes the guest. Returns `false` on transport failure.
    fn resume(&mut self) -> bool;

    /// Single-steps the guest by one instruction.
    fn step_once(&mut self) -> bool;

    /// Installs a hardware breakpoint in the given slot.
    fn set_breakpoint(&mut self, id: BreakpointId, spec: BreakpointSpec) -> bool;

    /// Removes the hardware breakpoint in the given slot.
    fn unset_breakpoint(&mut self, id: BreakpointId) -> bool;

    /// Reads `len` bytes of guest physical memory starting at `phy`.
    fn read_physical(&self, phy: Pa, len: usize) -> Option<Vec<u8>>;

    /// Writes `data` to guest physical memory starting at `phy`.
    fn write_physical(&mut self, phy: Pa, data: &[u8]) -> bool;

    /// Reads `len` bytes of guest virtual memory at `virt` under the page
    /// directory `dtb`.
    ///
    /// Implementations must temporarily install `dtb` as `CR3` iff the
    /// guest's current `CR3` differs, perform the read, then restore the
    /// original `CR3`.
    fn read_virtual(&self, dtb: Dtb, virt: Va, len: usize) -> Option<Vec<u8>>;

    /// Translates a guest virtual address to a guest physical address
    /// under the page directory `dtb`.
    fn virtual_to_physical(&self, dtb: Dtb, virt: Va) -> Option<Pa>;

    /// Injects an interrupt into the guest.
    fn inject_interrupt(&mut self, vector: u32, error: u32, cr2: u64) -> bool;

    /// Reads a general-purpose or control register.
    fn read_register(&self, reg: Register) -> Option<u64>;

    /// Writes a general-purpose or control register.
    fn write_register(&mut self, reg: Register, value: u64) -> bool;

    /// Reads a model-specific register.
    fn read_msr(&self, msr: Msr) -> Option<u64>;

    /// Writes a model-specific register.
    fn write_msr(&mut self, msr: Msr, value: u64) -> bool;
}
