//! An in-memory [`DebugPlane`] test double.
//!
//! Backs the plane with plain `HashMap`s instead of a hypervisor
//! back-channel, so unit tests can script exactly the guest state a
//! scenario needs (a banner string at a fixed address, a `task_struct`
//! chain, a register file) without touching any real virtualization stack.
//! Every crate that builds on [`DebugPlane`] (`vmi-os-linux` in particular)
//! is expected to test against this rather than a live driver.

use std::collections::{HashMap, VecDeque};

use crate::{BreakpointId, BreakpointSpec, DebugPlane, Dtb, Msr, Pa, PlaneState, Register, Va};

/// The mutable guest state a [`MockPlane`] exposes to scripted resume steps.
///
/// Split out from [`MockPlane`] itself so a scripted closure can mutate the
/// guest state without also needing a handle to the pending script queue.
#[derive(Default)]
pub struct MockState {
    physical: HashMap<u64, u8>,
    virt: HashMap<(Dtb, u64), u8>,
    translations: HashMap<(Dtb, u64), Pa>,
    registers: HashMap<Register, u64>,
    msrs: HashMap<Msr, u64>,
    breakpoints: HashMap<BreakpointId, BreakpointSpec>,
    plane_state: PlaneState,
    state_changed: bool,
}

impl MockState {
    /// Writes a register directly, bypassing [`DebugPlane::write_register`].
    pub fn set_register(&mut self, reg: Register, value: u64) {
        self.registers.insert(reg, value);
    }

    /// Writes a MSR directly, bypassing [`DebugPlane::write_msr`].
    pub fn set_msr(&mut self, msr: Msr, value: u64) {
        self.msrs.insert(msr, value);
    }

    /// Writes bytes into the virtual-memory arena for `dtb` at `virt`.
    pub fn set_virtual(&mut self, dtb: Dtb, virt: Va, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.virt.insert((dtb, virt.0 + i as u64), b);
        }
    }

    /// Returns the set of breakpoint slots currently installed, for
    /// assertions that breakpoints were cleaned up on every exit path.
    pub fn active_breakpoints(&self) -> Vec<BreakpointId> {
        let mut ids: Vec<_> = self.breakpoints.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the spec installed in slot `id`, if any, for assertions
    /// that a breakpoint carries the expected kind/address/CR3 filter.
    pub fn breakpoint_spec(&self, id: BreakpointId) -> Option<BreakpointSpec> {
        self.breakpoints.get(&id).copied()
    }
}

/// An in-memory [`DebugPlane`].
///
/// `resume()` pops and runs one scripted step from an internal queue
/// (installed with [`MockPlane::on_resume`]) before reporting success; this
/// is how tests simulate "the guest ran until the next breakpoint" without
/// an actual CPU. A `resume()` call with an empty script just flips the
/// state to [`PlaneState::Running`] and reports success, as there is
/// nothing left to simulate.
#[derive(Default)]
pub struct MockPlane {
    /// The guest state backing this plane. Public so tests can seed or
    /// inspect it directly via [`MockState`]'s helper methods.
    pub state: MockState,
    resume_script: VecDeque<Box<dyn FnMut(&mut MockState)>>,
}

impl MockPlane {
    /// Creates an empty plane: no memory, no registers, paused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `bytes` into guest-virtual memory under `dtb` starting at
    /// `virt`.
    pub fn map_virtual(&mut self, dtb: Dtb, virt: Va, bytes: &[u8]) {
        self.state.set_virtual(dtb, virt, bytes);
    }

    /// Maps `bytes` into guest-physical memory starting at `phy`.
    pub fn map_physical(&mut self, phy: Pa, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.state.physical.insert(phy.0 + i as u64, b);
        }
    }

    /// Registers a virtual-to-physical translation for `(dtb, virt)`.
    pub fn map_translation(&mut self, dtb: Dtb, virt: Va, phy: Pa) {
        self.state.translations.insert((dtb, virt.0), phy);
    }

    /// Seeds a register's value directly.
    pub fn set_register(&mut self, reg: Register, value: u64) {
        self.state.set_register(reg, value);
    }

    /// Seeds a MSR's value directly.
    pub fn set_msr(&mut self, msr: Msr, value: u64) {
        self.state.set_msr(msr, value);
    }

    /// Appends a closure to the resume script: the next call to
    /// `resume()` will run it against the guest state (e.g. move
    /// `per_cpu`'s current-task pointer, bump `RIP`, write a new `CR3`)
    /// before reporting the guest paused again.
    pub fn on_resume(&mut self, step: impl FnMut(&mut MockState) + 'static) {
        self.resume_script.push_back(Box::new(step));
    }
}

impl DebugPlane for MockPlane {
    fn init(&mut self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.state.breakpoints.clear();
        for dr in [Register::Dr0, Register::Dr1, Register::Dr2, Register::Dr3] {
            self.state.registers.insert(dr, 0);
        }
        self.state.registers.insert(Register::Dr6, 0);
        self.state.registers.insert(Register::Dr7, 0);
        self.state.plane_state = PlaneState::Paused;
        self.state.state_changed = true;
    }

    fn state(&self) -> Option<PlaneState> {
        Some(self.state.plane_state)
    }

    fn state_changed(&self) -> bool {
        self.state.state_changed
    }

    fn pause(&mut self) -> bool {
        self.state.state_changed = self.state.plane_state != PlaneState::Paused;
        self.state.plane_state = PlaneState::Paused;
        true
    }

    fn resume(&mut self) -> bool {
        self.state.plane_state = PlaneState::Running;
        if let Some(mut step) = self.resume_script.pop_front() {
            step(&mut self.state);
        }
        self.state.plane_state = PlaneState::Paused;
        self.state.state_changed = true;
        true
    }

    fn step_once(&mut self) -> bool {
        self.resume()
    }

    fn set_breakpoint(&mut self, id: BreakpointId, spec: BreakpointSpec) -> bool {
        if id >= crate::MAX_BREAKPOINT {
            return false;
        }
        self.state.breakpoints.insert(id, spec);
        true
    }

    fn unset_breakpoint(&mut self, id: BreakpointId) -> bool {
        self.state.breakpoints.remove(&id).is_some()
    }

    fn read_physical(&self, phy: Pa, len: usize) -> Option<Vec<u8>> {
        (0..len as u64)
            .map(|i| self.state.physical.get(&(phy.0 + i)).copied())
            .collect()
    }

    fn write_physical(&mut self, phy: Pa, data: &[u8]) -> bool {
        for (i, &b) in data.iter().enumerate() {
            self.state.physical.insert(phy.0 + i as u64, b);
        }
        true
    }

    fn read_virtual(&self, dtb: Dtb, virt: Va, len: usize) -> Option<Vec<u8>> {
        (0..len as u64)
            .map(|i| self.state.virt.get(&(dtb, virt.0 + i)).copied())
            .collect()
    }

    fn virtual_to_physical(&self, dtb: Dtb, virt: Va) -> Option<Pa> {
        self.state.translations.get(&(dtb, virt.0)).copied()
    }

    fn inject_interrupt(&mut self, _vector: u32, _error: u32, _cr2: u64) -> bool {
        true
    }

    fn read_register(&self, reg: Register) -> Option<u64> {
        self.state.registers.get(&reg).copied()
    }

    fn write_register(&mut self, reg: Register, value: u64) -> bool {
        self.state.registers.insert(reg, value);
        true
    }

    fn read_msr(&self, msr: Msr) -> Option<u64> {
        self.state.msrs.get(&msr).copied()
    }

    fn write_msr(&mut self, msr: Msr, value: u64) -> bool {
        self.state.msrs.insert(msr, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_physical_fails_on_unmapped_byte() {
        let mut plane = MockPlane::new();
        plane.map_physical(Pa(0x1000), &[1, 2, 3]);

        assert_eq!(plane.read_physical(Pa(0x1000), 3).unwrap(), vec![1, 2, 3]);
        assert!(plane.read_physical(Pa(0x1000), 4).is_none());
    }

    #[test]
    fn resume_runs_scripted_step_once() {
        let mut plane = MockPlane::new();
        plane.set_register(Register::Rip, 0);
        plane.on_resume(|state| {
            state.set_register(Register::Rip, 0x4000);
        });

        assert!(plane.resume());
        assert_eq!(plane.read_register(Register::Rip), Some(0x4000));

        // Script is empty now; a further resume is a no-op success.
        assert!(plane.resume());
        assert_eq!(plane.read_register(Register::Rip), Some(0x4000));
    }

    #[test]
    fn set_and_unset_breakpoint_round_trip() {
        let mut plane = MockPlane::new();
        assert!(plane.set_breakpoint(0, BreakpointSpec::execute(Va(0x1000))));
        assert_eq!(plane.state.active_breakpoints(), vec![0]);

        assert!(plane.unset_breakpoint(0));
        assert!(plane.state.active_breakpoints().is_empty());
    }

    #[test]
    fn reset_clears_breakpoints_and_debug_registers() {
        let mut plane = MockPlane::new();
        plane.set_breakpoint(0, BreakpointSpec::cr3_write_trap());
        plane.set_register(Register::Dr7, 0xff);

        plane.reset();

        assert!(plane.state.active_breakpoints().is_empty());
        assert_eq!(plane.read_register(Register::Dr7), Some(0));
    }
}
