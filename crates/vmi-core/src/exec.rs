//! Execution controller.
//!
//! `run_to` is the one primitive every higher-level rendezvous
//! (`proc_join`, single-stepping past a syscall entry, ...) is built from:
//! install one or more hardware breakpoints, resume the guest, and invoke a
//! predicate on every hit. The predicate decides whether the condition it
//! is waiting for has been met ([`WalkResult::Stop`]) or whether the guest
//! should simply keep running ([`WalkResult::Next`]).
//!
//! Installed breakpoints are always removed before `run_to` returns,
//! whether it returns because the predicate was satisfied or because the
//! plane reported a transport failure.

use crate::{BreakpointId, BreakpointSpec, Cr3Filter, DebugPlane, EngineError, Va, WalkResult};

/// Drives a [`DebugPlane`] through breakpoint-gated resume/wait cycles.
///
/// Carries no state of its own; it only borrows the plane for the
/// duration of a single [`run_to`](Self::run_to) call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionController;

impl ExecutionController {
    /// Creates a controller. There is no setup to perform; this exists so
    /// call sites read `ExecutionController::new().run_to(...)` rather than
    /// calling a bare function.
    pub fn new() -> Self {
        Self
    }

    /// Resumes the guest repeatedly until `predicate` returns
    /// [`WalkResult::Stop`], breaking on one of:
    ///
    /// - an execution breakpoint at each address in `pcs`, qualified by
    ///   `cr3_mode` (e.g. [`Cr3Filter::OnWritings`] so a breakpoint address
    ///   only fires once the right address space is active), or
    /// - a `CR3`-write trap (any context switch) if `pcs` is empty,
    ///   regardless of `cr3_mode`.
    ///
    /// `predicate` is invoked after every `resume()` that reports success;
    /// it is the caller's job to inspect whatever guest state it needs
    /// (current task, current `RIP`, ...) through the same plane.
    ///
    /// Every breakpoint this call installs is removed before it returns,
    /// on every exit path (predicate satisfied, predicate never satisfied
    /// within `max_iterations`, or plane failure).
    pub fn run_to(
        &self,
        plane: &mut dyn DebugPlane,
        pcs: &[Va],
        cr3_mode: Cr3Filter,
        max_iterations: u32,
        mut predicate: impl FnMut(&mut dyn DebugPlane) -> WalkResult,
    ) -> Result<(), EngineError> {
        let ids = self.install(plane, pcs, cr3_mode)?;

        let mut result = Err(EngineError::Validation(
            "run_to exceeded its iteration bound without the predicate stopping",
        ));

        for _ in 0..max_iterations {
            if !plane.resume() {
                result = Err(EngineError::Plane("resume failed"));
                break;
            }

            if predicate(plane).is_stop() {
                result = Ok(());
                break;
            }
        }

        for id in ids {
            plane.unset_breakpoint(id);
        }

        result
    }

    fn install(
        &self,
        plane: &mut dyn DebugPlane,
        pcs: &[Va],
        cr3_mode: Cr3Filter,
    ) -> Result<Vec<BreakpointId>, EngineError> {
        let mut ids = Vec::new();

        let specs: Vec<BreakpointSpec> = if pcs.is_empty() {
            vec![BreakpointSpec::cr3_write_trap()]
        }
        else {
            pcs.iter()
                .copied()
                .map(|pc| BreakpointSpec {
                    cr3_filter: cr3_mode,
                    ..BreakpointSpec::execute(pc)
                })
                .collect()
        };

        for (id, spec) in specs.into_iter().enumerate() {
            if !plane.set_breakpoint(id, spec) {
                for installed in &ids {
                    plane.unset_breakpoint(*installed);
                }
                return Err(EngineError::Plane("set_breakpoint failed"));
            }
            ids.push(id);
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlane;
    use crate::Register;

    #[test]
    fn run_to_stops_on_predicate_and_removes_breakpoints() {
        let mut plane = MockPlane::new();
        plane.set_register(Register::Rip, 0);
        plane.on_resume(|state| state.set_register(Register::Rip, 0x1000));

        let controller = ExecutionController::new();
        let result = controller.run_to(&mut plane, &[Va(0x1000)], Cr3Filter::None, 10, |plane| {
            WalkResult::stop_if(plane.read_register(Register::Rip) == Some(0x1000))
        });

        assert!(result.is_ok());
        assert!(plane.state.active_breakpoints().is_empty());
    }

    #[test]
    fn run_to_installs_cr3_write_trap_when_pcs_empty() {
        let mut plane = MockPlane::new();
        plane.on_resume(|_| {});

        let controller = ExecutionController::new();
        let result = controller.run_to(&mut plane, &[], Cr3Filter::OnWritings, 1, |_| WalkResult::Stop);

        assert!(result.is_ok());
        assert!(plane.state.active_breakpoints().is_empty());
    }

    #[test]
    fn run_to_threads_the_cr3_filter_into_each_installed_breakpoint() {
        let mut plane = MockPlane::new();
        plane.on_resume(|state| {
            assert_eq!(
                state.breakpoint_spec(0).map(|spec| spec.cr3_filter),
                Some(Cr3Filter::OnWritings)
            );
            assert_eq!(
                state.breakpoint_spec(1).map(|spec| spec.cr3_filter),
                Some(Cr3Filter::OnWritings)
            );
        });

        let controller = ExecutionController::new();
        controller
            .run_to(&mut plane, &[Va(0x1000), Va(0x2000)], Cr3Filter::OnWritings, 1, |_| {
                WalkResult::Stop
            })
            .unwrap();
    }

    #[test]
    fn run_to_removes_breakpoints_on_exhausted_iterations() {
        let mut plane = MockPlane::new();

        let controller = ExecutionController::new();
        let result = controller.run_to(&mut plane, &[Va(0x2000)], Cr3Filter::None, 3, |_| WalkResult::Next);

        assert!(result.is_err());
        assert!(plane.state.active_breakpoints().is_empty());
    }

    #[test]
    fn run_to_removes_breakpoints_on_plane_failure() {
        struct FailOnResume(MockPlane);

        impl DebugPlane for FailOnResume {
            fn init(&mut self) -> bool {
                self.0.init()
            }
            fn reset(&mut self) {
                self.0.reset()
            }
            fn state(&self) -> Option<crate::PlaneState> {
                self.0.state()
            }
            fn state_changed(&self) -> bool {
                self.0.state_changed()
            }
            fn pause(&mut self) -> bool {
                self.0.pause()
            }
            fn resume(&mut self) -> bool {
                false
            }
            fn step_once(&mut self) -> bool {
                self.0.step_once()
            }
            fn set_breakpoint(&mut self, id: BreakpointId, spec: BreakpointSpec) -> bool {
                self.0.set_breakpoint(id, spec)
            }
            fn unset_breakpoint(&mut self, id: BreakpointId) -> bool {
                self.0.unset_breakpoint(id)
            }
            fn read_physical(&self, phy: crate::Pa, len: usize) -> Option<Vec<u8>> {
                self.0.read_physical(phy, len)
            }
            fn write_physical(&mut self, phy: crate::Pa, data: &[u8]) -> bool {
                self.0.write_physical(phy, data)
            }
            fn read_virtual(&self, dtb: crate::Dtb, virt: Va, len: usize) -> Option<Vec<u8>> {
                self.0.read_virtual(dtb, virt, len)
            }
            fn virtual_to_physical(&self, dtb: crate::Dtb, virt: Va) -> Option<crate::Pa> {
                self.0.virtual_to_physical(dtb, virt)
            }
            fn inject_interrupt(&mut self, vector: u32, error: u32, cr2: u64) -> bool {
                self.0.inject_interrupt(vector, error, cr2)
            }
            fn read_register(&self, reg: Register) -> Option<u64> {
                self.0.read_register(reg)
            }
            fn write_register(&mut self, reg: Register, value: u64) -> bool {
                self.0.write_register(reg, value)
            }
            fn read_msr(&self, msr: crate::Msr) -> Option<u64> {
                self.0.read_msr(msr)
            }
            fn write_msr(&mut self, msr: crate::Msr, value: u64) -> bool {
                self.0.write_msr(msr, value)
            }
        }

        let mut plane = FailOnResume(MockPlane::new());
        let controller = ExecutionController::new();
        let result = controller.run_to(&mut plane, &[Va(0x3000)], Cr3Filter::None, 5, |_| WalkResult::Next);

        assert!(result.is_err());
        assert!(plane.0.state.active_breakpoints().is_empty());
    }
}
