//! Core virtual-machine introspection primitives: address newtypes, the
//! debug-plane client trait, the dual-DTB memory reader, and the
//! breakpoint-driven execution controller.
//!
//! `vmi-os-linux` builds the Linux guest-OS model on top of everything
//! exported here; this crate knows nothing about any particular guest OS.

mod core;
mod error;
mod exec;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod plane;
mod reader;
mod registers;
mod walk;

pub use self::{
    core::{DriverId, Dtb, ModuleId, Pa, Process, Span, Thread, Va, VmaId, KERNEL_SPACE_START},
    error::EngineError,
    exec::ExecutionController,
    plane::{
        AccessLength, AddressKind, BreakpointId, BreakpointSpec, BreakpointType, Cr3Filter,
        DebugPlane, PlaneState, MAX_BREAKPOINT,
    },
    reader::Reader,
    registers::{Msr, Register, Ring},
    walk::WalkResult,
};
