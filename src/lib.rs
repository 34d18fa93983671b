//! # Linux guest introspection
//!
//! A virtual-machine introspection engine that reconstructs a running
//! Linux x86-64 guest's high-level state — processes, threads, their
//! address spaces and symbol-resolved program counters — by talking to a
//! hypervisor debug back-channel from the outside.
//!
//! # Architecture
//!
//! The engine is layered, leaves first:
//!
//! - [`vmi_core`]: the debug-plane client trait ([`DebugPlane`]), address
//!   newtypes ([`Va`], [`Pa`], [`Dtb`]), the dual-DTB [`Reader`], and the
//!   breakpoint-driven [`ExecutionController`]. Knows nothing about any
//!   particular guest OS.
//! - [`vmi_os_linux`] (re-exported as [`linux`]): the Linux guest-OS model,
//!   [`LinuxGuest`], built on top of the above. Bootstraps kernel layout,
//!   loads symbols, enumerates processes and threads, and drives
//!   `proc_join` to rendezvous with a chosen process in a chosen privilege
//!   mode.
//!
//! [`Engine`] ties the two together: a live [`DebugPlane`] plus the
//! [`LinuxGuest`] state reconstructed from it.
//!
//! # Quick start
//!
//! ```no_run
//! use vmi::{Engine, JoinMode, Process};
//!
//! # fn make_plane() -> Box<dyn vmi::DebugPlane> { unimplemented!() }
//! # fn main() -> Result<(), vmi::EngineError> {
//! let mut plane = make_plane();
//! let mut engine = Engine::setup(plane)?;
//!
//! let current = engine.guest().proc_current(engine.plane()).expect("current process");
//! println!("current pid = {:?}", engine.guest().proc_id(engine.plane(), current));
//!
//! if let Some(systemd) = engine.guest().proc_find(engine.plane(), 1) {
//!     engine.join(systemd, JoinMode::UserMode)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! `setup` reads the `LINUX_SYMBOL_PATH` environment variable once, at the
//! start of kernel discovery. It must point at a directory tree of
//! `kernel/<guid>/{vmlinux,System.map}` pairs keyed by the SHA-1 hex digest
//! of the kernel's `"Linux version ..."` banner string; see
//! [`vmi_os_linux::LINUX_SYMBOL_PATH_VAR`].
//!
//! # Logging
//!
//! The engine emits `tracing` events at component boundaries: a `warn!`
//! per rejected banner candidate during setup, an `info!` reporting the
//! resolved kernel version and KASLR slide on success. Install a
//! `tracing_subscriber` to observe them; this crate does not configure one
//! itself.
//!
//! # Scope
//!
//! Out of scope, by design: the hypervisor back-channel implementation
//! itself (only the [`DebugPlane`] interface is consumed), the symbol-file
//! loaders' on-disk format beyond what [`vmi_os_linux::symbols`] parses,
//! Windows-guest support, and any architecture other than x86-64.
//! Module/VMA/driver enumeration is present only as a stub surface for API
//! uniformity with other guest OSes the wider framework supports, not as
//! working functionality.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use vmi_core::*;

/// The Linux guest-OS model.
pub mod linux {
    pub use vmi_os_linux::*;
}

pub use vmi_os_linux::{JoinMode, LinuxGuest};

/// Ties a live [`DebugPlane`] to the [`LinuxGuest`] state reconstructed
/// from it.
///
/// Owns the plane exclusively for the session: the engine is
/// single-threaded cooperative with respect to the guest, and every
/// method assumes the caller holds logical exclusivity over `plane`.
pub struct Engine {
    plane: Box<dyn DebugPlane>,
    guest: LinuxGuest,
}

impl Engine {
    /// Runs [`LinuxGuest::setup`] against `plane`, taking ownership of it
    /// for the lifetime of the returned `Engine`.
    pub fn setup(mut plane: Box<dyn DebugPlane>) -> Result<Self, EngineError> {
        let guest = LinuxGuest::setup(plane.as_mut())?;
        Ok(Self { plane, guest })
    }

    /// The reconstructed guest-OS state.
    pub fn guest(&self) -> &LinuxGuest {
        &self.guest
    }

    /// The underlying debug plane, for read-only introspection calls that
    /// take `&dyn DebugPlane`.
    pub fn plane(&self) -> &dyn DebugPlane {
        self.plane.as_ref()
    }

    /// The underlying debug plane, mutably, for calls that resume or
    /// single-step the guest (`proc_join`, breakpoint installation).
    pub fn plane_mut(&mut self) -> &mut dyn DebugPlane {
        self.plane.as_mut()
    }

    /// Rebinds the reader's user DTB to `proc` without discarding the
    /// fixed kernel DTB, then returns a guard that restores it to
    /// [`Dtb::NONE`] on drop.
    pub fn with_process<'a>(&'a mut self, proc: Process) -> ProcessContext<'a> {
        self.guest.reader_setup(proc.dtb);
        ProcessContext { engine: self }
    }

    /// Drives `proc_join` to rendezvous with `target` in `mode`, borrowing
    /// the plane mutably for the duration of the run.
    pub fn join(&mut self, target: Process, mode: JoinMode) -> Result<(), EngineError> {
        self.guest.proc_join(self.plane.as_mut(), target, mode)
    }
}

/// Scopes a rebound user DTB to a lexical region, restoring
/// [`Dtb::NONE`] when dropped.
pub struct ProcessContext<'a> {
    engine: &'a mut Engine,
}

impl<'a> std::ops::Deref for ProcessContext<'a> {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        self.engine
    }
}

impl<'a> std::ops::DerefMut for ProcessContext<'a> {
    fn deref_mut(&mut self) -> &mut Engine {
        self.engine
    }
}

impl<'a> Drop for ProcessContext<'a> {
    fn drop(&mut self) {
        self.engine.guest.reader_setup(Dtb::NONE);
    }
}
