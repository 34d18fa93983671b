//! Linux guest-OS model: kernel discovery,
//! process/thread enumeration, and the `proc_join` rendezvous state
//! machine, built on top of `vmi-core`'s debug-plane client, dual-DTB
//! reader and execution controller.

pub mod banner;
pub mod flags;
pub mod list;
pub mod offsets;
pub mod pt_regs;
pub mod symbols;
pub mod version;

use std::env;
use std::path::PathBuf;

use sha1::{Digest, Sha1};
use tracing::{info, instrument, warn};
use vmi_core::{
    Cr3Filter, DebugPlane, DriverId, Dtb, EngineError, ExecutionController, ModuleId, Msr, Pa,
    Process, Reader, Register, Ring, Span, Thread, Va, VmaId, WalkResult,
};

use crate::flags::ProcFlags;
use crate::offsets::{Offsets, OffsetId, SymbolId, Symbols};
use crate::symbols::dwarf::DwarfStructProvider;
use crate::symbols::system_map::SystemMapProvider;
use crate::symbols::SymbolRegistry;
use crate::version::KernelVersion;

/// `PID_MAX`: PIDs observed above this value during a list traversal are
/// treated as guest-memory corruption, not a real process.
pub const PID_MAX: u32 = 1 << 22;

const CR3_MASK: u64 = !0x1fff;
const PROBE_READ_LEN: usize = 1;

/// `proc_join`'s target privilege mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Any privilege level; just reach `target`.
    AnyMode,
    /// `target` must be observed executing in ring 3.
    UserMode,
}

/// The environment variable naming the root of the symbol-file tree.
pub const LINUX_SYMBOL_PATH_VAR: &str = "LINUX_SYMBOL_PATH";

/// The reconstructed Linux guest-OS state,
/// stable after a successful [`LinuxGuest::setup`] except for readers'
/// `udtb`, which callers rebind per process via [`reader_setup`].
///
/// [`reader_setup`]: LinuxGuest::reader_setup
pub struct LinuxGuest {
    /// The dual-DTB reader; `kdtb` is fixed after setup, `udtb` is
    /// rebound per process.
    pub reader: Reader,
    symbols: SymbolRegistry,
    offsets: Offsets,
    syms: Symbols,
    /// Kernel-virtual address of this CPU's per-CPU data block.
    pub per_cpu: Va,
    /// The kernel page directory, fixed after setup.
    pub kpgd: Dtb,
    /// The fingerprinted kernel version.
    pub kversion: KernelVersion,
    pt_regs_size: u64,
}

impl LinuxGuest {
    /// Runs setup Phases A-D against `plane`, returning the
    /// assembled guest-OS state on success.
    #[instrument(skip(plane))]
    pub fn setup(plane: &mut dyn DebugPlane) -> Result<Self, EngineError> {
        let per_cpu = Self::phase_a_per_cpu_base(plane)?;
        let kpgd = Self::phase_b_kernel_page_dir(plane, per_cpu)?;

        let reader = Reader {
            kdtb: kpgd,
            udtb: Dtb::NONE,
        };

        let symbol_root = Self::symbol_root()?;

        for candidate in banner::scan_candidates(plane, kpgd) {
            match Self::phase_d_validate(plane, &reader, per_cpu, kpgd, candidate, &symbol_root) {
                Ok(guest) => {
                    info!(
                        kernel_version = %guest.kversion,
                        kaslr_slide = format_args!("{:#x}", guest.kaslr_slide()),
                        "kernel loaded"
                    );
                    return Ok(guest);
                }
                Err(err) => {
                    warn!(%candidate, error = %err, "banner candidate failed validation");
                }
            }
        }

        Err(EngineError::Validation(
            "no banner candidate validated during setup",
        ))
    }

    fn phase_a_per_cpu_base(plane: &mut dyn DebugPlane) -> Result<Va, EngineError> {
        let gs_base = plane
            .read_msr(Msr::GsBase)
            .ok_or(EngineError::Plane("read_msr(GS_BASE) failed"))?;

        if Va(gs_base).is_kernel_address() {
            return Ok(Va(gs_base));
        }

        let kernel_gs_base = plane
            .read_msr(Msr::KernelGsBase)
            .ok_or(EngineError::Plane("read_msr(KERNEL_GS_BASE) failed"))?;

        if Va(kernel_gs_base).is_kernel_address() {
            return Ok(Va(kernel_gs_base));
        }

        Err(EngineError::Validation(
            "neither GS_BASE nor KERNEL_GS_BASE is a kernel address",
        ))
    }

    fn phase_b_kernel_page_dir(
        plane: &mut dyn DebugPlane,
        per_cpu: Va,
    ) -> Result<Dtb, EngineError> {
        let cr3 = plane
            .read_register(Register::Cr3)
            .ok_or(EngineError::Plane("read_register(CR3) failed"))?;

        let base = cr3 & CR3_MASK;

        if plane
            .read_virtual(Dtb(base), per_cpu, PROBE_READ_LEN)
            .is_some()
        {
            return Ok(Dtb(base));
        }

        let meltdown_unpatched = Dtb(base | 0x1000);
        if plane
            .read_virtual(meltdown_unpatched, per_cpu, PROBE_READ_LEN)
            .is_some()
        {
            return Ok(meltdown_unpatched);
        }

        Err(EngineError::Validation(
            "unable to find a kernel page directory that translates per_cpu",
        ))
    }

    fn symbol_root() -> Result<PathBuf, EngineError> {
        env::var(LINUX_SYMBOL_PATH_VAR)
            .map(PathBuf::from)
            .map_err(|_| EngineError::Configuration("LINUX_SYMBOL_PATH is not set"))
    }

    fn phase_d_validate(
        plane: &mut dyn DebugPlane,
        reader: &Reader,
        per_cpu: Va,
        kpgd: Dtb,
        candidate: Va,
        symbol_root: &std::path::Path,
    ) -> Result<Self, EngineError> {
        let banner = banner::read_banner(plane, reader, candidate)
            .ok_or(EngineError::Validation("unable to read banner candidate"))?;

        let guid = hex::encode(Sha1::digest(banner.as_bytes()));
        let dir = symbol_root.join("kernel").join(&guid);

        let dwarf = DwarfStructProvider::load(&dir.join("vmlinux"))?;
        let system_map = SystemMapProvider::load(&dir.join("System.map"))?;

        let mut registry = SymbolRegistry::new();
        registry.insert("kernel_struct", Box::new(dwarf));
        registry.insert("kernel_sym", Box::new(system_map));

        if !registry.establish_slide("kernel_sym", "linux_banner", candidate.0) {
            return Err(EngineError::Validation(
                "unable to anchor ASLR slide on linux_banner",
            ));
        }

        let mut offsets = Offsets::new();
        for id in OffsetId::ALL {
            let (structure, member) = id.struct_member();
            if let Some(value) = registry.struct_offset("kernel_struct", structure, member) {
                offsets.set(id, value);
            }
        }
        if !offsets.all_required_resolved() {
            return Err(EngineError::Validation(
                "a required structure offset failed to resolve",
            ));
        }

        let mut syms = Symbols::new();
        for id in SymbolId::ALL {
            if let Some(value) = registry.symbol("kernel_sym", id.name()) {
                syms.set(id, value);
            }
        }
        if !syms.all_required_resolved() {
            return Err(EngineError::Validation(
                "a required symbol failed to resolve",
            ));
        }

        let pt_regs_size = registry
            .struct_size("kernel_struct", "pt_regs")
            .ok_or(EngineError::Validation("pt_regs size did not resolve"))?;

        let kversion = KernelVersion::parse_from_banner(&banner)
            .ok_or(EngineError::Validation("unable to parse kernel version from banner"))?;

        let mut guest = Self {
            reader: *reader,
            symbols: registry,
            offsets,
            syms,
            per_cpu,
            kpgd,
            kversion,
            pt_regs_size,
        };

        if !guest.check_setup(plane) {
            return Err(EngineError::Validation(
                "check_setup: no pid==0 task with comm starting \"swapper\" found",
            ));
        }

        Ok(guest)
    }

    /// Walks `proc_list` looking for the initial task (`pid == 0`, `comm`
    /// begins with `"swapper"`), the final check a banner candidate must
    /// pass before setup accepts it.
    fn check_setup(&self, plane: &mut dyn DebugPlane) -> bool {
        let mut found = false;

        self.proc_list(plane, |proc| {
            let Some(pid) = self.proc_id(plane, proc) else {
                return WalkResult::Next;
            };
            let Some(name) = self.proc_name(plane, proc) else {
                return WalkResult::Next;
            };

            if pid == 0 && name.starts_with("swapper") {
                found = true;
                return WalkResult::Stop;
            }

            WalkResult::Next
        });

        found
    }

    /// The observed KASLR slide, anchored on `linux_banner`, surfaced only
    /// for the setup log line.
    fn kaslr_slide(&self) -> i64 {
        self.symbols.slide("kernel_sym")
    }

    /// Rebinds the reader's user DTB without discarding `kdtb`.
    pub fn reader_setup(&mut self, udtb: Dtb) {
        self.reader.udtb = udtb;
    }

    /// Selects the DTB a raw pointer should be read through: `kpgd` for a
    /// kernel address, the reader's current `udtb` for a user address.
    pub fn proc_select(&self, ptr: Va) -> Dtb {
        if ptr.is_kernel_address() {
            self.kpgd
        }
        else {
            self.reader.udtb
        }
    }

    /// Resolves a guest-virtual pointer observed in `proc`'s context to a
    /// physical address, picking the kernel or `proc`'s own page directory
    /// by [`proc_select`](Self::proc_select).
    pub fn proc_resolve(&self, plane: &dyn DebugPlane, proc: Process, ptr: Va) -> Option<Pa> {
        let dtb = if ptr.is_kernel_address() {
            self.kpgd
        }
        else {
            proc.dtb
        };
        plane.virtual_to_physical(dtb, ptr)
    }

    /// The current task.
    pub fn thread_current(&self, plane: &dyn DebugPlane) -> Option<Thread> {
        let per_cpu_start = self.syms.get(SymbolId::PerCpuStart)?;
        let current_task = self.syms.get(SymbolId::CurrentTask)?;
        let addr = self.per_cpu.0 + (current_task - per_cpu_start);
        self.reader.read_va(plane, Va(addr)).map(Thread::from)
    }

    /// The current process.
    pub fn proc_current(&self, plane: &dyn DebugPlane) -> Option<Process> {
        let thread = self.thread_current(plane)?;
        self.thread_proc(plane, thread)
    }

    /// Resolves a thread to its owning process: the thread-group leader
    /// and that leader's `mm_struct`-derived DTB.
    pub fn thread_proc(&self, plane: &dyn DebugPlane, thread: Thread) -> Option<Process> {
        let group_leader_off = self.offsets.get(OffsetId::TaskStructGroupLeader)?;
        let leader = self.reader.read_va(plane, thread.id + group_leader_off)?;

        let mm_off = self.offsets.get(OffsetId::TaskStructMm)?;
        let mm = self.reader.read_va(plane, leader + mm_off)?;

        let dtb = if mm.is_null() {
            Dtb::NONE
        }
        else {
            let pgd_off = self.offsets.get(OffsetId::MmStructPgd)?;
            let pgd_va = self.reader.read_va(plane, mm + pgd_off)?;
            let pa = plane.virtual_to_physical(self.kpgd, pgd_va)?;
            Dtb(pa.0)
        };

        Some(Process {
            id: leader,
            dtb,
        })
    }

    /// Walks every process reachable from the current task's `tasks`
    /// list, delivering each to `on_proc`.
    pub fn proc_list(&self, plane: &dyn DebugPlane, mut on_proc: impl FnMut(Process) -> WalkResult) {
        let Some(current) = self.thread_current(plane) else {
            return;
        };
        let Some(tasks_off) = self.offsets.get(OffsetId::TaskStructTasks) else {
            return;
        };

        let head = current.id + tasks_off;
        list::walk(plane, &self.reader, head, tasks_off, |task_va| {
            match self.thread_proc(plane, Thread::from(task_va)) {
                Some(proc) => on_proc(proc),
                None => WalkResult::Stop,
            }
        });
    }

    /// Walks every thread in `proc`'s thread group.
    pub fn thread_list(
        &self,
        plane: &dyn DebugPlane,
        proc: Process,
        mut on_thread: impl FnMut(Thread) -> WalkResult,
    ) {
        let Some(thread_group_off) = self.offsets.get(OffsetId::TaskStructThreadGroup) else {
            return;
        };

        let head = proc.id + thread_group_off;
        list::walk(plane, &self.reader, head, thread_group_off, |task_va| {
            on_thread(Thread::from(task_va))
        });
    }

    /// Finds the process whose thread-group leader has the given `pid`.
    /// PIDs above [`PID_MAX`] are skipped as corrupt.
    pub fn proc_find(&self, plane: &dyn DebugPlane, pid: u32) -> Option<Process> {
        let mut found = None;

        self.proc_list(plane, |proc| {
            let Some(this_pid) = self.proc_id(plane, proc) else {
                return WalkResult::Next;
            };
            if this_pid > PID_MAX {
                return WalkResult::Next;
            }
            if this_pid == pid {
                found = Some(proc);
                return WalkResult::Stop;
            }
            WalkResult::Next
        });

        found
    }

    /// Finds the first process whose `comm` equals `name`.
    pub fn proc_find_by_name(&self, plane: &dyn DebugPlane, name: &str) -> Option<Process> {
        let mut found = None;

        self.proc_list(plane, |proc| {
            if self.proc_name(plane, proc).as_deref() == Some(name) {
                found = Some(proc);
                return WalkResult::Stop;
            }
            WalkResult::Next
        });

        found
    }

    /// A process's PID (`task_struct.pid` of its thread-group leader).
    pub fn proc_id(&self, plane: &dyn DebugPlane, proc: Process) -> Option<u32> {
        let pid_off = self.offsets.get(OffsetId::TaskStructPid)?;
        self.reader.read_le32(plane, proc.id + pid_off)
    }

    /// A process's `comm`: up to `TASK_COMM_LEN` (16) bytes,
    /// NUL-terminated.
    pub fn proc_name(&self, plane: &dyn DebugPlane, proc: Process) -> Option<String> {
        let comm_off = self.offsets.get(OffsetId::TaskStructComm)?;
        self.reader.read_cstr(plane, proc.id + comm_off, 16, 16)
    }

    /// A process's parent, via `real_parent`.
    pub fn proc_parent(&self, plane: &dyn DebugPlane, proc: Process) -> Option<Process> {
        let real_parent_off = self.offsets.get(OffsetId::TaskStructRealParent)?;
        let parent_thread = self.reader.read_va(plane, proc.id + real_parent_off)?;
        self.thread_proc(plane, Thread::from(parent_thread))
    }

    /// Classifies whether a process is 32-bit compatibility mode.
    pub fn proc_flags(&self, plane: &dyn DebugPlane, proc: Process) -> Option<ProcFlags> {
        let flags_off = self.offsets.get(OffsetId::TaskStructThreadInfoFlags)?;
        let raw = self.reader.read_le32(plane, proc.id + flags_off)?;
        Some(flags::classify(raw, &self.kversion))
    }

    /// A thread's PID, or `u64::MAX` on read failure.
    pub fn thread_id(&self, plane: &dyn DebugPlane, thread: Thread) -> u64 {
        let Some(pid_off) = self.offsets.get(OffsetId::TaskStructPid) else {
            return u64::MAX;
        };
        self.reader
            .read_le32(plane, thread.id + pid_off)
            .map(u64::from)
            .unwrap_or(u64::MAX)
    }

    /// The address of the saved `pt_regs` on `thread`'s kernel stack.
    pub fn pt_regs_ptr(&self, plane: &dyn DebugPlane, thread: Thread) -> Option<u64> {
        let stack_off = self.offsets.get(OffsetId::TaskStructStack)?;
        let stack_base = self.reader.read_u64(plane, thread.id + stack_off)?;
        Some(pt_regs::locate(
            &self.kversion,
            self.syms.has_kasan(),
            stack_base,
            self.pt_regs_size,
        ))
    }

    /// The program counter of `thread`: the live `RIP` if
    /// `thread` is the currently scheduled thread, else the saved kernel
    /// return address 8 bytes below its `pt_regs` on the kernel stack (the
    /// canonical ABI entry path's saved return address, not the saved user
    /// `pt_regs.ip`).
    pub fn thread_pc(&self, plane: &dyn DebugPlane, thread: Thread) -> Option<u64> {
        if Some(thread) == self.thread_current(plane) {
            return plane.read_register(Register::Rip);
        }

        let ptregs_ptr = self.pt_regs_ptr(plane, thread)?;
        self.reader.read_u64(plane, Va(ptregs_ptr - 8))
    }

    /// The current CPU's privilege ring, from `CS`.
    pub fn cpu_ring(&self, plane: &dyn DebugPlane) -> Option<Ring> {
        plane.read_register(Register::Cs).map(Ring::from_cs)
    }

    /// `run_to` with an empty PC set and a `CR3`-write filter: runs until
    /// the next context switch.
    fn run_until_next_cr3(&self, plane: &mut dyn DebugPlane) -> Result<(), EngineError> {
        ExecutionController::new().run_to(plane, &[], Cr3Filter::OnWritings, u32::MAX, |_| {
            WalkResult::Stop
        })
    }

    /// `proc_join_any`: collects every thread's PC for
    /// `target` and runs until one of them is hit while `target` is
    /// current.
    fn proc_join_any(&self, plane: &mut dyn DebugPlane, target: Process) -> Result<(), EngineError> {
        let mut pcs = Vec::new();
        self.thread_list(plane, target, |thread| {
            if let Some(pc) = self.thread_pc(plane, thread) {
                pcs.push(Va(pc));
            }
            WalkResult::Next
        });

        if pcs.is_empty() {
            return Err(EngineError::Validation(
                "proc_join_any: target has no threads with a resolvable PC",
            ));
        }

        ExecutionController::new().run_to(plane, &pcs, Cr3Filter::None, u32::MAX, |plane| {
            match self.proc_current(plane) {
                Some(cur) if cur.id == target.id => WalkResult::Stop,
                _ => WalkResult::Next,
            }
        })
    }

    /// `proc_join`: rendezvous with `target`, optionally
    /// requiring it to be observed in user mode.
    #[instrument(skip(self, plane))]
    pub fn proc_join(
        &self,
        plane: &mut dyn DebugPlane,
        target: Process,
        mode: JoinMode,
    ) -> Result<(), EngineError> {
        loop {
            let cur = self
                .proc_current(plane)
                .ok_or(EngineError::Plane("proc_current failed during proc_join"))?;

            let in_target_with_right_ring = cur.id == target.id
                && (mode == JoinMode::AnyMode || self.cpu_ring(plane) == Some(Ring::USER));

            if in_target_with_right_ring {
                return Ok(());
            }

            if cur.id != target.id {
                self.proc_join_any(plane, target)?;
                continue;
            }

            // Inside target, in kernel mode. ANY_MODE is already
            // satisfied above; only USER_MODE work remains.
            let ip_off = self.offsets.require(OffsetId::PtRegsIp)?;
            let user_rip = self
                .thread_current(plane)
                .and_then(|thread| self.pt_regs_ptr(plane, thread))
                .and_then(|ptregs_ptr| self.reader.read_u64(plane, Va(ptregs_ptr + ip_off)))
                .filter(|&rip| rip != 0);

            let Some(user_rip) = user_rip else {
                self.run_until_next_cr3(plane)?;
                continue;
            };

            // Qualified by Cr3Filter::OnWritings: user_rip is only a
            // meaningful landing address once the target's own address
            // space is active again, not merely when some thread's RIP
            // happens to match it under a different CR3.
            let original_ip = user_rip;
            ExecutionController::new().run_to(
                plane,
                &[Va(user_rip)],
                Cr3Filter::OnWritings,
                u32::MAX,
                |plane| {
                    if self.cpu_ring(plane) == Some(Ring::USER) {
                        return WalkResult::Stop;
                    }

                    match self.proc_current(plane) {
                        Some(cur) if cur.id == target.id => {}
                        _ => return WalkResult::Stop,
                    }

                    let still_same_ip = self
                        .thread_current(plane)
                        .and_then(|thread| self.pt_regs_ptr(plane, thread))
                        .and_then(|ptregs_ptr| {
                            self.reader.read_u64(plane, Va(ptregs_ptr + ip_off))
                        })
                        == Some(original_ip);

                    WalkResult::stop_if(!still_same_ip)
                },
            )?;
        }
    }

    // Module / VMA / driver enumeration.
    //
    // Linux support in this engine never resolves real loadable modules,
    // VMAs, or drivers (spec Non-goals); these methods exist only so the
    // handle types and call shapes match what a guest OS that does
    // resolve them would expose. Each one mirrors a real (non-stub)
    // operation's signature but always reports "nothing found".

    /// Delivers a single placeholder [`ModuleId`] to `on_module` and
    /// returns. Always succeeds; there is no real module list to walk.
    pub fn mod_list(&self, mut on_module: impl FnMut(ModuleId) -> WalkResult) {
        on_module(ModuleId(0));
    }

    /// Always `None`: no module name is ever resolved.
    pub fn mod_name(&self, _plane: &dyn DebugPlane, _proc: Process, _module: ModuleId) -> Option<String> {
        None
    }

    /// Always `None`: no module span is ever resolved.
    pub fn mod_span(&self, _plane: &dyn DebugPlane, _proc: Process, _module: ModuleId) -> Option<Span> {
        None
    }

    /// Always `None`: no module lookup by address ever succeeds.
    pub fn mod_find(&self, _plane: &dyn DebugPlane, _proc: Process, _addr: Va) -> Option<ModuleId> {
        None
    }

    /// Always reports no VMAs; unlike [`mod_list`](Self::mod_list), this
    /// delivers nothing at all to `on_vma`, matching the source's `vm_area_list`
    /// returning failure outright rather than a dummy entry.
    pub fn vm_area_list(&self, _on_vma: impl FnMut(VmaId) -> WalkResult) {}

    /// Always `None`: no VMA lookup by address ever succeeds.
    pub fn vm_area_find(&self, _plane: &dyn DebugPlane, _proc: Process, _addr: Va) -> Option<VmaId> {
        None
    }

    /// Always `None`: no VMA span is ever resolved.
    pub fn vm_area_span(&self, _plane: &dyn DebugPlane, _proc: Process, _vma: VmaId) -> Option<Span> {
        None
    }

    /// Always `None`: no VMA name is ever resolved.
    pub fn vm_area_name(&self, _plane: &dyn DebugPlane, _proc: Process, _vma: VmaId) -> Option<String> {
        None
    }

    /// Delivers a single placeholder [`DriverId`] to `on_driver` and
    /// returns. Always succeeds; there is no real driver list to walk.
    pub fn driver_list(&self, mut on_driver: impl FnMut(DriverId) -> WalkResult) {
        on_driver(DriverId(0));
    }

    /// Always `None`: no driver lookup by address ever succeeds.
    pub fn driver_find(&self, _plane: &dyn DebugPlane, _addr: Va) -> Option<DriverId> {
        None
    }

    /// Always `None`: no driver name is ever resolved.
    pub fn driver_name(&self, _plane: &dyn DebugPlane, _driver: DriverId) -> Option<String> {
        None
    }

    /// Always `None`: no driver span is ever resolved.
    pub fn driver_span(&self, _plane: &dyn DebugPlane, _driver: DriverId) -> Option<Span> {
        None
    }
}

#[cfg(test)]
mod tests {
    use vmi_core::mock::MockPlane;

    use super::*;

    const TASKS: u64 = 0x10;
    const THREAD_GROUP: u64 = 0x20;
    const GROUP_LEADER: u64 = 0x30;
    const MM: u64 = 0x38;
    const PID: u64 = 0x40;
    const COMM: u64 = 0x48;
    const STACK: u64 = 0x60;
    const PGD: u64 = 0x8;
    const PTREGS_IP: u64 = 0x90;

    const KPGD: Dtb = Dtb(0x1000);
    const PER_CPU: Va = Va(0xffff_8880_0000_0000);
    const PER_CPU_START_SYM: u64 = 0xffff_ffff_81e0_0000;
    const CURRENT_TASK_SYM: u64 = PER_CPU_START_SYM + 8;

    const SWAPPER: Va = Va(0xffff_ffff_81c0_0000);
    const SYSTEMD: Va = Va(0xffff_ffff_81c0_1000);
    const KTHREADD: Va = Va(0xffff_ffff_81c0_2000);

    /// A fully wired-up [`LinuxGuest`] (no `setup()`/symbol files involved)
    /// plus a [`MockPlane`] seeded with a 3-process `tasks` list: `swapper`
    /// (pid 0, kernel thread), `systemd` (pid 1, has an `mm`), `kthreadd`
    /// (pid 2, kernel thread). `current_task` starts out pointing at
    /// `systemd`.
    fn fixture() -> (MockPlane, LinuxGuest) {
        let mut plane = MockPlane::new();

        let mut offsets = Offsets::new();
        offsets.set(OffsetId::TaskStructTasks, TASKS);
        offsets.set(OffsetId::TaskStructThreadGroup, THREAD_GROUP);
        offsets.set(OffsetId::TaskStructGroupLeader, GROUP_LEADER);
        offsets.set(OffsetId::TaskStructMm, MM);
        offsets.set(OffsetId::TaskStructPid, PID);
        offsets.set(OffsetId::TaskStructComm, COMM);
        offsets.set(OffsetId::TaskStructThreadInfoFlags, 0x58);
        offsets.set(OffsetId::TaskStructStack, STACK);
        offsets.set(OffsetId::TaskStructRealParent, 0x70);
        offsets.set(OffsetId::MmStructPgd, PGD);
        offsets.set(OffsetId::PtRegsIp, PTREGS_IP);

        let mut syms = Symbols::new();
        syms.set(SymbolId::LinuxBanner, 0xffff_ffff_8160_0000);
        syms.set(SymbolId::PerCpuStart, PER_CPU_START_SYM);
        syms.set(SymbolId::CurrentTask, CURRENT_TASK_SYM);

        let guest = LinuxGuest {
            reader: Reader { kdtb: KPGD, udtb: Dtb::NONE },
            symbols: SymbolRegistry::new(),
            offsets,
            syms,
            per_cpu: PER_CPU,
            kpgd: KPGD,
            kversion: KernelVersion::parse("5.15.0").unwrap(),
            pt_regs_size: 0x98,
        };

        // current_task pointer, at `per_cpu + (current_task - per_cpu_start)`.
        plane.map_virtual(
            KPGD,
            Va(PER_CPU.0 + (CURRENT_TASK_SYM - PER_CPU_START_SYM)),
            &SYSTEMD.0.to_le_bytes(),
        );

        // `tasks` list: systemd (anchor/current) -> kthreadd -> swapper -> back to systemd.
        let systemd_link = SYSTEMD + TASKS;
        let kthreadd_link = KTHREADD + TASKS;
        let swapper_link = SWAPPER + TASKS;
        plane.map_virtual(KPGD, systemd_link, &kthreadd_link.0.to_le_bytes());
        plane.map_virtual(KPGD, kthreadd_link, &swapper_link.0.to_le_bytes());
        plane.map_virtual(KPGD, swapper_link, &systemd_link.0.to_le_bytes());

        // Every task is its own thread-group leader (single-threaded).
        for task in [SWAPPER, SYSTEMD, KTHREADD] {
            plane.map_virtual(KPGD, task + GROUP_LEADER, &task.0.to_le_bytes());
        }

        // swapper, kthreadd: kernel threads, no `mm`.
        plane.map_virtual(KPGD, SWAPPER + MM, &0u64.to_le_bytes());
        plane.map_virtual(KPGD, KTHREADD + MM, &0u64.to_le_bytes());

        // systemd: has an `mm`, whose `pgd` resolves through `kpgd` to a
        // physical DTB.
        let mm_systemd = Va(0xffff_8880_1234_0000);
        let pgd_va = Va(0xffff_8880_1235_0000);
        plane.map_virtual(KPGD, SYSTEMD + MM, &mm_systemd.0.to_le_bytes());
        plane.map_virtual(KPGD, mm_systemd + PGD, &pgd_va.0.to_le_bytes());
        plane.map_translation(KPGD, pgd_va, Pa(0x5000));

        // pids.
        plane.map_virtual(KPGD, SWAPPER + PID, &0u32.to_le_bytes());
        plane.map_virtual(KPGD, SYSTEMD + PID, &1u32.to_le_bytes());
        plane.map_virtual(KPGD, KTHREADD + PID, &2u32.to_le_bytes());

        // comms.
        let mut comm = |task: Va, name: &str| {
            let mut buf = [0u8; 16];
            buf[..name.len()].copy_from_slice(name.as_bytes());
            plane.map_virtual(KPGD, task + COMM, &buf);
        };
        comm(SWAPPER, "swapper/0");
        comm(SYSTEMD, "systemd");
        comm(KTHREADD, "kthreadd");

        (plane, guest)
    }

    #[test]
    fn proc_list_visits_the_current_task_and_the_rest() {
        let (plane, guest) = fixture();

        let mut pids = Vec::new();
        guest.proc_list(&plane, |proc| {
            pids.push(guest.proc_id(&plane, proc).unwrap());
            WalkResult::Next
        });

        // Invariant I6: the current task's own process must appear in the
        // traversed set, not just the ones reached after it.
        pids.sort_unstable();
        assert_eq!(pids, vec![0, 1, 2]);
    }

    #[test]
    fn check_setup_finds_swapper_even_when_it_is_not_current() {
        let (mut plane, guest) = fixture();
        assert!(guest.check_setup(&mut plane));
    }

    #[test]
    fn proc_current_is_systemd_with_a_resolved_dtb() {
        let (plane, guest) = fixture();

        let current = guest.proc_current(&plane).unwrap();
        assert_eq!(current.id, SYSTEMD);
        assert_eq!(current.dtb, Dtb(0x5000));
    }

    #[test]
    fn kernel_threads_have_no_dtb() {
        let (plane, guest) = fixture();

        let swapper = guest.thread_proc(&plane, Thread::from(SWAPPER)).unwrap();
        assert_eq!(swapper.dtb, Dtb::NONE);
    }

    #[test]
    fn proc_find_locates_by_pid_and_by_name() {
        let (plane, guest) = fixture();

        assert_eq!(guest.proc_find(&plane, 0).unwrap().id, SWAPPER);
        assert_eq!(guest.proc_find(&plane, 2).unwrap().id, KTHREADD);
        assert!(guest.proc_find(&plane, 42).is_none());

        assert_eq!(
            guest.proc_find_by_name(&plane, "kthreadd").unwrap().id,
            KTHREADD
        );
    }

    #[test]
    fn thread_pc_of_the_current_thread_reads_the_live_register() {
        let (mut plane, guest) = fixture();
        plane.set_register(Register::Rip, 0xffff_ffff_8123_4567);

        let current = guest.thread_current(&plane).unwrap();
        assert_eq!(guest.thread_pc(&plane, current), Some(0xffff_ffff_8123_4567));
    }

    #[test]
    fn thread_pc_of_a_non_current_thread_reads_saved_pt_regs() {
        let (mut plane, guest) = fixture();

        let stack_base = Va(0xffff_ffff_81d0_0000);
        plane.map_virtual(KPGD, KTHREADD + STACK, &stack_base.0.to_le_bytes());

        let ptregs_ptr = pt_regs::locate(&guest.kversion, guest.syms.has_kasan(), stack_base.0, guest.pt_regs_size);
        plane.map_virtual(KPGD, Va(ptregs_ptr - 8), &0xffff_ffff_8100_1000u64.to_le_bytes());

        let pc = guest.thread_pc(&plane, Thread::from(KTHREADD));
        assert_eq!(pc, Some(0xffff_ffff_8100_1000));
    }

    #[test]
    fn proc_join_any_mode_is_immediate_when_already_current() {
        let (mut plane, guest) = fixture();
        plane.on_resume(|_| panic!("proc_join should not need to resume"));

        let target = guest.proc_current(&plane).unwrap();
        assert!(guest.proc_join(&mut plane, target, JoinMode::AnyMode).is_ok());
    }

    #[test]
    fn proc_join_any_mode_waits_for_a_context_switch_into_the_target() {
        let (mut plane, guest) = fixture();

        // Retarget `current_task` to kthreadd so systemd is not current.
        plane.map_virtual(
            KPGD,
            Va(PER_CPU.0 + (CURRENT_TASK_SYM - PER_CPU_START_SYM)),
            &KTHREADD.0.to_le_bytes(),
        );

        // systemd's lone thread needs a resolvable PC to seed the
        // breakpoint set `proc_join_any` installs.
        let stack_base = Va(0xffff_ffff_81d0_2000);
        plane.map_virtual(KPGD, SYSTEMD + STACK, &stack_base.0.to_le_bytes());
        let ptregs_ptr = pt_regs::locate(&guest.kversion, guest.syms.has_kasan(), stack_base.0, guest.pt_regs_size);
        plane.map_virtual(KPGD, Va(ptregs_ptr - 8), &0xffff_ffff_8100_2000u64.to_le_bytes());

        // The first (and only) resume simulates the scheduler switching
        // into systemd.
        let current_task_addr = Va(PER_CPU.0 + (CURRENT_TASK_SYM - PER_CPU_START_SYM));
        plane.on_resume(move |state| {
            state.set_virtual(KPGD, current_task_addr, &SYSTEMD.0.to_le_bytes());
        });

        let target = Process { id: SYSTEMD, dtb: Dtb(0x5000) };
        assert!(guest.proc_join(&mut plane, target, JoinMode::AnyMode).is_ok());
        assert_eq!(guest.proc_current(&plane).unwrap().id, SYSTEMD);
    }
}

