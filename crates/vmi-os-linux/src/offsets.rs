//! Offsets/symbols tables: fixed sets of enumerated ids, each
//! resolved once during setup and either required to be non-zero or
//! allowed to stay absent.

use std::collections::HashMap;

use vmi_core::EngineError;

/// Whether an offset or symbol must resolve for setup to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Setup fails if this entry does not resolve.
    Required,
    /// This entry may stay absent; callers that need it handle `None`.
    Optional,
}

/// A structure-member offset this engine parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(missing_docs)]
pub enum OffsetId {
    TaskStructTasks,
    TaskStructThreadGroup,
    TaskStructGroupLeader,
    TaskStructMm,
    TaskStructPid,
    TaskStructComm,
    TaskStructThreadInfoFlags,
    TaskStructStack,
    TaskStructRealParent,
    MmStructPgd,
    PtRegsIp,
}

impl OffsetId {
    /// The `(struct, member)` pair this id names, used both to ask the
    /// symbol registry for the offset and to report a miss.
    pub fn struct_member(self) -> (&'static str, &'static str) {
        match self {
            Self::TaskStructTasks => ("task_struct", "tasks"),
            Self::TaskStructThreadGroup => ("task_struct", "thread_group"),
            Self::TaskStructGroupLeader => ("task_struct", "group_leader"),
            Self::TaskStructMm => ("task_struct", "mm"),
            Self::TaskStructPid => ("task_struct", "pid"),
            Self::TaskStructComm => ("task_struct", "comm"),
            Self::TaskStructThreadInfoFlags => ("task_struct", "thread_info.flags"),
            Self::TaskStructStack => ("task_struct", "stack"),
            Self::TaskStructRealParent => ("task_struct", "real_parent"),
            Self::MmStructPgd => ("mm_struct", "pgd"),
            Self::PtRegsIp => ("pt_regs", "ip"),
        }
    }

    /// Every offset this engine needs, in table order.
    pub const ALL: [OffsetId; 11] = [
        Self::TaskStructTasks,
        Self::TaskStructThreadGroup,
        Self::TaskStructGroupLeader,
        Self::TaskStructMm,
        Self::TaskStructPid,
        Self::TaskStructComm,
        Self::TaskStructThreadInfoFlags,
        Self::TaskStructStack,
        Self::TaskStructRealParent,
        Self::MmStructPgd,
        Self::PtRegsIp,
    ];

    /// All of these offsets are required; the structures they name must
    /// be present for any Linux guest this engine can introspect.
    pub fn category(self) -> Category {
        Category::Required
    }
}

/// A symbol this engine needs the address of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(missing_docs)]
pub enum SymbolId {
    LinuxBanner,
    PerCpuStart,
    CurrentTask,
    KasanInit,
}

impl SymbolId {
    /// The symbol name as it appears in System.map / DWARF.
    pub fn name(self) -> &'static str {
        match self {
            Self::LinuxBanner => "linux_banner",
            Self::PerCpuStart => "__per_cpu_start",
            Self::CurrentTask => "current_task",
            Self::KasanInit => "kasan_init",
        }
    }

    /// Every symbol this engine needs, in table order.
    pub const ALL: [SymbolId; 4] = [
        Self::LinuxBanner,
        Self::PerCpuStart,
        Self::CurrentTask,
        Self::KasanInit,
    ];

    /// `kasan_init` is the one optional symbol: its presence
    /// alone distinguishes the KASAN-enlarged kernel-stack layout.
    pub fn category(self) -> Category {
        match self {
            Self::KasanInit => Category::Optional,
            _ => Category::Required,
        }
    }
}

/// Resolved structure-member offsets, by [`OffsetId`].
#[derive(Debug, Clone, Default)]
pub struct Offsets(HashMap<OffsetId, u64>);

impl Offsets {
    /// An empty table, as it stands before setup resolves anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resolved offset.
    pub fn set(&mut self, id: OffsetId, value: u64) {
        self.0.insert(id, value);
    }

    /// Returns the offset, or `None` if it never resolved.
    pub fn get(&self, id: OffsetId) -> Option<u64> {
        self.0.get(&id).copied()
    }

    /// Returns the offset, failing with [`EngineError::SymbolMiss`] if
    /// absent — the only acceptable outcome for a [`Category::Required`]
    /// entry once setup has completed.
    pub fn require(&self, id: OffsetId) -> Result<u64, EngineError> {
        let (structure, member) = id.struct_member();
        self.get(id)
            .ok_or_else(|| EngineError::missing_offset("kernel_struct", structure, member))
    }

    /// Returns `true` iff every [`Category::Required`] offset in
    /// [`OffsetId::ALL`] has resolved.
    pub fn all_required_resolved(&self) -> bool {
        OffsetId::ALL
            .iter()
            .all(|id| id.category() == Category::Optional || self.0.contains_key(id))
    }
}

/// Resolved symbol addresses, by [`SymbolId`].
#[derive(Debug, Clone, Default)]
pub struct Symbols(HashMap<SymbolId, u64>);

impl Symbols {
    /// An empty table, as it stands before setup resolves anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resolved symbol address.
    pub fn set(&mut self, id: SymbolId, value: u64) {
        self.0.insert(id, value);
    }

    /// Returns the symbol's address, or `None` if it never resolved.
    pub fn get(&self, id: SymbolId) -> Option<u64> {
        self.0.get(&id).copied()
    }

    /// Returns the symbol's address, failing with
    /// [`EngineError::SymbolMiss`] if absent.
    pub fn require(&self, id: SymbolId) -> Result<u64, EngineError> {
        self.get(id)
            .ok_or_else(|| EngineError::missing_symbol("kernel_sym", id.name()))
    }

    /// Returns `true` iff every [`Category::Required`] symbol in
    /// [`SymbolId::ALL`] has resolved.
    pub fn all_required_resolved(&self) -> bool {
        SymbolId::ALL
            .iter()
            .all(|id| id.category() == Category::Optional || self.0.contains_key(id))
    }

    /// `true` iff `kasan_init` resolved to a symbol, used to pick
    /// `THREAD_SIZE_ORDER` on kernels ≥ 4.0.
    pub fn has_kasan(&self) -> bool {
        self.get(SymbolId::KasanInit).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_report_missing_required_entries() {
        let offsets = Offsets::new();
        assert!(!offsets.all_required_resolved());
        assert!(offsets.require(OffsetId::TaskStructTasks).is_err());
    }

    #[test]
    fn offsets_resolved_once_all_set() {
        let mut offsets = Offsets::new();
        for id in OffsetId::ALL {
            offsets.set(id, 0x10);
        }
        assert!(offsets.all_required_resolved());
    }

    #[test]
    fn symbols_allow_kasan_init_to_stay_absent() {
        let mut symbols = Symbols::new();
        symbols.set(SymbolId::LinuxBanner, 1);
        symbols.set(SymbolId::PerCpuStart, 2);
        symbols.set(SymbolId::CurrentTask, 3);

        assert!(symbols.all_required_resolved());
        assert!(!symbols.has_kasan());
    }
}
