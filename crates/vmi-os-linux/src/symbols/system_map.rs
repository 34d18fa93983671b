//! A [`SymbolProvider`] backed by a `System.map`-format file: one symbol
//! per line, `<hex address> <type char> <name> [<module>]`.

use std::collections::HashMap;
use std::path::Path;

use vmi_core::EngineError;

use super::SymbolProvider;

/// Symbol addresses parsed out of a System.map file.
///
/// Carries no structure-layout information; `struct_offset`/`struct_size`
/// always return `None` (that is the DWARF provider's job).
#[derive(Debug, Default)]
pub struct SystemMapProvider {
    symbols: HashMap<String, u64>,
}

impl SystemMapProvider {
    /// Parses `path` as a System.map file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parses System.map text directly (exposed for tests and for callers
    /// that already have the file contents in memory).
    pub fn parse(text: &str) -> Self {
        let mut symbols = HashMap::new();

        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let Some(addr) = fields.next() else { continue };
            let Some(_kind) = fields.next() else { continue };
            let Some(name) = fields.next() else { continue };

            if let Ok(addr) = u64::from_str_radix(addr, 16) {
                symbols.insert(name.to_string(), addr);
            }
        }

        Self { symbols }
    }
}

impl SymbolProvider for SystemMapProvider {
    fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    fn struct_offset(&self, _structure: &str, _member: &str) -> Option<u64> {
        None
    }

    fn struct_size(&self, _structure: &str) -> Option<u64> {
        None
    }
}
