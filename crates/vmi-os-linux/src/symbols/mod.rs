//! Symbol registry.
//!
//! Holds named [`SymbolProvider`]s — in production, `"kernel_struct"` is a
//! DWARF-backed provider of structure layouts and `"kernel_sym"` is a
//! System.map-backed provider of symbol addresses — and resolves the two
//! queries the rest of the engine needs: "where is this symbol" (adjusted
//! for ASLR) and "what is this structure member's byte offset".

pub mod dwarf;
pub mod system_map;

use std::collections::HashMap;

/// A source of symbol addresses and/or structure layouts.
///
/// A single provider is not required to answer both kinds of query: the
/// DWARF provider only ever answers [`struct_offset`](Self::struct_offset)
/// and [`struct_size`](Self::struct_size); the System.map provider only
/// ever answers [`symbol`](Self::symbol). Returning `None` from a query a
/// provider doesn't support is always correct.
pub trait SymbolProvider {
    /// Resolves `name` to its address as recorded in the provider's
    /// backing file, before any ASLR slide is applied.
    fn symbol(&self, name: &str) -> Option<u64>;

    /// Resolves `(structure, member)` to a byte offset.
    fn struct_offset(&self, structure: &str, member: &str) -> Option<u64>;

    /// Resolves `structure` to its byte size.
    fn struct_size(&self, structure: &str) -> Option<u64>;
}

struct Entry {
    provider: Box<dyn SymbolProvider>,
    /// `observed_address - file_address` for the symbol that established
    /// it, or `0` before any has been established.
    slide: i64,
}

/// Holds named [`SymbolProvider`]s and answers address/offset queries
/// against them, applying each provider's own ASLR slide.
#[derive(Default)]
pub struct SymbolRegistry {
    providers: HashMap<String, Entry>,
}

impl SymbolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `name`, replacing any provider already
    /// registered there.
    pub fn insert(&mut self, name: impl Into<String>, provider: Box<dyn SymbolProvider>) {
        self.providers.insert(
            name.into(),
            Entry {
                provider,
                slide: 0,
            },
        );
    }

    /// Removes the provider registered under `name`, if any.
    pub fn remove(&mut self, name: &str) {
        self.providers.remove(name);
    }

    /// Establishes `name`'s ASLR slide from one known `(symbol,
    /// observed_address)` pair: `slide = observed - file_address`.
    /// Returns `false` if `name` isn't registered or the symbol doesn't
    /// resolve in the provider's backing file.
    pub fn establish_slide(&mut self, name: &str, symbol: &str, observed: u64) -> bool {
        let Some(entry) = self.providers.get_mut(name) else {
            return false;
        };
        let Some(file_address) = entry.provider.symbol(symbol) else {
            return false;
        };
        entry.slide = observed as i64 - file_address as i64;
        true
    }

    /// The ASLR slide established for the provider named `name`, or `0`
    /// if it was never established (or the provider isn't registered).
    pub fn slide(&self, name: &str) -> i64 {
        self.providers.get(name).map_or(0, |entry| entry.slide)
    }

    /// Resolves `sym` under the provider named `name`, adjusted by that
    /// provider's ASLR slide.
    pub fn symbol(&self, name: &str, sym: &str) -> Option<u64> {
        let entry = self.providers.get(name)?;
        let file_address = entry.provider.symbol(sym)?;
        Some((file_address as i64 + entry.slide) as u64)
    }

    /// Resolves `(struct, member)` to a byte offset under the provider
    /// named `name`. Structure-member offsets are unaffected by ASLR.
    pub fn struct_offset(&self, name: &str, structure: &str, member: &str) -> Option<u64> {
        self.providers.get(name)?.provider.struct_offset(structure, member)
    }

    /// Resolves `struct` to a byte size under the provider named `name`.
    pub fn struct_size(&self, name: &str, structure: &str) -> Option<u64> {
        self.providers.get(name)?.provider.struct_size(structure)
    }

    /// Returns the provider registered under `name`, for symbolication of
    /// an address back to the nearest named symbol (UI use).
    pub fn find(&self, name: &str) -> Option<&dyn SymbolProvider> {
        self.providers.get(name).map(|entry| entry.provider.as_ref())
    }
}
