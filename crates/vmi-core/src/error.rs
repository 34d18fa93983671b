use crate::Va;

/// An error that can occur while driving the debug plane or reasoning about
/// guest memory.
///
/// Distinguishes transport failure, translation miss, symbol miss,
/// validation miss, and guest-shape surprise so callers can tell "the
/// plane refused the call" from "the guest's data structures didn't look
/// like we expected".
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A call into the debug plane failed (transport failure).
    #[error("debug plane call failed: {0}")]
    Plane(&'static str),

    /// A virtual-to-physical translation failed for the given address.
    #[error("translation miss at {0}")]
    Translation(Va),

    /// A required symbol or structure-member offset could not be resolved.
    #[error("unable to resolve {provider}!{item}")]
    SymbolMiss {
        /// The provider name the lookup was attempted against (e.g.
        /// `"kernel_struct"`, `"kernel_sym"`).
        provider: &'static str,
        /// The symbol or `struct.member` description that failed to
        /// resolve.
        item: String,
    },

    /// Setup could not validate a banner candidate or otherwise establish a
    /// consistent view of the guest kernel.
    #[error("setup validation failed: {0}")]
    Validation(&'static str),

    /// An I/O error occurred while loading symbol files.
    #[error("symbol file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `LINUX_SYMBOL_PATH` was not set or otherwise misconfigured.
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    /// An error surfaced by a symbol provider implementation.
    #[error(transparent)]
    Provider(Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Creates a [`EngineError::SymbolMiss`] for a missing symbol.
    pub fn missing_symbol(provider: &'static str, name: impl Into<String>) -> Self {
        Self::SymbolMiss {
            provider,
            item: name.into(),
        }
    }

    /// Creates a [`EngineError::SymbolMiss`] for a missing structure-member
    /// offset.
    pub fn missing_offset(provider: &'static str, structure: &str, member: &str) -> Self {
        Self::SymbolMiss {
            provider,
            item: format!("{structure}.{member}"),
        }
    }
}
