//! Symbol demangling utilities.
//!
//! Names reach the symbol tables from two places: `DW_AT_linkage_name` /
//! `DW_AT_name` attributes and the object file's symbol table. Both go
//! through [`make_symbol_name`] so that lookups see the same shape.
//!
//! ## Language Detection
//!
//! - Rust symbols: Start with `_R` or `_ZN`, or contain `::`
//! - C++ symbols: Start with `_Z` (Itanium mangling)
//! - Everything else is left as unknown

use rustc_demangle::try_demangle;

use crate::error::SalvageError;
use crate::symbols::name::{SymbolLanguage, SymbolName};

/// Create a `SymbolName` from a raw, possibly mangled, symbol string.
///
/// Rust names are demangled without the trailing hash so that
/// `demo::main` matches a lookup for that path.
pub(crate) fn make_symbol_name(raw: String) -> SymbolName
{
    let demangled = try_demangle(&raw).ok().map(|d| format!("{d:#}"));
    let language = if raw.starts_with("_R") || raw.starts_with("_ZN") || raw.contains("::") {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else {
        SymbolLanguage::Unknown
    };

    SymbolName::new(raw, demangled, language)
}

/// Wrap a gimli error with the step that produced it.
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> SalvageError
{
    SalvageError::Dwarf(format!("{context}: {err}"))
}
