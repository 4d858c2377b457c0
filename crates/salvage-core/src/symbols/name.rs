//! Function and symbol names.

use std::fmt;

/// Programming language associated with a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolLanguage
{
    /// Rust symbol (detected via mangling or namespace patterns).
    Rust,
    /// C++ symbol (Itanium mangling without Rust extensions).
    Cpp,
    /// C symbol or unmangled global.
    C,
    /// Unknown or mixed language.
    Unknown,
}

impl fmt::Display for SymbolLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            SymbolLanguage::Rust => "rust",
            SymbolLanguage::Cpp => "c++",
            SymbolLanguage::C => "c",
            SymbolLanguage::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// A function or symbol name with demangling metadata.
///
/// Lookups by name accept the raw linkage name, the demangled name, or the
/// base name (last path component, without arguments), so `main`,
/// `demo::main` and `_ZN4demo4main17h0123456789abcdefE` all find the same
/// Rust function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    pub fn new(raw: String, demangled: Option<String>, language: SymbolLanguage) -> Self
    {
        Self {
            raw,
            demangled,
            language,
        }
    }

    /// A plain, unmangled C name.
    pub fn plain(name: impl Into<String>) -> Self
    {
        Self::new(name.into(), None, SymbolLanguage::C)
    }

    /// Raw (mangled) name emitted in the object file.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    /// Demangled human-friendly name if available.
    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// Preferred presentation (demangled fallback to raw).
    pub fn display_name(&self) -> &str
    {
        self.demangled.as_deref().unwrap_or(&self.raw)
    }

    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }

    /// Last `::`-separated component of the display name, without any
    /// argument list.
    pub fn base_name(&self) -> &str
    {
        let name = self.display_name();
        let name = name.split_once('(').map_or(name, |(head, _)| head);
        name.rsplit("::").next().unwrap_or(name)
    }

    pub fn matches(&self, query: &str) -> bool
    {
        self.raw == query || self.demangled.as_deref() == Some(query) || self.base_name() == query
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.display_name())
    }
}
