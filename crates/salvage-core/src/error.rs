//! # Error Types
//!
//! General error handling for core loading and source lookup.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Main error type for salvage operations
///
/// ## Error Categories
///
/// 1. **Container errors**: InvalidCoreModule, InvalidObjectFile, InvalidContainer, NoSections
/// 2. **Address errors**: AddressNotMapped, InvalidAddress
/// 3. **Lookup errors**: NotFound, AmbiguousMatch
/// 4. **Session errors**: NoTarget, NoModules, InvalidArgument
/// 5. **Debug info errors**: Dwarf, UnsupportedThreadState
/// 6. **I/O errors**: Io
///
/// Lookups that touch many items (every address of a function, every
/// module) do not fail on the first miss. They collect per-item messages as
/// warnings and only return an error when nothing at all was found.
#[derive(Error, Debug)]
pub enum SalvageError
{
    /// The core file could not be opened or read at all.
    #[error("invalid core module: {0}")]
    InvalidCoreModule(String),

    /// The file is not a Mach-O core, or its load commands are malformed.
    #[error("invalid core object file: {0}")]
    InvalidObjectFile(String),

    /// The container has no usable memory segments or thread state.
    ///
    /// This happens when:
    /// - the core has zero `LC_SEGMENT`/`LC_SEGMENT_64` records
    /// - the core has no `LC_THREAD` records, so there is no register state to debug
    #[error("invalid core container: {0}")]
    InvalidContainer(String),

    /// The Mach-O core parsed cleanly but contains no segments.
    #[error("core file has no sections")]
    NoSections,

    /// No mapped range contains the address.
    #[error("address 0x{0:x} is not mapped in the core file")]
    AddressNotMapped(u64),

    /// An address could not be resolved against any module.
    #[error("unable to resolve address 0x{0:x}")]
    InvalidAddress(u64),

    /// A file name matched several unrelated compile units.
    #[error("{0}")]
    AmbiguousMatch(String),

    /// A name, function, file or address had zero matches.
    #[error("{0}")]
    NotFound(String),

    /// The operation needs a target and none is selected.
    #[error("invalid target, load one with --image or --core")]
    NoTarget,

    /// No modules matched the module filter, or the target has no images.
    #[error("{0}")]
    NoModules(String),

    /// Invalid option value or argument combination
    ///
    /// Examples:
    /// - `--line 0`
    /// - `--end-line` smaller than `--line`
    /// - `--file` combined with `--name`
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No thread context in the core carries a register flavor we decode.
    #[error("unsupported thread state flavor in LC_THREAD")]
    UnsupportedThreadState,

    /// DWARF parsing failed while importing a module.
    #[error("DWARF error: {0}")]
    Dwarf(String),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, SalvageError>`
///
/// ```rust
/// use salvage_core::error::SalvageResult;
/// fn foo() -> SalvageResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type SalvageResult<T> = std::result::Result<T, SalvageError>;
