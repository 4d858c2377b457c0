//! # Symbols
//!
//! Modules, compile units, line tables, functions and the symbol contexts
//! that lookups return.
//!
//! Everything here works on *file* addresses. Translating load addresses
//! is done by [`crate::target::SectionLoadList`] before a lookup reaches a
//! module.
//!
//! ## Building modules
//!
//! [`Module::from_path`] imports a binary with `object` and `gimli`. Tests
//! and embedders can also assemble a module by hand:
//!
//! ```rust
//! use salvage_core::symbols::{AddressRange, CompileUnit, FileSpec, Function, LineEntry, LineTable, Module, SymbolName};
//! use salvage_core::types::Architecture;
//!
//! let file = FileSpec::new("/src/main.c");
//! let table = LineTable::new(vec![LineEntry::new(AddressRange::new(0x1000, 0x10), file.clone(), 3, 0)]);
//! let cu = CompileUnit::new(file, [], table)
//!     .with_function(Function::new(SymbolName::plain("main"), [AddressRange::new(0x1000, 0x10)]));
//! let module = Module::new(FileSpec::new("/bin/demo"), Architecture::X86_64).with_compile_unit(cu);
//!
//! let context = module.resolve_file_address(0x1004).unwrap();
//! assert_eq!(context.line_entry.map(|entry| entry.line), Some(3));
//! ```

pub mod compile_unit;
pub mod context;
mod demangle;
mod dwarf;
pub mod file_spec;
pub mod function;
pub mod line_table;
pub mod module;
pub mod name;

pub use compile_unit::CompileUnit;
pub use context::{SymbolContext, SymbolContextList};
pub use file_spec::FileSpec;
pub use function::{Function, InlinedBlock};
pub use line_table::{AddressRange, LineEntry, LineTable};
pub use module::{Module, ModuleList, ModuleSection, Symbol, SymbolKind};
pub use name::{SymbolLanguage, SymbolName};
