//! # Source lookups
//!
//! `source info` and `source list`: find the line-table rows for an
//! address, a function name or a file name and render them.
//!
//! Both commands take a [`Target`](crate::target::Target) and an options
//! struct and return a [`CommandOutput`]. Failures that affect only one
//! item of a multi-item lookup (one address of a function, one `--shlib`
//! filter) are collected as warnings; the command only fails when nothing
//! at all could be shown.
//!
//! ## Example
//!
//! ```rust
//! use salvage_core::source::{source_info, SourceInfoOptions};
//! use salvage_core::symbols::{AddressRange, CompileUnit, FileSpec, Function, LineEntry, LineTable, Module, SymbolName};
//! use salvage_core::target::Target;
//! use salvage_core::types::Architecture;
//!
//! let file = FileSpec::new("/src/main.c");
//! let table = LineTable::new(vec![LineEntry::new(AddressRange::new(0x1000, 0x8), file.clone(), 3, 0)]);
//! let cu = CompileUnit::new(file, [], table)
//!     .with_function(Function::new(SymbolName::plain("main"), [AddressRange::new(0x1000, 0x8)]));
//!
//! let mut target = Target::new();
//! target.add_image(Module::new(FileSpec::new("/bin/demo"), Architecture::X86_64).with_compile_unit(cu));
//!
//! let options = SourceInfoOptions { name: Some("main".into()), ..Default::default() };
//! let output = source_info(&target, &options).unwrap();
//! assert_eq!(
//!     output.output,
//!     "Lines found in module `demo\n[0x0000000000001000-0x0000000000001008): /src/main.c:3\n"
//! );
//! ```

pub mod info;
pub mod list;
pub mod manager;

use tracing::warn;

pub use info::{source_info, SourceInfoOptions};
pub use list::{repeat_command, source_list, window_for_function, SourceInfo, SourceListOptions};
pub use manager::{BreakpointLines, SourceFile, SourceManager};

use crate::symbols::Module;
use crate::types::Address;

/// Text produced by a source command, plus the per-item problems that did
/// not fail it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput
{
    pub output: String,
    pub warnings: Vec<String>,
}

impl CommandOutput
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub(crate) fn warn(&mut self, message: String)
    {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// `module[0x...]`: a file address qualified by its module.
pub(crate) fn describe_module_address(module: &Module, file_address: u64, byte_size: u8) -> String
{
    format!("{}[{}]", module.name(), Address::new(file_address).to_string_width(byte_size))
}
