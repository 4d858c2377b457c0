//! Common module for library exports

pub use crate::core::{CoreProcess, CorefilePreference, DynamicLoaderKind, LoadOptions};
pub use crate::error::{SalvageError, SalvageResult};
pub use crate::source::{source_info, source_list, CommandOutput, SourceInfoOptions, SourceListOptions};
pub use crate::symbols::{FileSpec, Module, ModuleList, SymbolContext};
pub use crate::target::Target;
pub use crate::types::address::Address;
pub use crate::types::process::{Architecture, MemoryRegion, ThreadId};
