//! # salvage-core
//!
//! Post-mortem debugging primitives for Salvage.
//!
//! This crate provides:
//! - Mach-O core file loading: segment indexes, dynamic loader and kernel
//!   discovery, stitched memory reads and per-thread register state
//! - Symbol and line tables imported from DWARF
//! - The `source info` and `source list` lookups over a [`Target`]
//!
//! ## Layout
//!
//! - [`core`]: the core file process plug-in ([`CoreProcess`])
//! - [`range_index`]: sorted interval maps used by the loader
//! - [`symbols`]: modules, compile units, line tables, symbol contexts
//! - [`target`]: images, load slides and the source manager
//! - [`source`]: the source commands
//! - [`plugins`], [`dynamic_loader`]: the plug-in registry
//!
//! Nothing here needs `unsafe`; core files are plain data.

#![forbid(unsafe_code)]

pub mod core;
pub mod dynamic_loader;
pub mod error;
pub mod plugins;
pub mod prelude;
pub mod range_index;
pub mod source;
pub mod symbols;
pub mod target;
pub mod types;

pub use crate::core::{CoreProcess, LoadOptions};
// Re-export commonly used types
pub use error::{SalvageError, SalvageResult};
pub use target::Target;
pub use types::{Address, Architecture, Registers};
