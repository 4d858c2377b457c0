//! # Types
//!
//! Small value types shared by the core loader and the source resolver.

pub mod address;
pub mod permissions;
pub mod process;
pub mod registers;

// Re-export all public types
pub use address::Address;
pub use permissions::MemoryPermissions;
pub use process::{Architecture, MemoryRegion, ThreadId};
pub use registers::Registers;
