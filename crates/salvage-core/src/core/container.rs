//! The parsed core container seen by the loader.

use crate::types::{Architecture, MemoryPermissions};

/// One memory segment recorded in the core.
///
/// `vm_size` is the mapped size; `file_size` is how much of it is backed by
/// bytes in the file (it may be smaller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSection
{
    pub name: String,
    pub vm_addr: u64,
    pub vm_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    /// Protection as recorded, possibly empty.
    pub permissions: MemoryPermissions,
}

/// One `flavor`/`count`/`state` triple from an `LC_THREAD` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadState
{
    pub flavor: u32,
    pub words: Vec<u32>,
}

/// Captured register state of one thread.
///
/// A context is opaque to the loader; only [`crate::core::CoreThread`]
/// decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadContext
{
    pub states: Vec<ThreadState>,
}

/// Source of segments, thread contexts and raw bytes for a core session.
///
/// [`super::MachCoreFile`] implements this over a Mach-O file. Tests build
/// in-memory containers.
pub trait CoreContainer: Send + Sync
{
    /// Segments in load-command order.
    fn sections(&self) -> &[CoreSection];

    fn thread_context_count(&self) -> usize;

    fn thread_context(&self, index: usize) -> Option<&ThreadContext>;

    /// Copy bytes starting at `file_offset` into `dest`.
    ///
    /// Returns the number of bytes copied, which is short (or zero) when the
    /// file ends first.
    fn copy_data(&self, file_offset: u64, dest: &mut [u8]) -> usize;

    /// Architecture recorded in the container header.
    fn architecture(&self) -> Architecture;

    /// The container's own `mach_header` bytes.
    fn header_bytes(&self) -> &[u8];
}
