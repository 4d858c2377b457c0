//! # Core Process
//!
//! Reconstructs a read-only process from a Mach-O core file.
//!
//! ## Lifecycle
//!
//! 1. [`CoreProcess::new`] wraps a [`CoreContainer`] (or
//!    [`CoreProcess::open`] reads one from disk).
//! 2. [`CoreProcess::load_core`] indexes the segments, finds the dynamic
//!    loader and kernel images and settles on the architecture.
//! 3. Memory reads, region queries and the thread list are served from the
//!    indexes built in step 2. Nothing is written back.
//!
//! ## Example
//!
//! ```rust,no_run
//! use salvage_core::core::{CoreProcess, LoadOptions};
//!
//! let mut process = CoreProcess::open("/cores/core.1234", LoadOptions::default())?;
//! process.load_core()?;
//! let mut buf = [0u8; 16];
//! let n = process.read_memory(0x1_0000_0000, &mut buf)?;
//! println!("read {n} bytes, {} threads", process.threads().len());
//! # Ok::<(), salvage_core::error::SalvageError>(())
//! ```

pub mod container;
pub mod header;
pub mod kernel;
pub mod macho;
pub mod memory;
pub mod threads;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info, trace};

pub use self::container::{CoreContainer, CoreSection, ThreadContext, ThreadState};
use self::header::{ImageKind, MachHeaderProbe, MACH_HEADER_SIZE};
pub use self::kernel::{DarwinKernelSearch, KernelSearch};
pub use self::macho::MachCoreFile;
use self::memory::CoreMemoryReader;
pub use self::threads::{CoreThread, ThreadList};
use crate::dynamic_loader::{DynamicLoader, DARWIN_KERNEL_PLUGIN_NAME, MACOSX_DYLD_PLUGIN_NAME};
use crate::error::{SalvageError, SalvageResult};
use crate::range_index::{FileRange, RangeEntry, RangeIndex};
use crate::types::{Address, Architecture, MemoryPermissions, MemoryRegion};

/// Stride of the image header scan.
pub const PAGE_SIZE: u64 = 0x1000;

/// Which image governs a core that maps both dyld and a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorefilePreference
{
    /// Prefer the user-space dynamic loader.
    #[default]
    UserProcess,
    /// Prefer the kernel.
    Kernel,
}

/// Dynamic loader chosen for the session.
///
/// Only the choice is recorded at load time; the loader object itself is
/// created on the first [`CoreProcess::dynamic_loader`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DynamicLoaderKind
{
    MacOsxDyld,
    DarwinKernel,
    #[default]
    None,
}

impl DynamicLoaderKind
{
    pub const fn plugin_name(self) -> Option<&'static str>
    {
        match self {
            DynamicLoaderKind::MacOsxDyld => Some(MACOSX_DYLD_PLUGIN_NAME),
            DynamicLoaderKind::DarwinKernel => Some(DARWIN_KERNEL_PLUGIN_NAME),
            DynamicLoaderKind::None => None,
        }
    }
}

/// Header addresses of the images found in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageAddresses
{
    pub dyld: Option<u64>,
    pub kernel: Option<u64>,
}

impl ImageAddresses
{
    fn is_complete(&self) -> bool
    {
        self.dyld.is_some() && self.kernel.is_some()
    }
}

/// Settings for [`CoreProcess::load_core`].
#[derive(Clone)]
pub struct LoadOptions
{
    pub preference: CorefilePreference,
    /// Refines a kernel address found by the page scan. `None` keeps the
    /// scan result.
    pub kernel_search: Option<Arc<dyn KernelSearch>>,
    /// Image addresses known before loading, e.g. from a crash report.
    /// The page scan only runs if one of them is missing.
    pub known_images: ImageAddresses,
}

impl Default for LoadOptions
{
    fn default() -> Self
    {
        Self {
            preference: CorefilePreference::UserProcess,
            kernel_search: Some(Arc::new(DarwinKernelSearch::default())),
            known_images: ImageAddresses::default(),
        }
    }
}

impl fmt::Debug for LoadOptions
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("LoadOptions")
            .field("preference", &self.preference)
            .field("kernel_search", &self.kernel_search.is_some())
            .field("known_images", &self.known_images)
            .finish()
    }
}

/// A process reconstructed from a core container.
pub struct CoreProcess
{
    container: Arc<dyn CoreContainer>,
    options: LoadOptions,
    core_aranges: RangeIndex<FileRange>,
    core_range_infos: RangeIndex<MemoryPermissions>,
    images: ImageAddresses,
    loader_kind: DynamicLoaderKind,
    architecture: Architecture,
    loaded: bool,
    threads: OnceCell<ThreadList>,
    dynamic_loader: OnceCell<Option<Box<dyn DynamicLoader>>>,
}

impl fmt::Debug for CoreProcess
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("CoreProcess")
            .field("architecture", &self.architecture)
            .field("images", &self.images)
            .field("loader_kind", &self.loader_kind)
            .field("ranges", &self.core_aranges.len())
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

impl CoreProcess
{
    pub const PLUGIN_NAME: &'static str = "mach-o-core";
    pub const PLUGIN_DESCRIPTION: &'static str = "Mach-O core file debugging plug-in.";

    pub fn new(container: Arc<dyn CoreContainer>, options: LoadOptions) -> Self
    {
        let architecture = container.architecture();
        let images = options.known_images;
        Self {
            container,
            options,
            core_aranges: RangeIndex::new(),
            core_range_infos: RangeIndex::new(),
            images,
            loader_kind: DynamicLoaderKind::None,
            architecture,
            loaded: false,
            threads: OnceCell::new(),
            dynamic_loader: OnceCell::new(),
        }
    }

    /// Open a Mach-O core file. The returned process is not loaded yet.
    ///
    /// ## Errors
    ///
    /// See [`MachCoreFile::open`].
    pub fn open(path: impl AsRef<Path>, options: LoadOptions) -> SalvageResult<Self>
    {
        let file = MachCoreFile::open(path)?;
        Ok(Self::new(Arc::new(file), options))
    }

    /// Cheap header check used before committing to a full parse.
    pub fn can_load(path: &Path) -> bool
    {
        macho::is_mach_core(path)
    }

    /// Process plug-in entry point: accepts only `MH_CORE` files.
    ///
    /// ## Errors
    ///
    /// Returns an error if the file sniffs as a core but fails to parse.
    pub fn create_instance(path: &Path, options: LoadOptions) -> SalvageResult<Option<Self>>
    {
        if !Self::can_load(path) {
            return Ok(None);
        }
        Self::open(path, options).map(Some)
    }

    pub fn plugin_name(&self) -> &'static str
    {
        Self::PLUGIN_NAME
    }

    /// Build the address-space indexes and pick the governing image.
    ///
    /// ## Errors
    ///
    /// [`SalvageError::InvalidContainer`] if the container has no thread
    /// contexts or no segments. Loading twice is a no-op.
    pub fn load_core(&mut self) -> SalvageResult<()>
    {
        if self.loaded {
            return Ok(());
        }

        if self.container.thread_context_count() == 0 {
            return Err(SalvageError::InvalidContainer(
                "core file doesn't contain any LC_THREAD load commands, or the LC_THREAD architecture is not supported"
                    .to_string(),
            ));
        }
        if self.container.sections().is_empty() {
            return Err(SalvageError::InvalidContainer("core file has no sections".to_string()));
        }

        self.index_sections();

        if !self.images.is_complete() {
            self.scan_for_images();
        }

        if self.images.kernel.is_some() {
            self.refine_kernel_address();
        }

        self.loader_kind = self.choose_dynamic_loader();

        let arch = self.container.architecture().normalized();
        if arch.is_valid() {
            self.architecture = arch;
        }

        self.loaded = true;
        info!(
            arch = %self.architecture,
            ranges = self.core_aranges.len(),
            dyld = format_args!("{:x?}", self.images.dyld),
            kernel = format_args!("{:x?}", self.images.kernel),
            loader = ?self.loader_kind,
            "core loaded"
        );
        Ok(())
    }

    fn index_sections(&mut self)
    {
        let container = Arc::clone(&self.container);
        for section in container.sections() {
            trace!(
                name = %section.name,
                vm_addr = format_args!("{:#x}", section.vm_addr),
                vm_size = format_args!("{:#x}", section.vm_size),
                file_offset = format_args!("{:#x}", section.file_offset),
                "LC_SEGMENT"
            );
            self.core_aranges.insert(RangeEntry::new(
                section.vm_addr,
                section.vm_size,
                FileRange::new(section.file_offset, section.file_size),
            ));
            self.core_range_infos.insert(RangeEntry::new(
                section.vm_addr,
                section.vm_size,
                MemoryPermissions::from_vm_prot(section.permissions.bits()),
            ));
        }

        if !self.core_aranges.is_sorted() {
            debug!("core segments out of order, sorting");
            self.core_aranges.sort();
        }
        if !self.core_range_infos.is_sorted() {
            self.core_range_infos.sort();
        }
    }

    /// Probe every mapped page for a dyld or kernel header.
    ///
    /// All pages are visited because a core may hold both images; later
    /// matches replace earlier ones of the same kind.
    fn scan_for_images(&mut self)
    {
        let mut found = self.images;
        let mut bytes = [0u8; MACH_HEADER_SIZE];

        for entry in &self.core_aranges {
            let mut addr = entry.base;
            while addr < entry.end() {
                if let Some(kind) = self.probe_image_at(addr, &mut bytes) {
                    debug!(addr = format_args!("{addr:#x}"), ?kind, "image header found");
                    match kind {
                        ImageKind::Dyld => found.dyld = Some(addr),
                        ImageKind::Kernel => found.kernel = Some(addr),
                    }
                }
                let Some(next) = addr.checked_add(PAGE_SIZE) else {
                    break;
                };
                addr = next;
            }
        }

        self.images = found;
    }

    fn probe_image_at(&self, addr: u64, bytes: &mut [u8; MACH_HEADER_SIZE]) -> Option<ImageKind>
    {
        match self.read_memory(addr, bytes) {
            Ok(MACH_HEADER_SIZE) => MachHeaderProbe::parse(&bytes[..])?.image_kind(),
            _ => None,
        }
    }

    fn refine_kernel_address(&mut self)
    {
        let Some(search) = self.options.kernel_search.clone() else {
            return;
        };
        let better = self.with_image_addresses_hidden(|process| search.search_for_kernel(process));
        if let Some(addr) = better {
            debug!(addr = format_args!("{addr:#x}"), "using kernel address from kernel search");
            self.images.kernel = Some(addr);
        }
    }

    /// Run `f` with both image addresses cleared, then put them back.
    ///
    /// Lets a kernel search see the process as if nothing had been found
    /// yet, so it runs its own heuristics instead of echoing the scan.
    pub fn with_image_addresses_hidden<R>(&mut self, f: impl FnOnce(&Self) -> R) -> R
    {
        let saved = std::mem::take(&mut self.images);
        let result = f(self);
        self.images = saved;
        result
    }

    fn choose_dynamic_loader(&self) -> DynamicLoaderKind
    {
        let ImageAddresses { dyld, kernel } = self.images;
        let kind = match self.options.preference {
            CorefilePreference::Kernel if kernel.is_some() => DynamicLoaderKind::DarwinKernel,
            CorefilePreference::Kernel if dyld.is_some() => DynamicLoaderKind::MacOsxDyld,
            CorefilePreference::UserProcess if dyld.is_some() => DynamicLoaderKind::MacOsxDyld,
            CorefilePreference::UserProcess if kernel.is_some() => DynamicLoaderKind::DarwinKernel,
            _ => DynamicLoaderKind::None,
        };
        debug!(?kind, preference = ?self.options.preference, "dynamic loader chosen");
        kind
    }

    /// Header address of the image that governs the session.
    ///
    /// Kernel first under [`CorefilePreference::Kernel`], dyld first
    /// otherwise.
    pub fn image_info_address(&self) -> Option<u64>
    {
        match self.options.preference {
            CorefilePreference::Kernel => self.images.kernel.or(self.images.dyld),
            CorefilePreference::UserProcess => self.images.dyld.or(self.images.kernel),
        }
    }

    pub fn image_addresses(&self) -> ImageAddresses
    {
        self.images
    }

    pub fn preference(&self) -> CorefilePreference
    {
        self.options.preference
    }

    pub fn dynamic_loader_kind(&self) -> DynamicLoaderKind
    {
        self.loader_kind
    }

    /// The dynamic loader for this session, created on first use.
    ///
    /// Uses the plug-in chosen during load, or asks every registered loader
    /// when none was chosen.
    pub fn dynamic_loader(&self) -> Option<&dyn DynamicLoader>
    {
        self.dynamic_loader
            .get_or_init(|| crate::plugins::find_dynamic_loader(self, self.loader_kind.plugin_name()))
            .as_deref()
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    pub fn is_loaded(&self) -> bool
    {
        self.loaded
    }

    /// A core is a snapshot; it never exits.
    pub fn is_alive(&self) -> bool
    {
        true
    }

    /// Detaching loses nothing, so there is nothing to warn about.
    pub fn warn_before_detach(&self) -> bool
    {
        false
    }

    /// Code cannot be run in a core.
    pub fn can_jit(&self) -> bool
    {
        false
    }

    pub fn container(&self) -> &dyn CoreContainer
    {
        self.container.as_ref()
    }

    /// Virtual address to file offset index.
    pub fn file_ranges(&self) -> &RangeIndex<FileRange>
    {
        &self.core_aranges
    }

    /// Virtual address to protection index.
    pub fn permission_ranges(&self) -> &RangeIndex<MemoryPermissions>
    {
        &self.core_range_infos
    }

    /// Read memory, stitching across segment boundaries.
    ///
    /// ## Errors
    ///
    /// [`SalvageError::AddressNotMapped`] when nothing at `addr` is mapped.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> SalvageResult<usize>
    {
        CoreMemoryReader::new(&self.core_aranges, self.container.as_ref()).read(addr, buf)
    }

    /// Describe the mapping at `addr`.
    ///
    /// Outside every segment but below a later one, the result is the
    /// unmapped gap up to that segment, with no permissions.
    ///
    /// ## Errors
    ///
    /// [`SalvageError::InvalidAddress`] past the last segment.
    pub fn memory_region_info(&self, addr: u64) -> SalvageResult<MemoryRegion>
    {
        let entry = self
            .core_range_infos
            .find_containing_or_following(addr)
            .ok_or(SalvageError::InvalidAddress(addr))?;

        if entry.contains(addr) {
            Ok(MemoryRegion {
                start: Address::new(entry.base),
                end: Address::new(entry.end()),
                permissions: entry.data,
                mapped: true,
            })
        } else {
            Ok(MemoryRegion {
                start: Address::new(addr),
                end: Address::new(entry.base),
                permissions: MemoryPermissions::empty(),
                mapped: false,
            })
        }
    }

    /// Mapped regions in address order.
    pub fn memory_regions(&self) -> impl Iterator<Item = MemoryRegion> + '_
    {
        self.core_range_infos.iter().map(|entry| MemoryRegion {
            start: Address::new(entry.base),
            end: Address::new(entry.end()),
            permissions: entry.data,
            mapped: true,
        })
    }

    /// Refresh `new_list` from `old_list`; see [`threads::update_thread_list`].
    pub fn update_thread_list(&self, old_list: &ThreadList, new_list: &mut ThreadList) -> bool
    {
        // One thread per context; a missing context decodes as unsupported.
        let contexts: Vec<ThreadContext> = (0..self.container.thread_context_count())
            .map(|index| self.container.thread_context(index).cloned().unwrap_or_default())
            .collect();
        threads::update_thread_list(&contexts, self.architecture, old_list, new_list)
    }

    /// The thread list, built on first call.
    pub fn threads(&self) -> &ThreadList
    {
        self.threads.get_or_init(|| {
            let mut list = ThreadList::default();
            self.update_thread_list(&ThreadList::default(), &mut list);
            debug!(count = list.len(), "core threads created");
            list
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    struct FakeCore
    {
        sections: Vec<CoreSection>,
        threads: Vec<ThreadContext>,
        /// Reported context count; may exceed the stored contexts.
        thread_count: usize,
        data: Vec<u8>,
    }

    impl FakeCore
    {
        fn new(sections: Vec<CoreSection>, threads: Vec<ThreadContext>, data: Vec<u8>) -> Self
        {
            Self {
                sections,
                thread_count: threads.len(),
                threads,
                data,
            }
        }
    }

    impl CoreContainer for FakeCore
    {
        fn sections(&self) -> &[CoreSection]
        {
            &self.sections
        }

        fn thread_context_count(&self) -> usize
        {
            self.thread_count
        }

        fn thread_context(&self, index: usize) -> Option<&ThreadContext>
        {
            self.threads.get(index)
        }

        fn copy_data(&self, file_offset: u64, dest: &mut [u8]) -> usize
        {
            let start = file_offset as usize;
            let Some(src) = self.data.get(start..) else {
                return 0;
            };
            let len = src.len().min(dest.len());
            dest[..len].copy_from_slice(&src[..len]);
            len
        }

        fn architecture(&self) -> Architecture
        {
            Architecture::I486
        }

        fn header_bytes(&self) -> &[u8]
        {
            &[]
        }
    }

    fn section(vm_addr: u64, file_offset: u64) -> CoreSection
    {
        CoreSection {
            name: String::new(),
            vm_addr,
            vm_size: 0x1000,
            file_offset,
            file_size: 0x1000,
            permissions: MemoryPermissions::READABLE,
        }
    }

    #[test]
    fn test_hidden_addresses_are_restored()
    {
        let core = FakeCore::new(vec![section(0x1000, 0)], vec![ThreadContext::default()], vec![0; 0x1000]);
        let mut process = CoreProcess::new(Arc::new(core), LoadOptions::default());
        process.images = ImageAddresses {
            dyld: Some(0x1000),
            kernel: Some(0x2000),
        };

        let seen = process.with_image_addresses_hidden(|p| p.image_info_address());
        assert_eq!(seen, None);
        assert_eq!(process.images.dyld, Some(0x1000));
        assert_eq!(process.images.kernel, Some(0x2000));
    }

    #[test]
    fn test_i486_normalized_to_i386()
    {
        let core = FakeCore::new(vec![section(0x1000, 0)], vec![ThreadContext::default()], vec![0; 0x1000]);
        let mut process = CoreProcess::new(Arc::new(core), LoadOptions::default());
        process.load_core().unwrap();
        assert_eq!(process.architecture(), Architecture::I386);
        assert_eq!(process.dynamic_loader_kind(), DynamicLoaderKind::None);
    }

    #[test]
    fn test_kernel_search_leaves_thread_list_unbuilt()
    {
        // i386 thread state with eip inside the kernel's first page
        let mut words = vec![0u32; 16];
        words[10] = 0x10_0800;
        let thread = ThreadContext {
            states: vec![ThreadState { flavor: 1, words }],
        };
        let mut data = vec![0u8; 0x1000];
        for (i, word) in [0xfeed_facf_u32, 7, 3, 2, 0, 0, 0].iter().enumerate() {
            data[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        let core = FakeCore::new(vec![section(0x10_0000, 0)], vec![thread], data);

        let mut process = CoreProcess::new(Arc::new(core), LoadOptions::default());
        process.load_core().unwrap();
        assert_eq!(process.images.kernel, Some(0x10_0000));
        assert!(process.threads.get().is_none());

        let threads = process.threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads.get(0).map(|t| t.registers().unwrap().pc.value()), Some(0x10_0800));
    }

    #[test]
    fn test_one_thread_per_reported_context()
    {
        let mut core = FakeCore::new(vec![section(0x1000, 0)], vec![ThreadContext::default()], vec![0; 0x1000]);
        core.thread_count = 3;
        let mut process = CoreProcess::new(Arc::new(core), LoadOptions::default());
        process.load_core().unwrap();

        let threads = process.threads();
        let ids: Vec<u64> = threads.iter().map(|t| t.id().raw()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(matches!(threads.get(2).map(|t| t.registers()), Some(Err(SalvageError::UnsupportedThreadState))));
    }
}
