//! # Target
//!
//! A debugging target: the images whose symbols we search, where those
//! images sit in memory, and optionally the core file being inspected.
//!
//! ## Load layout
//!
//! Images added with [`Target::add_image`] are not placed anywhere; address
//! lookups treat addresses as file addresses and search every image.
//! Once at least one image is placed with [`Target::add_image_at`], the
//! [`SectionLoadList`] is active and addresses are load addresses that map
//! to exactly one image.

use std::path::Path;
use std::ptr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{CoreProcess, LoadOptions};
use crate::error::SalvageResult;
use crate::plugins;
use crate::source::manager::SourceManager;
use crate::symbols::{Module, ModuleList, SymbolContext};
use crate::types::Architecture;

/// Load slides of the placed images.
#[derive(Debug, Clone, Default)]
pub struct SectionLoadList
{
    loaded: Vec<(Arc<Module>, u64)>,
}

impl SectionLoadList
{
    pub fn new() -> Self
    {
        Self { loaded: Vec::new() }
    }

    pub fn is_empty(&self) -> bool
    {
        self.loaded.is_empty()
    }

    /// Place `module` so that its image header is at `load_address`.
    pub fn set_load_address(&mut self, module: Arc<Module>, load_address: u64)
    {
        let slide = load_address.wrapping_sub(module.base_address());
        self.loaded.retain(|(loaded, _)| !ptr::eq(loaded.as_ref(), module.as_ref()));
        self.loaded.push((module, slide));
    }

    /// Slide of `module`, if it is placed. Load address = file address + slide
    /// (wrapping).
    pub fn slide_for(&self, module: &Module) -> Option<u64>
    {
        self.loaded
            .iter()
            .find(|(loaded, _)| ptr::eq(loaded.as_ref(), module))
            .map(|(_, slide)| *slide)
    }

    pub fn load_address(&self, module: &Module, file_address: u64) -> Option<u64>
    {
        self.slide_for(module).map(|slide| file_address.wrapping_add(slide))
    }

    /// Module and file address for a load address.
    pub fn resolve_load_address(&self, load_address: u64) -> Option<(&Arc<Module>, u64)>
    {
        self.loaded.iter().find_map(|(module, slide)| {
            let file_address = load_address.wrapping_sub(*slide);
            module
                .contains_file_address(file_address)
                .then_some((module, file_address))
        })
    }
}

/// Images, load layout, source display state and an optional core.
#[derive(Debug, Default)]
pub struct Target
{
    pub(crate) images: ModuleList,
    pub(crate) section_load_list: SectionLoadList,
    pub(crate) architecture: Option<Architecture>,
    pub(crate) source_manager: SourceManager,
    pub(crate) process: Option<CoreProcess>,
}

impl Target
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Add an image without placing it. The first image sets the
    /// architecture unless a core already did.
    pub fn add_image(&mut self, module: Module) -> Arc<Module>
    {
        if self.architecture.is_none() && module.architecture().is_valid() {
            self.architecture = Some(module.architecture());
        }
        let module = Arc::new(module);
        debug!(module = module.name(), "added image");
        self.images.append(module.clone());
        module
    }

    /// Add an image whose header sits at `load_address`.
    pub fn add_image_at(&mut self, module: Module, load_address: u64) -> Arc<Module>
    {
        let module = self.add_image(module);
        self.section_load_list.set_load_address(module.clone(), load_address);
        debug!(
            module = module.name(),
            load_address = format_args!("{load_address:#x}"),
            "placed image"
        );
        module
    }

    /// Load the image at `path`, placed at `load_address` when given.
    pub fn load_image(&mut self, path: impl AsRef<Path>, load_address: Option<u64>) -> SalvageResult<Arc<Module>>
    {
        let module = Module::from_path(path)?;
        Ok(match load_address {
            Some(addr) => self.add_image_at(module, addr),
            None => self.add_image(module),
        })
    }

    /// Open and load a core file through the process plug-ins and adopt its
    /// architecture.
    pub fn load_core(&mut self, path: impl AsRef<Path>, options: &LoadOptions) -> SalvageResult<&CoreProcess>
    {
        let path = path.as_ref();
        let mut process = plugins::create_process_for_core(path, options)?;
        process.load_core()?;
        self.set_architecture(process.architecture());
        info!(path = %path.display(), arch = %process.architecture(), "core loaded");
        Ok(self.process.insert(process))
    }

    pub fn images(&self) -> &ModuleList
    {
        &self.images
    }

    pub fn section_load_list(&self) -> &SectionLoadList
    {
        &self.section_load_list
    }

    pub fn architecture(&self) -> Option<Architecture>
    {
        self.architecture
    }

    pub fn set_architecture(&mut self, architecture: Architecture)
    {
        self.architecture = Some(architecture);
    }

    pub fn address_byte_size(&self) -> u8
    {
        self.architecture.map_or(8, Architecture::address_byte_size)
    }

    pub fn source_manager(&self) -> &SourceManager
    {
        &self.source_manager
    }

    pub fn source_manager_mut(&mut self) -> &mut SourceManager
    {
        &mut self.source_manager
    }

    pub fn process(&self) -> Option<&CoreProcess>
    {
        self.process.as_ref()
    }

    /// PC of the first thread of the core, standing in for the selected
    /// frame.
    pub fn selected_frame_pc(&self) -> Option<u64>
    {
        let process = self.process.as_ref()?;
        let thread = process.threads().get(0)?;
        thread.registers().ok().map(|registers| registers.pc.value())
    }

    /// Resolve an address the way the current layout dictates: a load
    /// address when images are placed, else a file address in the first
    /// image containing it.
    pub fn resolve_address(&self, addr: u64) -> Option<SymbolContext<'_>>
    {
        if self.section_load_list.is_empty() {
            return self.images.iter().find_map(|module| module.resolve_file_address(addr));
        }
        let (module, file_address) = self.section_load_list.resolve_load_address(addr)?;
        module.resolve_file_address(file_address)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::{AddressRange, FileSpec};

    fn module(name: &str, base: u64) -> Module
    {
        let mut module = Module::new(FileSpec::new(name), Architecture::Arm64);
        module.set_base_address(base);
        module.add_section("__text", AddressRange::new(base + 0x1000, 0x1000));
        module
    }

    #[test]
    fn test_load_address_round_trip_with_slide()
    {
        let mut target = Target::new();
        let module = target.add_image_at(module("/bin/demo", 0x1_0000_0000), 0x1_0400_0000);
        let list = target.section_load_list();
        assert_eq!(list.slide_for(&module), Some(0x400_0000));
        assert_eq!(list.load_address(&module, 0x1_0000_1010), Some(0x1_0400_1010));
        let (resolved, file_address) = list.resolve_load_address(0x1_0400_1010).unwrap();
        assert!(ptr::eq(resolved.as_ref(), module.as_ref()));
        assert_eq!(file_address, 0x1_0000_1010);
        assert!(list.resolve_load_address(0x1_0000_1010).is_none());
    }

    #[test]
    fn test_negative_slide()
    {
        let mut list = SectionLoadList::new();
        let module = Arc::new(module("/usr/lib/libfoo.dylib", 0x8000));
        list.set_load_address(module.clone(), 0x4000);
        assert_eq!(list.load_address(&module, 0x9000), Some(0x5000));
        assert_eq!(list.resolve_load_address(0x5000).map(|(_, addr)| addr), Some(0x9000));
    }

    #[test]
    fn test_first_image_sets_architecture()
    {
        let mut target = Target::new();
        assert_eq!(target.address_byte_size(), 8);
        target.add_image(module("/bin/demo", 0));
        assert_eq!(target.architecture(), Some(Architecture::Arm64));
        assert!(target.section_load_list().is_empty());
    }
}
