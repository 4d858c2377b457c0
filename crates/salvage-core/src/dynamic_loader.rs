//! Dynamic loader strategies for core sessions.
//!
//! A loader takes the image base address the core loader settled on and
//! owns the knowledge of how to walk that image's list of loaded binaries.
//! Walking the lists is outside this crate; the loaders here validate the
//! base and expose the header they found.

use std::fmt;

use crate::core::header::{ImageKind, MachHeaderProbe, MACH_HEADER_SIZE};
use crate::core::CoreProcess;

pub const MACOSX_DYLD_PLUGIN_NAME: &str = "macosx-dyld";
pub const DARWIN_KERNEL_PLUGIN_NAME: &str = "darwin-kernel";

/// A dynamic loader bound to one process.
pub trait DynamicLoader: Send + Sync + fmt::Debug
{
    fn plugin_name(&self) -> &'static str;

    /// Address of the governing image's `mach_header`.
    fn image_base(&self) -> u64;

    fn image_header(&self) -> &MachHeaderProbe;
}

fn probe_image(process: &CoreProcess, kind: ImageKind) -> Option<(u64, MachHeaderProbe)>
{
    let base = process.image_info_address()?;
    let mut bytes = [0u8; MACH_HEADER_SIZE];
    if process.read_memory(base, &mut bytes).ok()? != MACH_HEADER_SIZE {
        return None;
    }
    let header = MachHeaderProbe::parse(&bytes)?;
    (header.image_kind() == Some(kind)).then_some((base, header))
}

/// User-process loader anchored at dyld's header.
#[derive(Debug, Clone)]
pub struct MacOsxDyld
{
    base: u64,
    header: MachHeaderProbe,
}

impl MacOsxDyld
{
    pub const DESCRIPTION: &'static str = "Dynamic loader plug-in that watches for shared library loads/unloads in MacOSX user processes.";

    /// Bind to `process` if its image-info address holds a dyld header.
    pub fn create(process: &CoreProcess) -> Option<Box<dyn DynamicLoader>>
    {
        let (base, header) = probe_image(process, ImageKind::Dyld)?;
        Some(Box::new(Self { base, header }))
    }
}

impl DynamicLoader for MacOsxDyld
{
    fn plugin_name(&self) -> &'static str
    {
        MACOSX_DYLD_PLUGIN_NAME
    }

    fn image_base(&self) -> u64
    {
        self.base
    }

    fn image_header(&self) -> &MachHeaderProbe
    {
        &self.header
    }
}

/// Kernel loader anchored at the kernel's header.
#[derive(Debug, Clone)]
pub struct DarwinKernel
{
    base: u64,
    header: MachHeaderProbe,
}

impl DarwinKernel
{
    pub const DESCRIPTION: &'static str = "Dynamic loader plug-in that watches for shared library loads/unloads in the MacOSX kernel.";

    pub fn create(process: &CoreProcess) -> Option<Box<dyn DynamicLoader>>
    {
        let (base, header) = probe_image(process, ImageKind::Kernel)?;
        Some(Box::new(Self { base, header }))
    }
}

impl DynamicLoader for DarwinKernel
{
    fn plugin_name(&self) -> &'static str
    {
        DARWIN_KERNEL_PLUGIN_NAME
    }

    fn image_base(&self) -> u64
    {
        self.base
    }

    fn image_header(&self) -> &MachHeaderProbe
    {
        &self.header
    }
}
