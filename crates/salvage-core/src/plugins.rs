//! # Plug-in Registry
//!
//! Process-wide table of process and dynamic-loader plug-ins.
//!
//! The built-in plug-ins are registered by [`initialize`], which runs its
//! body at most once no matter how many threads call it. Registering a name
//! that is already present is a no-op, so callers can register their own
//! plug-ins before or after initialisation without duplicates.

use std::path::Path;
use std::sync::{Once, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::core::{CoreProcess, LoadOptions};
use crate::dynamic_loader::{
    DarwinKernel, DynamicLoader, MacOsxDyld, DARWIN_KERNEL_PLUGIN_NAME, MACOSX_DYLD_PLUGIN_NAME,
};
use crate::error::{SalvageError, SalvageResult};

/// Creates a process for a core file, or returns `Ok(None)` when the file
/// is not one this plug-in handles.
pub type ProcessCreateFn = fn(&Path, LoadOptions) -> SalvageResult<Option<CoreProcess>>;

/// Creates a dynamic loader for a loaded core process.
pub type DynamicLoaderCreateFn = fn(&CoreProcess) -> Option<Box<dyn DynamicLoader>>;

#[derive(Debug, Clone, Copy)]
pub struct PluginInfo<F>
{
    pub name: &'static str,
    pub description: &'static str,
    pub create: F,
}

pub type ProcessPlugin = PluginInfo<ProcessCreateFn>;
pub type DynamicLoaderPlugin = PluginInfo<DynamicLoaderCreateFn>;

#[derive(Default)]
struct Registry
{
    processes: Vec<ProcessPlugin>,
    loaders: Vec<DynamicLoaderPlugin>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::default()));
static BUILTINS: Once = Once::new();

/// Register the built-in plug-ins.
pub fn initialize()
{
    BUILTINS.call_once(|| {
        register_process_plugin(PluginInfo {
            name: CoreProcess::PLUGIN_NAME,
            description: CoreProcess::PLUGIN_DESCRIPTION,
            create: CoreProcess::create_instance,
        });
        register_dynamic_loader_plugin(PluginInfo {
            name: MACOSX_DYLD_PLUGIN_NAME,
            description: MacOsxDyld::DESCRIPTION,
            create: MacOsxDyld::create,
        });
        register_dynamic_loader_plugin(PluginInfo {
            name: DARWIN_KERNEL_PLUGIN_NAME,
            description: DarwinKernel::DESCRIPTION,
            create: DarwinKernel::create,
        });
    });
}

/// Add a process plug-in. Returns false if the name is taken.
pub fn register_process_plugin(plugin: ProcessPlugin) -> bool
{
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if registry.processes.iter().any(|p| p.name == plugin.name) {
        return false;
    }
    debug!(name = plugin.name, "registered process plug-in");
    registry.processes.push(plugin);
    true
}

/// Add a dynamic loader plug-in. Returns false if the name is taken.
pub fn register_dynamic_loader_plugin(plugin: DynamicLoaderPlugin) -> bool
{
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if registry.loaders.iter().any(|p| p.name == plugin.name) {
        return false;
    }
    debug!(name = plugin.name, "registered dynamic loader plug-in");
    registry.loaders.push(plugin);
    true
}

pub fn process_plugins() -> Vec<ProcessPlugin>
{
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).processes.clone()
}

pub fn dynamic_loader_plugins() -> Vec<DynamicLoaderPlugin>
{
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).loaders.clone()
}

pub fn find_dynamic_loader_plugin(name: &str) -> Option<DynamicLoaderPlugin>
{
    dynamic_loader_plugins().into_iter().find(|p| p.name == name)
}

/// Instantiate a dynamic loader for `process`.
///
/// With a name, only that plug-in is tried. Without one, every registered
/// loader is asked in registration order and the first to accept wins.
pub fn find_dynamic_loader(process: &CoreProcess, name: Option<&str>) -> Option<Box<dyn DynamicLoader>>
{
    initialize();
    match name {
        Some(name) => find_dynamic_loader_plugin(name).and_then(|plugin| (plugin.create)(process)),
        None => dynamic_loader_plugins()
            .into_iter()
            .find_map(|plugin| (plugin.create)(process)),
    }
}

/// Create a process for the core file at `path` with the first plug-in
/// that accepts it. The process is not loaded yet.
///
/// ## Errors
///
/// Propagates the accepting plug-in's error, or returns
/// [`SalvageError::InvalidObjectFile`] when no plug-in accepts the file.
pub fn create_process_for_core(path: &Path, options: &LoadOptions) -> SalvageResult<CoreProcess>
{
    initialize();
    for plugin in process_plugins() {
        if let Some(process) = (plugin.create)(path, options.clone())? {
            debug!(plugin = plugin.name, path = %path.display(), "process plug-in accepted core");
            return Ok(process);
        }
    }
    Err(SalvageError::InvalidObjectFile(format!(
        "{}: no process plug-in can load this file",
        path.display()
    )))
}
