//! Tests for loading in-memory core containers

use std::sync::{Arc, Mutex};

use salvage_core::core::header::{MH_DYLINKER, MH_EXECUTE, MH_MAGIC_64};
use salvage_core::core::{
    CoreContainer, CoreProcess, CoreSection, CorefilePreference, DynamicLoaderKind, ImageAddresses, KernelSearch,
    LoadOptions, ThreadContext, ThreadState,
};
use salvage_core::error::SalvageError;
use salvage_core::types::{Architecture, MemoryPermissions, ThreadId};

const X86_THREAD_STATE64: u32 = 4;

struct FakeCore
{
    sections: Vec<CoreSection>,
    threads: Vec<ThreadContext>,
    data: Vec<u8>,
}

impl CoreContainer for FakeCore
{
    fn sections(&self) -> &[CoreSection]
    {
        &self.sections
    }

    fn thread_context_count(&self) -> usize
    {
        self.threads.len()
    }

    fn thread_context(&self, index: usize) -> Option<&ThreadContext>
    {
        self.threads.get(index)
    }

    fn copy_data(&self, file_offset: u64, dest: &mut [u8]) -> usize
    {
        let Some(src) = self.data.get(file_offset as usize..) else {
            return 0;
        };
        let len = src.len().min(dest.len());
        dest[..len].copy_from_slice(&src[..len]);
        len
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn header_bytes(&self) -> &[u8]
    {
        &[]
    }
}

fn section(vm_addr: u64, vm_size: u64, file_offset: u64, permissions: MemoryPermissions) -> CoreSection
{
    CoreSection {
        name: "__DATA".to_string(),
        vm_addr,
        vm_size,
        file_offset,
        file_size: vm_size,
        permissions,
    }
}

/// An x86_64 thread state whose `rip` is `pc`.
fn thread_at(pc: u64) -> ThreadContext
{
    let mut words = vec![0u32; 42];
    words[32] = pc as u32;
    words[33] = (pc >> 32) as u32;
    ThreadContext {
        states: vec![ThreadState {
            flavor: X86_THREAD_STATE64,
            words,
        }],
    }
}

fn write_header(data: &mut [u8], offset: usize, filetype: u32)
{
    let words = [MH_MAGIC_64, 0x0100_0007, 3, filetype, 0, 0, 0];
    for (i, word) in words.iter().enumerate() {
        data[offset + i * 4..offset + i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
}

/// Four pages at 0x1000..0x5000 backed by the file in order.
fn four_page_core(headers: &[(usize, u32)]) -> FakeCore
{
    let mut data = vec![0u8; 0x4000];
    for &(page, filetype) in headers {
        write_header(&mut data, page * 0x1000, filetype);
    }
    FakeCore {
        sections: vec![section(0x1000, 0x4000, 0, MemoryPermissions::READABLE)],
        threads: vec![ThreadContext::default()],
        data,
    }
}

fn load(core: FakeCore, options: LoadOptions) -> CoreProcess
{
    let mut process = CoreProcess::new(Arc::new(core), options);
    process.load_core().unwrap();
    process
}

fn without_kernel_search(preference: CorefilePreference) -> LoadOptions
{
    LoadOptions {
        preference,
        kernel_search: None,
        ..LoadOptions::default()
    }
}

#[test]
fn test_end_to_end_two_section_core()
{
    let data: Vec<u8> = (0..0x2000u32).map(|i| (i % 251) as u8).collect();
    let core = FakeCore {
        sections: vec![
            section(0x1000, 0x1000, 0, MemoryPermissions::READABLE | MemoryPermissions::EXECUTABLE),
            section(0x2000, 0x1000, 0x1000, MemoryPermissions::empty()),
        ],
        threads: vec![thread_at(0x1800), thread_at(0x2800)],
        data: data.clone(),
    };
    let process = load(core, LoadOptions::default());

    assert_eq!(process.file_ranges().len(), 1);
    assert_eq!(process.permission_ranges().len(), 2);
    let second = process.permission_ranges().get(1).unwrap();
    assert_eq!(second.data, MemoryPermissions::READABLE | MemoryPermissions::EXECUTABLE);

    let mut buf = vec![0u8; 0x1000];
    assert_eq!(process.read_memory(0x1800, &mut buf).unwrap(), 0x1000);
    assert_eq!(&buf[..], &data[0x800..0x1800]);

    let threads = process.threads();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads.get(0).unwrap().id(), ThreadId(0));
    assert_eq!(threads.get(1).unwrap().id(), ThreadId(1));
    assert_eq!(threads.get(1).unwrap().registers().unwrap().pc.value(), 0x2800);
    assert_eq!(process.architecture(), Architecture::X86_64);
}

#[test]
fn test_read_stitches_discontiguous_file_ranges()
{
    let mut data = vec![0xaa; 0x1000];
    data.extend(vec![0x11; 0x1000]);
    data.extend(vec![0x22; 0x1000]);
    // 0x1000 maps file 0x2000, 0x2000 maps file 0x1000: contiguous in memory only.
    let core = FakeCore {
        sections: vec![
            section(0x1000, 0x1000, 0x2000, MemoryPermissions::READABLE),
            section(0x2000, 0x1000, 0x1000, MemoryPermissions::READABLE),
        ],
        threads: vec![ThreadContext::default()],
        data,
    };
    let process = load(core, without_kernel_search(CorefilePreference::UserProcess));

    assert_eq!(process.file_ranges().len(), 2);
    let mut buf = [0u8; 0x20];
    assert_eq!(process.read_memory(0x1ff0, &mut buf).unwrap(), 0x20);
    assert_eq!(&buf[..0x10], &[0x22; 0x10]);
    assert_eq!(&buf[0x10..], &[0x11; 0x10]);
}

#[test]
fn test_short_read_and_unmapped_read()
{
    let core = FakeCore {
        sections: vec![section(0x1000, 0x1000, 0, MemoryPermissions::READABLE)],
        threads: vec![ThreadContext::default()],
        data: vec![7; 0x1000],
    };
    let process = load(core, without_kernel_search(CorefilePreference::UserProcess));

    let mut buf = [0u8; 0x100];
    assert_eq!(process.read_memory(0x1f80, &mut buf).unwrap(), 0x80);
    assert!(matches!(
        process.read_memory(0x5000, &mut buf),
        Err(SalvageError::AddressNotMapped(0x5000))
    ));
}

#[test]
fn test_load_requires_threads_and_sections()
{
    let no_threads = FakeCore {
        sections: vec![section(0x1000, 0x1000, 0, MemoryPermissions::READABLE)],
        threads: Vec::new(),
        data: vec![0; 0x1000],
    };
    let mut process = CoreProcess::new(Arc::new(no_threads), LoadOptions::default());
    assert!(matches!(process.load_core(), Err(SalvageError::InvalidContainer(_))));

    let no_sections = FakeCore {
        sections: Vec::new(),
        threads: vec![ThreadContext::default()],
        data: Vec::new(),
    };
    let mut process = CoreProcess::new(Arc::new(no_sections), LoadOptions::default());
    assert!(matches!(process.load_core(), Err(SalvageError::InvalidContainer(_))));
}

#[test]
fn test_region_info_reports_gaps()
{
    let core = FakeCore {
        sections: vec![section(0x3000, 0x1000, 0, MemoryPermissions::READABLE)],
        threads: vec![ThreadContext::default()],
        data: vec![0; 0x1000],
    };
    let process = load(core, without_kernel_search(CorefilePreference::UserProcess));

    let gap = process.memory_region_info(0x1000).unwrap();
    assert!(!gap.mapped);
    assert_eq!(gap.end.value(), 0x3000);

    let mapped = process.memory_region_info(0x3100).unwrap();
    assert!(mapped.mapped);
    assert!(mapped.is_readable());

    assert!(matches!(process.memory_region_info(0x9000), Err(SalvageError::InvalidAddress(0x9000))));
}

#[test]
fn test_dyld_preferred_for_user_process()
{
    let process = load(
        four_page_core(&[(0, MH_DYLINKER), (2, MH_EXECUTE)]),
        without_kernel_search(CorefilePreference::UserProcess),
    );
    assert_eq!(
        process.image_addresses(),
        ImageAddresses {
            dyld: Some(0x1000),
            kernel: Some(0x3000),
        }
    );
    assert_eq!(process.dynamic_loader_kind(), DynamicLoaderKind::MacOsxDyld);
    assert_eq!(process.image_info_address(), Some(0x1000));

    let loader = process.dynamic_loader().unwrap();
    assert_eq!(loader.plugin_name(), "macosx-dyld");
    assert_eq!(loader.image_base(), 0x1000);
    assert_eq!(loader.image_header().filetype, MH_DYLINKER);
}

#[test]
fn test_kernel_preferred_when_asked()
{
    let process = load(
        four_page_core(&[(0, MH_DYLINKER), (2, MH_EXECUTE)]),
        without_kernel_search(CorefilePreference::Kernel),
    );
    assert_eq!(process.dynamic_loader_kind(), DynamicLoaderKind::DarwinKernel);
    assert_eq!(process.image_info_address(), Some(0x3000));
}

#[test]
fn test_preference_falls_back_to_the_other_image()
{
    let kernel_only = load(
        four_page_core(&[(1, MH_EXECUTE)]),
        without_kernel_search(CorefilePreference::UserProcess),
    );
    assert_eq!(kernel_only.dynamic_loader_kind(), DynamicLoaderKind::DarwinKernel);

    let dyld_only = load(four_page_core(&[(1, MH_DYLINKER)]), without_kernel_search(CorefilePreference::Kernel));
    assert_eq!(dyld_only.dynamic_loader_kind(), DynamicLoaderKind::MacOsxDyld);

    let neither = load(four_page_core(&[]), without_kernel_search(CorefilePreference::UserProcess));
    assert_eq!(neither.dynamic_loader_kind(), DynamicLoaderKind::None);
}

#[test]
fn test_last_header_of_a_kind_wins()
{
    let process = load(
        four_page_core(&[(0, MH_DYLINKER), (3, MH_DYLINKER)]),
        without_kernel_search(CorefilePreference::UserProcess),
    );
    assert_eq!(process.image_addresses().dyld, Some(0x4000));
}

struct RecordingSearch
{
    seen: Mutex<Vec<Option<u64>>>,
    answer: Option<u64>,
}

impl KernelSearch for RecordingSearch
{
    fn search_for_kernel(&self, process: &CoreProcess) -> Option<u64>
    {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(process.image_info_address());
        }
        self.answer
    }
}

#[test]
fn test_kernel_search_sees_hidden_addresses_and_restores_them()
{
    let search = Arc::new(RecordingSearch {
        seen: Mutex::new(Vec::new()),
        answer: Some(0x2000),
    });
    let options = LoadOptions {
        preference: CorefilePreference::Kernel,
        kernel_search: Some(search.clone()),
        ..LoadOptions::default()
    };
    let process = load(four_page_core(&[(0, MH_DYLINKER), (2, MH_EXECUTE)]), options);

    assert_eq!(*search.seen.lock().unwrap(), vec![None]);
    assert_eq!(process.image_addresses().dyld, Some(0x1000));
    assert_eq!(process.image_addresses().kernel, Some(0x2000));
}

#[test]
fn test_kernel_search_without_answer_keeps_scan_result()
{
    let search = Arc::new(RecordingSearch {
        seen: Mutex::new(Vec::new()),
        answer: None,
    });
    let options = LoadOptions {
        kernel_search: Some(search),
        ..LoadOptions::default()
    };
    let process = load(four_page_core(&[(2, MH_EXECUTE)]), options);
    assert_eq!(process.image_addresses().kernel, Some(0x3000));
}

#[test]
fn test_darwin_kernel_search_walks_down_from_thread_pc()
{
    let mut data = vec![0u8; 0x3000];
    write_header(&mut data, 0, MH_EXECUTE);
    write_header(&mut data, 0x2000, MH_EXECUTE);
    let core = FakeCore {
        sections: vec![section(0x10_0000, 0x3000, 0, MemoryPermissions::READABLE)],
        threads: vec![thread_at(0x10_1800)],
        data,
    };

    // the page scan settles on 0x102000; the search aligns thread 0's pc down
    let process = load(core, LoadOptions::default());
    assert_eq!(process.image_addresses().kernel, Some(0x10_0000));
    assert_eq!(process.threads().len(), 1);
}

#[test]
fn test_core_process_capabilities()
{
    let process = load(four_page_core(&[]), without_kernel_search(CorefilePreference::UserProcess));
    assert!(process.is_alive());
    assert!(!process.warn_before_detach());
    assert!(!process.can_jit());
    assert_eq!(process.plugin_name(), CoreProcess::PLUGIN_NAME);
}

#[test]
fn test_thread_list_is_built_once()
{
    let core = FakeCore {
        sections: vec![section(0x1000, 0x1000, 0, MemoryPermissions::READABLE)],
        threads: vec![thread_at(0x1010), thread_at(0x1020), thread_at(0x1030)],
        data: vec![0; 0x1000],
    };
    let process = load(core, without_kernel_search(CorefilePreference::UserProcess));

    let first = process.threads().clone();
    let mut refreshed = Default::default();
    assert!(process.update_thread_list(&first, &mut refreshed));
    assert_eq!(refreshed.len(), 3);
    for (a, b) in first.iter().zip(refreshed.iter()) {
        assert!(Arc::ptr_eq(a, b));
    }
}
