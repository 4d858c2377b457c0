//! Threads rebuilt from `LC_THREAD` contexts.
//!
//! A core's thread set never changes, so the list is populated once and
//! every later refresh hands back the same thread objects.

use std::sync::Arc;

use super::container::{ThreadContext, ThreadState};
use crate::error::{SalvageError, SalvageResult};
use crate::types::{Architecture, Registers, ThreadId};

// <mach/i386/thread_status.h>, <mach/arm/thread_status.h>
const X86_THREAD_STATE32: u32 = 1;
const X86_THREAD_STATE64: u32 = 4;
const X86_THREAD_STATE: u32 = 7;
const ARM_THREAD_STATE: u32 = 1;
const ARM_THREAD_STATE64: u32 = 6;

/// A thread of the crashed process, identified by its context index.
#[derive(Debug)]
pub struct CoreThread
{
    id: ThreadId,
    architecture: Architecture,
    context: ThreadContext,
}

impl CoreThread
{
    pub fn new(id: ThreadId, architecture: Architecture, context: ThreadContext) -> Self
    {
        Self {
            id,
            architecture,
            context,
        }
    }

    pub fn id(&self) -> ThreadId
    {
        self.id
    }

    pub fn context(&self) -> &ThreadContext
    {
        &self.context
    }

    /// Decode the general-purpose register state.
    ///
    /// The first state whose flavor matches the architecture wins; the
    /// remaining flavors (float, exception) are ignored.
    ///
    /// ## Errors
    ///
    /// [`SalvageError::UnsupportedThreadState`] when no state can be decoded.
    pub fn registers(&self) -> SalvageResult<Registers>
    {
        decode_registers(self.architecture, &self.context)
    }
}

/// Decode the general-purpose registers of a raw context without building
/// a thread.
///
/// ## Errors
///
/// [`SalvageError::UnsupportedThreadState`] when no state can be decoded.
pub fn decode_registers(architecture: Architecture, context: &ThreadContext) -> SalvageResult<Registers>
{
    context
        .states
        .iter()
        .find_map(|state| decode_state(architecture, state))
        .ok_or(SalvageError::UnsupportedThreadState)
}

fn words_to_u64(words: &[u32]) -> Vec<u64>
{
    words
        .chunks_exact(2)
        .map(|pair| u64::from(pair[0]) | (u64::from(pair[1]) << 32))
        .collect()
}

fn decode_state(architecture: Architecture, state: &ThreadState) -> Option<Registers>
{
    match (architecture, state.flavor) {
        (Architecture::X86_64, X86_THREAD_STATE64) => {
            Some(Registers::from_values(Architecture::X86_64, words_to_u64(&state.words)))
        }
        (Architecture::X86_64, X86_THREAD_STATE) => {
            // x86_state_hdr_t { flavor, count } followed by the wrapped state
            let (&inner, rest) = state.words.split_first()?;
            let (_, words) = rest.split_first()?;
            (inner == X86_THREAD_STATE64)
                .then(|| Registers::from_values(Architecture::X86_64, words_to_u64(words)))
        }
        (Architecture::I386 | Architecture::I486, X86_THREAD_STATE32) => Some(Registers::from_values(
            Architecture::I386,
            state.words.iter().copied().map(u64::from).collect(),
        )),
        (Architecture::Arm64, ARM_THREAD_STATE64) => {
            // x0-x28, fp, lr, sp, pc are 64-bit; cpsr is the trailing 32-bit word.
            let (wide, tail) = state.words.split_at(state.words.len().min(66));
            let mut values = words_to_u64(wide);
            values.push(tail.first().copied().map_or(0, u64::from));
            Some(Registers::from_values(Architecture::Arm64, values))
        }
        (Architecture::Arm, ARM_THREAD_STATE) => Some(Registers::from_values(
            Architecture::Arm,
            state.words.iter().copied().map(u64::from).collect(),
        )),
        _ => None,
    }
}

/// Ordered list of shared thread handles.
#[derive(Debug, Clone, Default)]
pub struct ThreadList
{
    threads: Vec<Arc<CoreThread>>,
}

impl ThreadList
{
    pub fn add(&mut self, thread: Arc<CoreThread>)
    {
        self.threads.push(thread);
    }

    pub fn len(&self) -> usize
    {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.threads.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<CoreThread>>
    {
        self.threads.get(index)
    }

    pub fn find(&self, id: ThreadId) -> Option<&Arc<CoreThread>>
    {
        self.threads.iter().find(|thread| thread.id() == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<CoreThread>>
    {
        self.threads.iter()
    }
}

impl<'a> IntoIterator for &'a ThreadList
{
    type Item = &'a Arc<CoreThread>;
    type IntoIter = std::slice::Iter<'a, Arc<CoreThread>>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.threads.iter()
    }
}

/// Fill `new_list` from the container contexts or from `old_list`.
///
/// When `old_list` is empty one thread is created per context, numbered from
/// zero. Otherwise the existing threads are carried over unchanged. Returns
/// whether `new_list` ended up non-empty.
pub fn update_thread_list(
    contexts: &[ThreadContext],
    architecture: Architecture,
    old_list: &ThreadList,
    new_list: &mut ThreadList,
) -> bool
{
    if old_list.is_empty() {
        for (tid, context) in (0u64..).zip(contexts) {
            new_list.add(Arc::new(CoreThread::new(ThreadId(tid), architecture, context.clone())));
        }
    } else {
        for thread in old_list {
            new_list.add(Arc::clone(thread));
        }
    }
    !new_list.is_empty()
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn x86_64_context(rip: u64) -> ThreadContext
    {
        let mut words = vec![0u32; 42];
        words[32] = rip as u32;
        words[33] = (rip >> 32) as u32;
        ThreadContext {
            states: vec![ThreadState {
                flavor: X86_THREAD_STATE64,
                words,
            }],
        }
    }

    #[test]
    fn test_first_refresh_numbers_threads()
    {
        let contexts = vec![ThreadContext::default(); 3];
        let mut list = ThreadList::default();
        assert!(update_thread_list(&contexts, Architecture::X86_64, &ThreadList::default(), &mut list));
        let ids: Vec<u64> = list.iter().map(|t| t.id().raw()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_second_refresh_keeps_same_objects()
    {
        let contexts = vec![ThreadContext::default(); 2];
        let mut first = ThreadList::default();
        update_thread_list(&contexts, Architecture::X86_64, &ThreadList::default(), &mut first);

        let mut second = ThreadList::default();
        assert!(update_thread_list(&[], Architecture::X86_64, &first, &mut second));
        assert_eq!(second.len(), 2);
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_no_contexts_means_no_threads()
    {
        let mut list = ThreadList::default();
        assert!(!update_thread_list(&[], Architecture::Arm64, &ThreadList::default(), &mut list));
    }

    #[test]
    fn test_decode_x86_64_and_wrapped_state()
    {
        let thread = CoreThread::new(ThreadId(0), Architecture::X86_64, x86_64_context(0x1_0000_3f50));
        assert_eq!(thread.registers().unwrap().pc.value(), 0x1_0000_3f50);

        let mut wrapped = vec![X86_THREAD_STATE64, 42];
        wrapped.extend(x86_64_context(0x4000).states[0].words.iter());
        let context = ThreadContext {
            states: vec![ThreadState {
                flavor: X86_THREAD_STATE,
                words: wrapped,
            }],
        };
        let thread = CoreThread::new(ThreadId(1), Architecture::X86_64, context);
        assert_eq!(thread.registers().unwrap().get("rip"), Some(0x4000));
    }

    #[test]
    fn test_decode_arm64_state()
    {
        let mut words = vec![0u32; 68];
        words[64] = 0xdead_0000; // pc low
        words[65] = 0x1; // pc high
        words[66] = 0x6000_0000; // cpsr
        let context = ThreadContext {
            states: vec![ThreadState {
                flavor: ARM_THREAD_STATE64,
                words,
            }],
        };
        let regs = CoreThread::new(ThreadId(0), Architecture::Arm64, context).registers().unwrap();
        assert_eq!(regs.pc.value(), 0x1_dead_0000);
        assert_eq!(regs.status, 0x6000_0000);
    }

    #[test]
    fn test_unknown_flavor_is_unsupported()
    {
        let context = ThreadContext {
            states: vec![ThreadState {
                flavor: 99,
                words: vec![0; 4],
            }],
        };
        let thread = CoreThread::new(ThreadId(0), Architecture::X86_64, context);
        assert!(matches!(thread.registers(), Err(SalvageError::UnsupportedThreadState)));
    }
}
