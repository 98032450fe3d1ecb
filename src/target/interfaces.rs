use super::lock_layout::LockField;
use crate::prelude::*;

/// Identity of one thread of the inspected process, as exposed by a backend.
pub trait ThreadHandle {
    /// Debugger-assigned ordinal, only used for display.
    fn num(&self) -> u32;
    fn name(&self) -> Option<String>;
    fn process_id(&self) -> i32;
    fn thread_id(&self) -> i32;
}

/// Control over the stopped target: which threads exist and which one is current.
pub trait ProcessInspector {
    type Thread: ThreadHandle + Clone;

    /// Whether there is a live (or recorded) process to inspect at all.
    fn is_valid(&self) -> bool;

    fn list_threads(&mut self) -> Result<Vec<Self::Thread>>;

    fn selected_thread(&self) -> Option<Self::Thread>;

    /// Make `thread` the current thread. Stack walks and memory reads that
    /// follow are relative to it.
    fn switch_to(&mut self, thread: &Self::Thread) -> Result<()>;
}

/// Call stack of the current thread, newest frame first.
pub trait StackWalker {
    type Frame: Clone;

    fn newest_frame(&mut self) -> Option<Self::Frame>;

    /// `None` when the frame's address could not be symbolized.
    fn frame_name(&self, frame: &Self::Frame) -> Option<String>;

    fn frame_pc(&self, _frame: &Self::Frame) -> Option<u64> {
        None
    }

    /// The caller of `frame`, `None` at the end of the chain.
    fn older(&mut self, frame: &Self::Frame) -> Option<Self::Frame>;

    /// Make `frame` the scope in which [`MemoryReader::evaluate`] resolves.
    fn select_frame(&mut self, frame: &Self::Frame) -> Result<()>;
}

/// Typed reads of lock state in the target's address space.
pub trait MemoryReader {
    /// Read `field` of the lock argument of the currently selected frame.
    fn evaluate(&mut self, field: LockField) -> Result<i64>;
}

/// Everything the finder needs from a backend.
pub trait Target: ProcessInspector + StackWalker + MemoryReader {}

impl<T> Target for T where T: ProcessInspector + StackWalker + MemoryReader {}
