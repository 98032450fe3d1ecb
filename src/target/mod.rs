//! Backends the finder can inspect: a live process stopped with ptrace, or a
//! recorded dump of one.

mod interfaces;
pub mod lock_layout;
mod recorded;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod live;

pub use interfaces::{MemoryReader, ProcessInspector, StackWalker, Target, ThreadHandle};
pub use lock_layout::LockField;
pub use recorded::{RecordedFrame, RecordedTarget, RecordedThread};

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use live::{LiveFrame, LiveTarget, LiveThread};
