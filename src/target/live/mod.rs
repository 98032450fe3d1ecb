//! Backend that stops a running process with ptrace and inspects it in place.
//!
//! Every thread is attached (and thus stopped) for as long as the
//! [`LiveTarget`] lives. Stacks are unwound lazily, the first time a thread is
//! walked.

mod elf_helper;
mod memory_mappings;
mod ptrace;
mod symbols;
mod unwind;


use self::memory_mappings::ProcessModules;
use self::ptrace::{AttachedThread, ThreadRegisters};
use super::interfaces::{MemoryReader, ProcessInspector, StackWalker, ThreadHandle};
use super::lock_layout::{LockField, lock_base_from_futex};
use crate::prelude::*;
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveThread {
    index: usize,
    num: u32,
    name: Option<String>,
    pid: i32,
    tid: i32,
}

impl ThreadHandle for LiveThread {
    fn num(&self) -> u32 {
        self.num
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn process_id(&self) -> i32 {
        self.pid
    }

    fn thread_id(&self) -> i32 {
        self.tid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveFrame {
    thread: usize,
    depth: usize,
}

struct StoppedThread {
    handle: LiveThread,
    registers: Option<ThreadRegisters>,
}

#[derive(Debug, Clone)]
struct StackEntry {
    pc: u64,
    function: Option<String>,
}

pub struct LiveTarget {
    pid: i32,
    threads: Vec<StoppedThread>,
    modules: ProcessModules,
    stacks: HashMap<usize, Vec<StackEntry>>,
    selected: Option<usize>,
    selected_frame: Option<LiveFrame>,
    // Dropped last: threads resume once nothing reads them anymore.
    _attached: Vec<AttachedThread>,
}

impl LiveTarget {
    /// Stop every thread of `pid` and load the symbols of its modules.
    pub fn attach(pid: i32) -> Result<Self> {
        let process = procfs::process::Process::new(pid)
            .with_context(|| format!("Process {pid} not found"))?;

        let mut attached: Vec<AttachedThread> = Vec::new();
        let mut names: HashMap<i32, String> = HashMap::new();
        let mut failed: HashSet<i32> = HashSet::new();

        // A running thread may spawn new ones while we attach: list the tasks
        // again until a pass attaches nothing new.
        loop {
            let mut newly_attached = 0;
            let tasks = process
                .tasks()
                .with_context(|| format!("Failed to list threads of process {pid}"))?;

            for task in tasks.flatten() {
                let tid = task.tid;
                if failed.contains(&tid) || attached.iter().any(|t| t.tid().as_raw() == tid) {
                    continue;
                }

                match AttachedThread::attach(Pid::from_raw(tid)) {
                    Ok(thread) => {
                        if let Ok(stat) = task.stat() {
                            names.insert(tid, stat.comm);
                        }
                        attached.push(thread);
                        newly_attached += 1;
                    }
                    Err(error) => {
                        debug!("Could not attach to thread {tid}: {error:#}");
                        failed.insert(tid);
                    }
                }
            }

            if newly_attached == 0 {
                break;
            }
        }

        ensure!(
            !attached.is_empty(),
            "Could not attach to any thread of process {pid}, check ptrace permissions (kernel.yama.ptrace_scope)"
        );
        attached.sort_by_key(|thread| thread.tid().as_raw());
        debug!("Attached to {} threads of process {pid}", attached.len());

        let threads = attached
            .iter()
            .enumerate()
            .map(|(index, thread)| {
                let tid = thread.tid().as_raw();
                let registers = ThreadRegisters::read(thread.tid())
                    .inspect_err(|error| warn!("{error:#}"))
                    .ok();
                StoppedThread {
                    handle: LiveThread {
                        index,
                        num: index as u32 + 1,
                        name: names.remove(&tid),
                        pid,
                        tid,
                    },
                    registers,
                }
            })
            .collect_vec();

        let modules = ProcessModules::load(pid).unwrap_or_else(|error| {
            warn!("Failed to load modules of process {pid}, frames will be unnamed: {error:#}");
            ProcessModules::default()
        });

        let selected = threads
            .iter()
            .position(|thread| thread.handle.tid == pid)
            .or(Some(0));

        Ok(Self {
            pid,
            threads,
            modules,
            stacks: HashMap::new(),
            selected,
            selected_frame: None,
            _attached: attached,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    fn stack(&mut self, index: usize) -> &[StackEntry] {
        let threads = &self.threads;
        let modules = &self.modules;
        self.stacks
            .entry(index)
            .or_insert_with(|| unwind_thread(&threads[index], modules))
            .as_slice()
    }

    fn frame_entry(&self, frame: &LiveFrame) -> Option<&StackEntry> {
        self.stacks.get(&frame.thread)?.get(frame.depth)
    }
}

fn unwind_thread(thread: &StoppedThread, modules: &ProcessModules) -> Vec<StackEntry> {
    let Some(registers) = &thread.registers else {
        return Vec::new();
    };

    let tid = Pid::from_raw(thread.handle.tid);
    let mut read_word = |addr: u64| ptrace::read_word(tid, addr);
    let pcs = unwind::walk_stack(modules, registers.unwind_regs(), &mut read_word);
    trace!("Unwound {} frames of thread {tid}", pcs.len());

    pcs.into_iter()
        .enumerate()
        .map(|(depth, pc)| {
            // callers are symbolized at the call instruction, not the return address
            let lookup = if depth == 0 { pc } else { pc.saturating_sub(1) };
            StackEntry {
                pc,
                function: modules.symbolize(lookup).map(str::to_owned),
            }
        })
        .collect()
}

fn field_address(lock_addr: u64, field: LockField) -> Result<u64> {
    lock_addr
        .checked_add(field.offset())
        .with_context(|| format!("{field} of lock 0x{lock_addr:x} is out of the address space"))
}

impl ProcessInspector for LiveTarget {
    type Thread = LiveThread;

    fn is_valid(&self) -> bool {
        !self.threads.is_empty()
    }

    fn list_threads(&mut self) -> Result<Vec<LiveThread>> {
        Ok(self
            .threads
            .iter()
            .map(|thread| thread.handle.clone())
            .collect())
    }

    fn selected_thread(&self) -> Option<LiveThread> {
        let index = self.selected?;
        self.threads.get(index).map(|thread| thread.handle.clone())
    }

    fn switch_to(&mut self, thread: &LiveThread) -> Result<()> {
        let stopped = self
            .threads
            .get(thread.index)
            .filter(|stopped| stopped.handle.tid == thread.tid)
            .with_context(|| format!("Thread {} is not attached", thread.tid))?;
        ensure!(
            stopped.registers.is_some(),
            "Registers of thread {} are unavailable",
            thread.tid
        );

        self.selected = Some(thread.index);
        self.selected_frame = None;
        Ok(())
    }
}

impl StackWalker for LiveTarget {
    type Frame = LiveFrame;

    fn newest_frame(&mut self) -> Option<LiveFrame> {
        let thread = self.selected?;
        let frame = LiveFrame { thread, depth: 0 };
        (!self.stack(thread).is_empty()).then_some(frame)
    }

    fn frame_name(&self, frame: &LiveFrame) -> Option<String> {
        self.frame_entry(frame)?.function.clone()
    }

    fn frame_pc(&self, frame: &LiveFrame) -> Option<u64> {
        self.frame_entry(frame).map(|entry| entry.pc)
    }

    fn older(&mut self, frame: &LiveFrame) -> Option<LiveFrame> {
        let older = LiveFrame {
            thread: frame.thread,
            depth: frame.depth + 1,
        };
        (older.depth < self.stack(frame.thread).len()).then_some(older)
    }

    fn select_frame(&mut self, frame: &LiveFrame) -> Result<()> {
        ensure!(
            self.selected == Some(frame.thread),
            "Cannot select a frame of a thread that is not the current thread"
        );
        ensure!(
            self.frame_entry(frame).is_some(),
            "Frame #{} does not exist",
            frame.depth
        );
        self.selected_frame = Some(*frame);
        Ok(())
    }
}

impl MemoryReader for LiveTarget {
    /// Without debug info for the lock argument, the lock is found through
    /// the futex word the thread sleeps on.
    fn evaluate(&mut self, field: LockField) -> Result<i64> {
        let frame = self.selected_frame.context("No frame selected")?;
        let thread = self
            .threads
            .get(frame.thread)
            .context("Selected thread no longer exists")?;
        let tid = thread.handle.tid;

        let futex_addr = thread
            .registers
            .as_ref()
            .and_then(ThreadRegisters::futex_address)
            .with_context(|| format!("Thread {tid} is not waiting in futex(2), cannot locate {field}"))?;
        let lock_addr = lock_base_from_futex(field, futex_addr);
        let field_addr = field_address(lock_addr, field)?;
        let raw = ptrace::read_u32(Pid::from_raw(tid), field_addr)?;

        trace!("{field} of lock 0x{lock_addr:x} (thread {tid}) = 0x{raw:x}");
        Ok(field.decode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_address() {
        assert_eq!(
            field_address(0x7f00_1000, LockField::RwLockReaders).unwrap(),
            0x7f00_1000 + LockField::RwLockReaders.offset()
        );
        assert_eq!(field_address(0x7f00_1000, LockField::MutexOwner).unwrap(), 0x7f00_1008);
        // a bogus futex address near zero wraps the lock base around
        let wrapped = lock_base_from_futex(LockField::RwLockCurWriter, 4);
        assert!(field_address(wrapped, LockField::RwLockCurWriter).is_err());
    }
}
