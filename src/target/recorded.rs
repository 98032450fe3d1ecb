use super::interfaces::{MemoryReader, ProcessInspector, StackWalker, ThreadHandle};
use super::lock_layout::LockField;
use crate::prelude::*;
use deadlock_dump::{FrameRecord, ProcessDump};
use std::path::Path;

/// A target replayed from a [`ProcessDump`] instead of a live process.
///
/// Selection semantics mirror the live backend: stack walks are relative to
/// the thread picked with [`ProcessInspector::switch_to`], and lock fields are
/// answered from the frame picked with [`StackWalker::select_frame`].
pub struct RecordedTarget {
    dump: ProcessDump,
    selected: Option<usize>,
    selected_frame: Option<RecordedFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedThread {
    index: usize,
    num: u32,
    name: Option<String>,
    pid: i32,
    tid: i32,
}

impl ThreadHandle for RecordedThread {
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
pub struct RecordedFrame {
    thread: usize,
    depth: usize,
}

impl RecordedTarget {
    pub fn new(dump: ProcessDump) -> Self {
        let selected = dump
            .selected_tid
            .and_then(|tid| dump.threads.iter().position(|thread| thread.tid == tid));

        Self {
            dump,
            selected,
            selected_frame: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(ProcessDump::from_file(path)?))
    }

    pub fn dump(&self) -> &ProcessDump {
        &self.dump
    }

    fn thread_handle(&self, index: usize) -> Option<RecordedThread> {
        let record = self.dump.threads.get(index)?;
        Some(RecordedThread {
            index,
            num: record.num,
            name: record.name.clone(),
            pid: self.dump.pid,
            tid: record.tid,
        })
    }

    fn frame_record(&self, frame: &RecordedFrame) -> Option<&FrameRecord> {
        self.dump
            .threads
            .get(frame.thread)?
            .frames
            .get(frame.depth)
    }
}

impl ProcessInspector for RecordedTarget {
    type Thread = RecordedThread;

    fn is_valid(&self) -> bool {
        self.dump.valid
    }

    fn list_threads(&mut self) -> Result<Vec<RecordedThread>> {
        if !self.dump.valid {
            return Ok(Vec::new());
        }

        Ok((0..self.dump.threads.len())
            .filter_map(|index| self.thread_handle(index))
            .collect())
    }

    fn selected_thread(&self) -> Option<RecordedThread> {
        self.selected.and_then(|index| self.thread_handle(index))
    }

    fn switch_to(&mut self, thread: &RecordedThread) -> Result<()> {
        ensure!(
            thread.index < self.dump.threads.len(),
            "Thread {} is not part of the recorded process",
            thread.tid
        );
        self.selected = Some(thread.index);
        self.selected_frame = None;
        Ok(())
    }
}

impl StackWalker for RecordedTarget {
    type Frame = RecordedFrame;

    fn newest_frame(&mut self) -> Option<RecordedFrame> {
        let thread = self.selected?;
        let frame = RecordedFrame { thread, depth: 0 };
        self.frame_record(&frame).map(|_| frame)
    }

    fn frame_name(&self, frame: &RecordedFrame) -> Option<String> {
        self.frame_record(frame)?.function.clone()
    }

    fn frame_pc(&self, frame: &RecordedFrame) -> Option<u64> {
        self.frame_record(frame)?.pc
    }

    fn older(&mut self, frame: &RecordedFrame) -> Option<RecordedFrame> {
        let older = RecordedFrame {
            thread: frame.thread,
            depth: frame.depth + 1,
        };
        self.frame_record(&older).map(|_| older)
    }

    fn select_frame(&mut self, frame: &RecordedFrame) -> Result<()> {
        ensure!(
            self.selected == Some(frame.thread),
            "Cannot select a frame of a thread that is not the current thread"
        );
        ensure!(
            self.frame_record(frame).is_some(),
            "Frame #{} does not exist",
            frame.depth
        );
        self.selected_frame = Some(*frame);
        Ok(())
    }
}

impl MemoryReader for RecordedTarget {
    fn evaluate(&mut self, field: LockField) -> Result<i64> {
        let frame = self.selected_frame.context("No frame selected")?;
        let record = self
            .frame_record(&frame)
            .context("Selected frame no longer exists")?;

        record
            .fields
            .get(field.expression())
            .copied()
            .with_context(|| {
                format!(
                    "{field} was not recorded in frame #{} ({})",
                    frame.depth,
                    record.function.as_deref().unwrap_or("??")
                )
            })
    }
}
