//! Record what the finder sees of a target into a [`ProcessDump`], so that it
//! can be analyzed again later without the process.

use crate::finder::HandlerRegistry;
use crate::prelude::*;
use crate::target::{Target, ThreadHandle};
use deadlock_dump::{FrameRecord, ProcessDump, ThreadRecord};
use std::collections::BTreeMap;

/// Walk every thread of `target` and record its stack. Frames of registered
/// blocking functions also get the lock fields their handler reads.
pub fn capture_dump<T: Target>(
    target: &mut T,
    pid: i32,
    registry: &HandlerRegistry,
) -> Result<ProcessDump> {
    let mut dump = ProcessDump::new(pid);
    dump.valid = target.is_valid();
    if !dump.valid {
        return Ok(dump);
    }

    let original = target.selected_thread();
    dump.selected_tid = original.as_ref().map(ThreadHandle::thread_id);

    for thread in target.list_threads()? {
        let mut record = ThreadRecord {
            num: thread.num(),
            name: thread.name(),
            tid: thread.thread_id(),
            frames: Vec::new(),
        };

        match target.switch_to(&thread) {
            Ok(()) => record.frames = capture_frames(target, registry),
            Err(error) => warn!("Failed to switch to thread {}: {error:#}", record.tid),
        }
        debug!(
            "Captured {} frames of thread {}",
            record.frames.len(),
            record.tid
        );
        dump.threads.push(record);
    }

    if let Some(original) = original {
        target.switch_to(&original)?;
    }

    Ok(dump)
}

fn capture_frames<T: Target>(target: &mut T, registry: &HandlerRegistry) -> Vec<FrameRecord> {
    let mut frames = Vec::new();
    let mut next = target.newest_frame();

    while let Some(frame) = next {
        let function = target.frame_name(&frame);
        let mut fields = BTreeMap::new();

        let kind = function.as_deref().and_then(|name| registry.get(name));
        if let Some(kind) = kind.filter(|kind| !kind.fields().is_empty()) {
            match target.select_frame(&frame) {
                Ok(()) => {
                    for field in kind.fields() {
                        match target.evaluate(*field) {
                            Ok(value) => {
                                fields.insert(field.expression().to_owned(), value);
                            }
                            Err(error) => debug!("{field} not captured: {error:#}"),
                        }
                    }
                }
                Err(error) => warn!("Failed to select frame #{}: {error:#}", frames.len()),
            }
        }

        frames.push(FrameRecord {
            pc: target.frame_pc(&frame),
            function,
            fields,
        });
        next = target.older(&frame);
    }

    frames
}
