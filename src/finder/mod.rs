//! Classify why every thread of a stopped process waits, and on whom.
//!
//! For each thread the stack is searched for the outermost call into a known
//! blocking function (see [`HandlerRegistry`]). The [`PrimitiveKind`]
//! registered for that function reads the lock behind the call and names the
//! thread holding it. Cycles are not detected here: the report lists one-hop
//! wait-for relations that a reader (or [`Report::wait_for_edges`]) can chain.

mod classifier;
mod diagnostic;
mod handlers;
mod registry;
mod snapshot;


pub use classifier::{BlockingSite, classify};
pub use diagnostic::{Diagnostic, MutexOwner, Report, RwLockBlocker, ThreadDiagnostic};
pub use handlers::{LockOwnership, PrimitiveKind};
pub use registry::{DEFAULT_BLOCKING_FUNCTIONS, HandlerRegistry};
pub use snapshot::{ThreadIdentity, ThreadSnapshot, ThreadSnapshots};

use crate::prelude::*;
use crate::target::Target;

pub struct DeadlockFinder<T: Target> {
    target: T,
    registry: HandlerRegistry,
    threads: ThreadSnapshots<T::Thread>,
}

impl<T: Target> DeadlockFinder<T> {
    pub fn new(mut target: T, registry: HandlerRegistry) -> Self {
        let threads = ThreadSnapshots::capture(&mut target);
        Self {
            target,
            registry,
            threads,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Threads of the latest snapshot.
    pub fn threads(&self) -> &ThreadSnapshots<T::Thread> {
        &self.threads
    }

    /// The snapshot thread with id `tid`, `None` when no thread matches
    /// (typically an owner that already exited).
    pub fn get_thread_by_tid(&self, tid: i64) -> Option<&ThreadSnapshot<T::Thread>> {
        self.threads.get_by_tid(tid)
    }

    /// Take a fresh snapshot and diagnose every thread in it.
    ///
    /// Never fails: per-thread problems degrade into "unknown" diagnostics.
    /// The target's selected thread is the same before and after the call.
    pub fn find(&mut self) -> Report {
        self.threads = ThreadSnapshots::capture(&mut self.target);
        let original = self.target.selected_thread();
        debug!("Inspecting {} threads", self.threads.len());

        let mut report = Report::default();
        for thread in &self.threads {
            let diagnostic = diagnose(&mut self.target, &self.registry, &self.threads, thread);
            report.push(ThreadDiagnostic {
                thread: thread.identity().clone(),
                diagnostic,
            });
        }

        if let Some(original) = original {
            if let Err(error) = self.target.switch_to(&original) {
                warn!(
                    "Failed to restore the selected thread {}: {error:#}",
                    ThreadIdentity::of(&original)
                );
            }
        }

        report
    }
}

fn diagnose<T: Target>(
    target: &mut T,
    registry: &HandlerRegistry,
    threads: &ThreadSnapshots<T::Thread>,
    thread: &ThreadSnapshot<T::Thread>,
) -> Diagnostic {
    let identity = thread.identity();
    if let Err(error) = target.switch_to(thread.handle()) {
        warn!("Failed to switch to thread {identity}: {error:#}");
        return Diagnostic::Running { function: None };
    }

    let site = classify(target, |function| registry.contains(function));
    let Some((site, kind)) = site.and_then(|site| {
        let kind = registry.get(&site.function)?;
        Some((site, kind))
    }) else {
        let function = target
            .newest_frame()
            .and_then(|frame| target.frame_name(&frame));
        debug!(
            "Thread {} is not blocked, running {}",
            identity.thread_id,
            function.as_deref().unwrap_or("??")
        );
        return Diagnostic::Running { function };
    };

    kind.handle(target, threads, identity, &site)
}
