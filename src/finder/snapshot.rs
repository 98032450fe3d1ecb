use crate::prelude::*;
use crate::target::{ProcessInspector, ThreadHandle};
use std::fmt;

/// Identity of a thread, copied out of the backend at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadIdentity {
    pub num: u32,
    pub name: Option<String>,
    pub process_id: i32,
    pub thread_id: i32,
}

impl ThreadIdentity {
    pub fn of(handle: &impl ThreadHandle) -> Self {
        Self {
            num: handle.num(),
            name: handle.name(),
            process_id: handle.process_id(),
            thread_id: handle.thread_id(),
        }
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tid: {} on pid: {} [{}]",
            self.num,
            self.thread_id,
            self.process_id,
            self.name.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone)]
pub struct ThreadSnapshot<H> {
    identity: ThreadIdentity,
    handle: H,
}

impl<H: ThreadHandle> ThreadSnapshot<H> {
    pub fn new(handle: H) -> Self {
        Self {
            identity: ThreadIdentity::of(&handle),
            handle,
        }
    }
}

impl<H> ThreadSnapshot<H> {
    pub fn identity(&self) -> &ThreadIdentity {
        &self.identity
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// All threads of the target at one point in time, in enumeration order.
#[derive(Debug, Clone)]
pub struct ThreadSnapshots<H> {
    threads: Vec<ThreadSnapshot<H>>,
}

impl<H> Default for ThreadSnapshots<H> {
    fn default() -> Self {
        Self {
            threads: Vec::new(),
        }
    }
}

impl<H: ThreadHandle + Clone> ThreadSnapshots<H> {
    /// Enumerate the threads of `target`. An invalid target, or one whose
    /// threads cannot be listed, yields an empty set.
    pub fn capture<P>(target: &mut P) -> Self
    where
        P: ProcessInspector<Thread = H> + ?Sized,
    {
        if !target.is_valid() {
            debug!("No valid process to inspect");
            return Self::default();
        }

        match target.list_threads() {
            Ok(handles) => Self {
                threads: handles.into_iter().map(ThreadSnapshot::new).collect(),
            },
            Err(error) => {
                warn!("Failed to list threads: {error:#}");
                Self::default()
            }
        }
    }
}

impl<H> ThreadSnapshots<H> {
    /// Linear lookup by thread id. Owners that exited are expected to miss.
    pub fn get_by_tid(&self, tid: i64) -> Option<&ThreadSnapshot<H>> {
        self.threads
            .iter()
            .find(|thread| i64::from(thread.identity.thread_id) == tid)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ThreadSnapshot<H>> {
        self.threads.iter()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl<'a, H> IntoIterator for &'a ThreadSnapshots<H> {
    type Item = &'a ThreadSnapshot<H>;
    type IntoIter = std::slice::Iter<'a, ThreadSnapshot<H>>;

    fn into_iter(self) -> Self::IntoIter {
        self.threads.iter()
    }
}
