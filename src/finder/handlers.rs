use super::classifier::BlockingSite;
use super::diagnostic::{Diagnostic, MutexOwner, RwLockBlocker};
use super::snapshot::{ThreadIdentity, ThreadSnapshots};
use crate::prelude::*;
use crate::target::{LockField, MemoryReader, Target};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The blocking primitives the finder knows the in-memory layout of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimitiveKind {
    Mutex,
    RwlockWriter,
    RwlockReader,
    Syscall,
}

/// Lock state read from the target, before owners are matched to threads.
/// `None` fields could not be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockOwnership {
    pub owner_tid: Option<i64>,
    pub readers: Option<i64>,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 4] = [
        PrimitiveKind::Mutex,
        PrimitiveKind::RwlockWriter,
        PrimitiveKind::RwlockReader,
        PrimitiveKind::Syscall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Mutex => "mutex",
            PrimitiveKind::RwlockWriter => "rwlock-writer",
            PrimitiveKind::RwlockReader => "rwlock-reader",
            PrimitiveKind::Syscall => "syscall",
        }
    }

    /// Lock fields read by [`PrimitiveKind::resolve_owner`].
    pub fn fields(self) -> &'static [LockField] {
        match self {
            PrimitiveKind::Mutex => &[LockField::MutexOwner],
            PrimitiveKind::RwlockWriter => {
                &[LockField::RwLockCurWriter, LockField::RwLockReaders]
            }
            PrimitiveKind::RwlockReader => &[LockField::RwLockCurWriter],
            PrimitiveKind::Syscall => &[],
        }
    }

    /// Read the lock state from the currently selected frame.
    pub fn resolve_owner<R: MemoryReader + ?Sized>(self, reader: &mut R) -> LockOwnership {
        let mut read = |field: LockField| match reader.evaluate(field) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!("Failed to read {field}: {error:#}");
                None
            }
        };

        match self {
            PrimitiveKind::Mutex => LockOwnership {
                owner_tid: read(LockField::MutexOwner),
                readers: None,
            },
            PrimitiveKind::RwlockWriter => LockOwnership {
                owner_tid: read(LockField::RwLockCurWriter),
                readers: read(LockField::RwLockReaders),
            },
            PrimitiveKind::RwlockReader => LockOwnership {
                owner_tid: read(LockField::RwLockCurWriter),
                readers: None,
            },
            PrimitiveKind::Syscall => LockOwnership::default(),
        }
    }

    /// Turn the lock state into a diagnostic, matching owner tids against
    /// the snapshot.
    pub fn describe<H>(
        self,
        function: &str,
        ownership: &LockOwnership,
        threads: &ThreadSnapshots<H>,
    ) -> Diagnostic {
        let function = function.to_owned();
        let owner = ownership
            .owner_tid
            .and_then(|tid| threads.get_by_tid(tid))
            .map(|thread| thread.identity().clone());

        match self {
            PrimitiveKind::Mutex => Diagnostic::Mutex {
                function,
                owner: match owner {
                    Some(owner) => MutexOwner::Thread(owner),
                    None => MutexOwner::Unknown(ownership.owner_tid),
                },
            },
            PrimitiveKind::RwlockWriter => {
                let blocker = match (owner, ownership.readers) {
                    (Some(owner), _) => RwLockBlocker::Writer(owner),
                    (None, Some(readers)) if readers > 0 => RwLockBlocker::Readers(readers),
                    _ => RwLockBlocker::Unknown,
                };
                Diagnostic::RwLockWriter { function, blocker }
            }
            PrimitiveKind::RwlockReader => Diagnostic::RwLockReader {
                function,
                blocker: owner.map_or(RwLockBlocker::Unknown, RwLockBlocker::Writer),
            },
            PrimitiveKind::Syscall => Diagnostic::Syscall { function },
        }
    }

    /// Select the blocking frame, read the lock behind it and describe the
    /// wait. The subject thread must already be the target's current thread.
    pub fn handle<T: Target + ?Sized>(
        self,
        target: &mut T,
        threads: &ThreadSnapshots<T::Thread>,
        thread: &ThreadIdentity,
        site: &BlockingSite<T::Frame>,
    ) -> Diagnostic {
        let ownership = match target.select_frame(&site.frame) {
            Ok(()) => self.resolve_owner(target),
            Err(error) => {
                warn!(
                    "Failed to select frame {} of thread {}: {error:#}",
                    site.function, thread.thread_id
                );
                LockOwnership::default()
            }
        };
        debug!(
            "Thread {} blocked on {self} in {}: {ownership:?}",
            thread.thread_id, site.function
        );

        self.describe(&site.function, &ownership, threads)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
