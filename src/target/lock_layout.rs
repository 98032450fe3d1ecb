//! In-memory layout of the glibc lock types the finder understands.
//!
//! Offsets are those of glibc >= 2.25 on 64-bit Linux (x86_64 and the generic
//! layout used by aarch64 agree on every field read here):
//!
//! ```text
//! struct __pthread_mutex_s {        struct __pthread_rwlock_arch_t {
//!   int __lock;          // 0          unsigned int __readers;        // 0
//!   unsigned int __count;// 4          unsigned int __writers;        // 4
//!   int __owner;         // 8          unsigned int __wrphase_futex;  // 8
//!   ...                                unsigned int __writers_futex;  // 12
//! };                                   unsigned int __pad3, __pad4;   // 16, 20
//!                                      int __cur_writer;              // 24
//!                                      ...
//!                                    };
//! ```

use std::fmt;

pub const MUTEX_LOCK_OFFSET: u64 = 0;
pub const MUTEX_OWNER_OFFSET: u64 = 8;

pub const RWLOCK_READERS_OFFSET: u64 = 0;
pub const RWLOCK_WRPHASE_FUTEX_OFFSET: u64 = 8;
pub const RWLOCK_WRITERS_FUTEX_OFFSET: u64 = 12;
pub const RWLOCK_CUR_WRITER_OFFSET: u64 = 24;

/// `__readers` keeps state flags in its low bits, the reader count above them.
pub const RWLOCK_READER_SHIFT: u32 = 3;

/// Owner value glibc stores in a robust mutex whose owner died.
pub const MUTEX_OWNER_INCONSISTENT: i64 = 0x7fff_ffff;
/// Owner value of a robust mutex that was unlocked without being made consistent.
pub const MUTEX_OWNER_NOT_RECOVERABLE: i64 = 0x7fff_fffe;

/// A field of the lock argument of a blocking frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockField {
    /// `mutex->__data.__owner`
    MutexOwner,
    /// `rwlock->__data.__cur_writer`
    RwLockCurWriter,
    /// `rwlock->__data.__readers`, decoded to a reader count
    RwLockReaders,
}

impl LockField {
    pub const ALL: [LockField; 3] = [
        LockField::MutexOwner,
        LockField::RwLockCurWriter,
        LockField::RwLockReaders,
    ];

    pub fn expression(self) -> &'static str {
        match self {
            LockField::MutexOwner => "mutex->__data.__owner",
            LockField::RwLockCurWriter => "rwlock->__data.__cur_writer",
            LockField::RwLockReaders => "rwlock->__data.__readers",
        }
    }

    pub fn from_expression(expression: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.expression() == expression)
    }

    pub fn offset(self) -> u64 {
        match self {
            LockField::MutexOwner => MUTEX_OWNER_OFFSET,
            LockField::RwLockCurWriter => RWLOCK_CUR_WRITER_OFFSET,
            LockField::RwLockReaders => RWLOCK_READERS_OFFSET,
        }
    }

    fn is_rwlock(self) -> bool {
        !matches!(self, LockField::MutexOwner)
    }

    /// Turn the raw 32-bit word stored at [`LockField::offset`] into the value
    /// the handlers work with.
    pub fn decode(self, raw: u32) -> i64 {
        match self {
            LockField::MutexOwner | LockField::RwLockCurWriter => i64::from(raw as i32),
            LockField::RwLockReaders => i64::from(raw >> RWLOCK_READER_SHIFT),
        }
    }
}

impl fmt::Display for LockField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression())
    }
}

/// Recover the address of the lock a thread sleeps on from the address passed
/// to `futex(2)`.
///
/// Mutexes sleep on `__lock`. Read/write locks sleep either on
/// `__writers_futex` or `__wrphase_futex`; the lock is 8-byte aligned, so the
/// two are told apart by the futex word's alignment.
pub fn lock_base_from_futex(field: LockField, futex_addr: u64) -> u64 {
    if !field.is_rwlock() {
        return futex_addr.wrapping_sub(MUTEX_LOCK_OFFSET);
    }

    if futex_addr % 8 == RWLOCK_WRITERS_FUTEX_OFFSET % 8 {
        futex_addr.wrapping_sub(RWLOCK_WRITERS_FUTEX_OFFSET)
    } else {
        futex_addr.wrapping_sub(RWLOCK_WRPHASE_FUTEX_OFFSET)
    }
}
