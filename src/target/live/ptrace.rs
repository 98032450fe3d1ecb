use super::unwind::UnwindRegs;
use crate::prelude::*;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// A thread stopped under `PTRACE_ATTACH`. Detaches (and lets the thread run
/// again) on drop.
pub struct AttachedThread {
    tid: Pid,
    /// Signal that arrived before our SIGSTOP, delivered again on detach.
    pending_signal: Option<Signal>,
}

impl AttachedThread {
    pub fn attach(tid: Pid) -> Result<Self> {
        ptrace::attach(tid).with_context(|| format!("ptrace({tid}) failed"))?;

        let mut pending_signal = None;
        loop {
            // __WALL: non-leader threads are "clone" children for waitpid
            match waitpid(tid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => break,
                Ok(WaitStatus::Stopped(_, signal)) => {
                    trace!("Thread {tid} got {signal} while attaching, deferring it");
                    pending_signal = Some(signal);
                    ptrace::cont(tid, None)?;
                }
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                    bail!("Thread {tid} exited while attaching");
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(error) => {
                    return Err(error).with_context(|| format!("waitpid({tid}) failed"));
                }
            }
        }

        Ok(Self {
            tid,
            pending_signal,
        })
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }
}

impl Drop for AttachedThread {
    fn drop(&mut self) {
        if let Err(error) = ptrace::detach(self.tid, self.pending_signal) {
            debug!("Failed to detach from thread {}: {error}", self.tid);
        }
    }
}

/// The part of a stopped thread's register file the finder uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRegisters {
    pub pc: u64,
    pub sp: u64,
    pub fp: u64,
    /// Number of the system call the thread is stopped in, negative if none.
    pub syscall_nr: i64,
    pub syscall_arg0: u64,
}

impl ThreadRegisters {
    pub fn read(tid: Pid) -> Result<Self> {
        let regs = ptrace::getregs(tid)
            .with_context(|| format!("Failed to read registers of thread {tid}"))?;

        Ok(Self {
            pc: regs.rip,
            sp: regs.rsp,
            fp: regs.rbp,
            syscall_nr: regs.orig_rax as i64,
            syscall_arg0: regs.rdi,
        })
    }

    /// Address of the futex word, when the thread sleeps in `futex(2)`.
    pub fn futex_address(&self) -> Option<u64> {
        (self.syscall_nr == libc::SYS_futex).then_some(self.syscall_arg0)
    }

    pub fn unwind_regs(&self) -> UnwindRegs {
        UnwindRegs {
            pc: self.pc,
            sp: self.sp,
            fp: self.fp,
        }
    }
}

pub fn read_word(tid: Pid, addr: u64) -> Option<u64> {
    ptrace::read(tid, addr as ptrace::AddressType)
        .ok()
        .map(|word| word as u64)
}

pub fn read_u32(tid: Pid, addr: u64) -> Result<u32> {
    let word = ptrace::read(tid, addr as ptrace::AddressType)
        .with_context(|| format!("Failed to read memory at 0x{addr:x} in thread {tid}"))?;
    let bytes = (word as u64).to_ne_bytes();
    Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers(syscall_nr: i64) -> ThreadRegisters {
        ThreadRegisters {
            pc: 0x7fff_f7c9_1234,
            sp: 0x7fff_ffff_e000,
            fp: 0,
            syscall_nr,
            syscall_arg0: 0x5555_5555_9040,
        }
    }

    #[test]
    fn test_futex_address_only_in_futex() {
        assert_eq!(
            registers(libc::SYS_futex).futex_address(),
            Some(0x5555_5555_9040)
        );
        assert_eq!(registers(libc::SYS_read).futex_address(), None);
        assert_eq!(registers(-1).futex_address(), None);
    }
}
