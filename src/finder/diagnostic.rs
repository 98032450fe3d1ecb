use super::snapshot::ThreadIdentity;
use crate::target::lock_layout::{MUTEX_OWNER_INCONSISTENT, MUTEX_OWNER_NOT_RECOVERABLE};
use std::fmt;

/// Who holds a mutex a thread waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexOwner {
    Thread(ThreadIdentity),
    /// The owner field does not name a live thread. `None` when the field
    /// could not be read at all.
    Unknown(Option<i64>),
}

/// What keeps a rwlock from being acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RwLockBlocker {
    Writer(ThreadIdentity),
    Readers(i64),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Mutex {
        function: String,
        owner: MutexOwner,
    },
    RwLockWriter {
        function: String,
        blocker: RwLockBlocker,
    },
    /// Readers only ever wait for a writer, so `blocker` is never
    /// [`RwLockBlocker::Readers`].
    RwLockReader {
        function: String,
        blocker: RwLockBlocker,
    },
    Syscall {
        function: String,
    },
    /// Not blocked in a known primitive. `function` is the newest frame.
    Running {
        function: Option<String>,
    },
}

impl Diagnostic {
    /// The thread this one waits for, when known.
    pub fn waits_for(&self) -> Option<&ThreadIdentity> {
        match self {
            Diagnostic::Mutex {
                owner: MutexOwner::Thread(owner),
                ..
            }
            | Diagnostic::RwLockWriter {
                blocker: RwLockBlocker::Writer(owner),
                ..
            }
            | Diagnostic::RwLockReader {
                blocker: RwLockBlocker::Writer(owner),
                ..
            } => Some(owner),
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self, Diagnostic::Running { .. })
    }
}

fn unknown_owner_qualifier(tid: Option<i64>) -> &'static str {
    match tid {
        None => " (lock state unreadable)",
        Some(0) => " (no owner recorded)",
        Some(MUTEX_OWNER_INCONSISTENT) => " (owner died, mutex inconsistent)",
        Some(MUTEX_OWNER_NOT_RECOVERABLE) => " (mutex not recoverable)",
        Some(_) => "",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDiagnostic {
    pub thread: ThreadIdentity,
    pub diagnostic: Diagnostic,
}

impl fmt::Display for ThreadDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thread = &self.thread;

        match &self.diagnostic {
            Diagnostic::Mutex { function, owner } => {
                writeln!(f, "thread: {thread} is blocked on mutex in {function}")?;
                match owner {
                    MutexOwner::Thread(owner) => {
                        writeln!(f, "\tbut the owner of the mutex is:")?;
                        writeln!(f, "\tthread: {owner}")?;
                    }
                    MutexOwner::Unknown(tid) => {
                        let shown = tid.map_or_else(|| "?".to_string(), |tid| tid.to_string());
                        writeln!(
                            f,
                            "\tbut the owner of the mutex is: {shown} unknown{}",
                            unknown_owner_qualifier(*tid)
                        )?;
                    }
                }
                writeln!(f)
            }
            Diagnostic::RwLockWriter { function, blocker } => {
                writeln!(f, "thread: {thread} (writer) is blocked on rwlock in {function}")?;
                write_rwlock_blocker(f, blocker)?;
                writeln!(f)
            }
            Diagnostic::RwLockReader { function, blocker } => {
                writeln!(f, "thread: {thread} (reader) is blocked on rwlock in {function}")?;
                write_rwlock_blocker(f, blocker)?;
                writeln!(f)
            }
            Diagnostic::Syscall { function } => {
                writeln!(f, "thread: {thread} stopped on {function}")
            }
            Diagnostic::Running { function } => {
                writeln!(
                    f,
                    "thread: {thread} is in {}",
                    function.as_deref().unwrap_or("??")
                )
            }
        }
    }
}

fn write_rwlock_blocker(f: &mut fmt::Formatter<'_>, blocker: &RwLockBlocker) -> fmt::Result {
    match blocker {
        RwLockBlocker::Writer(owner) => {
            writeln!(f, "\tbut the owner of the rwlock is (writer):")?;
            writeln!(f, "\tthread: {owner}")
        }
        RwLockBlocker::Readers(_) => writeln!(f, "\tbut the rwlock is acquired by reader[s]"),
        RwLockBlocker::Unknown => writeln!(f, "\trwlock is locked for unknown reason"),
    }
}

/// Result of one scan: one entry per thread, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    threads: Vec<ThreadDiagnostic>,
}

impl Report {
    pub fn push(&mut self, diagnostic: ThreadDiagnostic) {
        self.threads.push(diagnostic);
    }

    pub fn threads(&self) -> &[ThreadDiagnostic] {
        &self.threads
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn get_by_tid(&self, tid: i32) -> Option<&ThreadDiagnostic> {
        self.threads
            .iter()
            .find(|entry| entry.thread.thread_id == tid)
    }

    /// One-hop wait-for edges `(waiting tid, owner tid)`.
    pub fn wait_for_edges(&self) -> Vec<(i32, i32)> {
        self.threads
            .iter()
            .filter_map(|entry| {
                let owner = entry.diagnostic.waits_for()?;
                Some((entry.thread.thread_id, owner.thread_id))
            })
            .collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.threads {
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(num: u32, tid: i32, name: Option<&str>) -> ThreadIdentity {
        ThreadIdentity {
            num,
            name: name.map(str::to_owned),
            process_id: 100,
            thread_id: tid,
        }
    }

    fn render(diagnostic: Diagnostic) -> String {
        ThreadDiagnostic {
            thread: identity(2, 101, Some("worker")),
            diagnostic,
        }
        .to_string()
    }

    #[test]
    fn test_mutex_with_known_owner() {
        let text = render(Diagnostic::Mutex {
            function: "___pthread_mutex_lock".into(),
            owner: MutexOwner::Thread(identity(3, 102, None)),
        });
        assert_eq!(
            text,
            "thread: 2 tid: 101 on pid: 100 [worker] is blocked on mutex in ___pthread_mutex_lock\n\
             \tbut the owner of the mutex is:\n\
             \tthread: 3 tid: 102 on pid: 100 []\n\
             \n"
        );
    }

    #[rstest::rstest]
    #[case(Some(5555), "5555 unknown")]
    #[case(Some(0), "0 unknown (no owner recorded)")]
    #[case(Some(0x7fff_ffff), "2147483647 unknown (owner died, mutex inconsistent)")]
    #[case(Some(0x7fff_fffe), "2147483646 unknown (mutex not recoverable)")]
    #[case(None, "? unknown (lock state unreadable)")]
    fn test_mutex_with_unknown_owner(#[case] tid: Option<i64>, #[case] expected: &str) {
        let text = render(Diagnostic::Mutex {
            function: "pthread_mutex_lock".into(),
            owner: MutexOwner::Unknown(tid),
        });
        let owner_line = text.lines().nth(1).unwrap();
        assert_eq!(
            owner_line,
            format!("\tbut the owner of the mutex is: {expected}")
        );
        assert!(text.ends_with("\n\n"));
    }

    #[rstest::rstest]
    #[case::writer(RwLockBlocker::Writer(identity(1, 100, Some("main"))), "\tbut the owner of the rwlock is (writer):\n\tthread: 1 tid: 100 on pid: 100 [main]\n")]
    #[case::readers(RwLockBlocker::Readers(3), "\tbut the rwlock is acquired by reader[s]\n")]
    #[case::unknown(RwLockBlocker::Unknown, "\trwlock is locked for unknown reason\n")]
    fn test_rwlock_writer(#[case] blocker: RwLockBlocker, #[case] expected_body: &str) {
        let text = render(Diagnostic::RwLockWriter {
            function: "pthread_rwlock_wrlock".into(),
            blocker,
        });
        assert_eq!(
            text,
            format!(
                "thread: 2 tid: 101 on pid: 100 [worker] (writer) is blocked on rwlock in pthread_rwlock_wrlock\n{expected_body}\n"
            )
        );
    }

    #[test]
    fn test_single_line_diagnostics() {
        assert_eq!(
            render(Diagnostic::Syscall {
                function: "syscall".into()
            }),
            "thread: 2 tid: 101 on pid: 100 [worker] stopped on syscall\n"
        );
        assert_eq!(
            render(Diagnostic::Running {
                function: Some("compute".into())
            }),
            "thread: 2 tid: 101 on pid: 100 [worker] is in compute\n"
        );
        assert_eq!(
            render(Diagnostic::Running { function: None }),
            "thread: 2 tid: 101 on pid: 100 [worker] is in ??\n"
        );
    }

    #[test]
    fn test_wait_for_edges() {
        let mut report = Report::default();
        report.push(ThreadDiagnostic {
            thread: identity(1, 100, None),
            diagnostic: Diagnostic::Mutex {
                function: "pthread_mutex_lock".into(),
                owner: MutexOwner::Thread(identity(2, 101, None)),
            },
        });
        report.push(ThreadDiagnostic {
            thread: identity(2, 101, None),
            diagnostic: Diagnostic::RwLockReader {
                function: "pthread_rwlock_rdlock".into(),
                blocker: RwLockBlocker::Writer(identity(1, 100, None)),
            },
        });
        report.push(ThreadDiagnostic {
            thread: identity(3, 102, None),
            diagnostic: Diagnostic::Mutex {
                function: "pthread_mutex_lock".into(),
                owner: MutexOwner::Unknown(Some(999)),
            },
        });

        assert_eq!(report.wait_for_edges(), vec![(100, 101), (101, 100)]);
        assert!(report.get_by_tid(102).unwrap().diagnostic.is_blocked());
    }
}
