#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use std::cell::UnsafeCell;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use deadlock_finder::target::LiveTarget;
use deadlock_finder::{DeadlockFinder, HandlerRegistry};

const CHILD_ENV: &str = "DEADLOCK_FINDER_DEADLOCK_CHILD";
const CHILD_READY: &str = "deadlock-child-ready";

struct PthreadMutex(UnsafeCell<libc::pthread_mutex_t>);

unsafe impl Sync for PthreadMutex {}

impl PthreadMutex {
    const fn new() -> Self {
        Self(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER))
    }

    fn lock(&self) {
        unsafe {
            libc::pthread_mutex_lock(self.0.get());
        }
    }
}

static FIRST: PthreadMutex = PthreadMutex::new();
static SECOND: PthreadMutex = PthreadMutex::new();

/// Body of the child process: two threads each take one mutex, then wait
/// forever for the other one's. A no-op unless run as that child.
#[test]
fn deadlocking_child() {
    if std::env::var_os(CHILD_ENV).is_none() {
        return;
    }

    let barrier = Barrier::new(2);
    thread::scope(|scope| {
        scope.spawn(|| {
            FIRST.lock();
            barrier.wait();
            SECOND.lock();
        });

        SECOND.lock();
        barrier.wait();
        println!("{CHILD_READY}");
        FIRST.lock();
    });
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_deadlocked_child() -> KillOnDrop {
    let mut child = KillOnDrop(
        Command::new(std::env::current_exe().unwrap())
            .args([
                "deadlocking_child",
                "--exact",
                "--nocapture",
                "--quiet",
                "--test-threads=1",
            ])
            .env(CHILD_ENV, "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap(),
    );

    let stdout = child.0.stdout.take().unwrap();
    let ready = BufReader::new(stdout)
        .lines()
        .map_while(Result::ok)
        .any(|line| line == CHILD_READY);
    assert!(ready, "child exited before deadlocking");
    child
}

#[test_log::test]
fn test_live_target_finds_mutex_cycle() {
    let child = spawn_deadlocked_child();
    let pid = child.0.id() as i32;

    // The last thread may still be on its way into the futex wait.
    for _ in 0..20 {
        thread::sleep(Duration::from_millis(100));

        let target = match LiveTarget::attach(pid) {
            Ok(target) => target,
            Err(error) => {
                eprintln!("Skipping: cannot ptrace the child process: {error:#}");
                return;
            }
        };
        assert_eq!(target.pid(), pid);

        let report = DeadlockFinder::new(target, HandlerRegistry::default()).find();
        let edges = report.wait_for_edges();
        let cycle = edges
            .iter()
            .find(|(waiter, owner)| waiter != owner && edges.contains(&(*owner, *waiter)));

        if let Some((waiter, owner)) = cycle {
            for tid in [waiter, owner] {
                let entry = report.get_by_tid(*tid).unwrap();
                assert!(entry.diagnostic.is_blocked());
                assert!(
                    entry.to_string().contains("is blocked on mutex in"),
                    "{entry}"
                );
            }
            return;
        }
        log::debug!("No cycle yet:\n{report}");
    }

    panic!("the two deadlocked threads were never reported waiting on each other");
}
