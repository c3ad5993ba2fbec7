//! Process identity and lifecycle data.
//!
//! Two identifier spaces coexist: [`LogicalPid`] is the Unix-style pid this
//! crate hands out, [`NativePid`] is whatever the host OS assigned. They are
//! distinct types so they can never be compared or mixed up by accident.

use serde::Serialize;
use std::fmt;
use std::io;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Instant, SystemTime};

/// Unix-style process identifier assigned by the process table.
///
/// Monotonic from 1, never reused while the record is tracked. Pid 1 is the
/// supervisor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogicalPid(pub u32);

impl LogicalPid {
    pub const SUPERVISOR: LogicalPid = LogicalPid(1);

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LogicalPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Host OS process identifier, used only for native calls (signals, stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NativePid(pub u32);

impl NativePid {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NativePid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native pid {}", self.0)
    }
}

/// Lifecycle state of a tracked process.
///
/// Transitions are forward-only: `Running ⇄ Stopped`, then `Zombie` (natural
/// exit) or `Dead` (forced kill). Both terminal states allow reaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Running,
    Stopped,
    Zombie,
    Dead,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Zombie | ProcessState::Dead)
    }
}

/// Scheduling priority, mapped to native nice values when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Realtime,
}

impl Priority {
    pub(crate) fn nice(self) -> i32 {
        match self {
            Priority::Low => 10,
            Priority::Normal => 0,
            Priority::High => -10,
            Priority::Realtime => -20,
        }
    }
}

/// The modeled signal set. Terminate and Interrupt both force termination;
/// Stop and Continue map to suspend and resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Interrupt,
    Stop,
    Continue,
}

impl Signal {
    /// Conventional Unix signal number, recorded as the exit code of a
    /// killed process.
    pub(crate) fn exit_code(self) -> i32 {
        match self {
            Signal::Interrupt => 2,
            Signal::Terminate => 15,
            Signal::Continue => 18,
            Signal::Stop => 19,
        }
    }
}

/// Exclusively owned native child handle.
///
/// Clones share the same underlying child, which is what lets `wait` block
/// on the native process without holding the table lock. The child itself is
/// closed exactly once, when the last clone drops.
#[derive(Debug, Clone)]
pub(crate) struct ProcessHandle(Arc<Mutex<Child>>);

impl ProcessHandle {
    pub(crate) fn new(child: Child) -> Self {
        ProcessHandle(Arc::new(Mutex::new(child)))
    }

    /// Block until the native process exits.
    pub(crate) fn wait(&self) -> io::Result<ExitStatus> {
        let mut child = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        child.wait()
    }

    /// Poll the native process for an exit status without blocking.
    ///
    /// Returns `Ok(None)` while the process runs, and also when another
    /// caller is currently blocked inside [`ProcessHandle::wait`] (that
    /// caller will observe the exit).
    pub(crate) fn try_status(&self) -> io::Result<Option<ExitStatus>> {
        match self.0.try_lock() {
            Ok(mut child) => child.try_wait(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().try_wait(),
            Err(TryLockError::WouldBlock) => Ok(None),
        }
    }

    /// Reap the native child unless a blocked waiter already owns it.
    pub(crate) fn reap_if_uncontended(&self) -> Option<io::Result<ExitStatus>> {
        match self.0.try_lock() {
            Ok(mut child) => Some(child.wait()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().wait()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// One tracked process. Owned by the process table; all mutation happens
/// under the table lock.
#[derive(Debug)]
pub(crate) struct ProcessRecord {
    pub(crate) pid: LogicalPid,
    pub(crate) parent_pid: LogicalPid,
    pub(crate) name: String,
    pub(crate) argv_line: String,
    pub(crate) working_directory: String,
    pub(crate) state: ProcessState,
    pub(crate) priority: Priority,
    pub(crate) start_time: SystemTime,
    pub(crate) started: Instant,
    pub(crate) exit_code: Option<i32>,
    pub(crate) handle: Option<ProcessHandle>,
    pub(crate) native_pid: Option<NativePid>,
    pub(crate) stdin: Option<ChildStdin>,
    pub(crate) stdout: Option<ChildStdout>,
    pub(crate) stderr: Option<ChildStderr>,
    pub(crate) is_background: bool,
    pub(crate) memory_used: u64,
    pub(crate) peak_memory: u64,
    pub(crate) read_bytes: u64,
    pub(crate) written_bytes: u64,
    pub(crate) cpu_percent: f32,
}

impl ProcessRecord {
    /// The record for the supervisor itself, pre-inserted as pid 1.
    pub(crate) fn supervisor() -> Self {
        ProcessRecord {
            pid: LogicalPid::SUPERVISOR,
            parent_pid: LogicalPid::SUPERVISOR,
            name: "supervisor".to_string(),
            argv_line: "supervisor".to_string(),
            working_directory: std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            state: ProcessState::Running,
            priority: Priority::Normal,
            start_time: SystemTime::now(),
            started: Instant::now(),
            exit_code: None,
            handle: None,
            native_pid: Some(NativePid(std::process::id())),
            stdin: None,
            stdout: None,
            stderr: None,
            is_background: false,
            memory_used: 0,
            peak_memory: 0,
            read_bytes: 0,
            written_bytes: 0,
            cpu_percent: 0.0,
        }
    }

    /// Drop the native handle and forget the native identity.
    ///
    /// Called on kill and on natural-exit detection; the captured stdio
    /// channels stay readable until the record is reaped.
    pub(crate) fn close_handle(&mut self) {
        self.handle = None;
        self.native_pid = None;
    }

    pub(crate) fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            pid: self.pid,
            parent_pid: self.parent_pid,
            name: self.name.clone(),
            argv_line: self.argv_line.clone(),
            working_directory: self.working_directory.clone(),
            state: self.state,
            priority: self.priority,
            start_time: self.start_time,
            exit_code: self.exit_code,
            native_pid: self.native_pid,
            is_background: self.is_background,
            memory_used: self.memory_used,
            peak_memory: self.peak_memory,
            read_bytes: self.read_bytes,
            written_bytes: self.written_bytes,
            cpu_percent: self.cpu_percent,
        }
    }
}

/// Point-in-time copy of a process record, safe to hold after the table
/// lock is released. Carries no liveness guarantee.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: LogicalPid,
    pub parent_pid: LogicalPid,
    pub name: String,
    pub argv_line: String,
    pub working_directory: String,
    pub state: ProcessState,
    pub priority: Priority,
    pub start_time: SystemTime,
    pub exit_code: Option<i32>,
    pub native_pid: Option<NativePid>,
    pub is_background: bool,
    pub memory_used: u64,
    pub peak_memory: u64,
    pub read_bytes: u64,
    pub written_bytes: u64,
    pub cpu_percent: f32,
}
