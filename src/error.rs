use crate::jobs::JobId;
use crate::record::{LogicalPid, ProcessState};
use nix::errno::Errno;
use thiserror::Error;

/// Everything that can go wrong inside the process core. None of these are
/// swallowed; callers get the typed variant and decide how to surface it.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The table holds its maximum number of records. Recoverable; the
    /// caller should report it rather than retry automatically.
    #[error("process table is full ({limit} entries)")]
    TableFull { limit: usize },

    #[error("no such process: {0}")]
    NotFound(LogicalPid),

    #[error("no such job: {0}")]
    JobNotFound(JobId),

    /// The supervisor's own pid can never be signalled, suspended or reaped
    /// through this interface.
    #[error("{0} belongs to the supervisor and cannot be targeted")]
    Protected(LogicalPid),

    /// Lifecycle violation, e.g. reaping a record that is still running.
    #[error("{pid} is {state:?} and cannot be reaped")]
    InvalidState { pid: LogicalPid, state: ProcessState },

    /// The native process-creation call failed; carries the native error
    /// code for diagnosis.
    #[error("failed to launch process (native error {code})")]
    SpawnFailed {
        code: i32,
        #[source]
        source: std::io::Error,
    },

    /// The assembled command line exceeds the native limit. Arguments are
    /// never silently truncated.
    #[error("command line is {length} bytes, over the {limit} byte limit")]
    CommandTooLong { length: usize, limit: usize },

    #[error("failed to signal {pid}: {errno}")]
    SignalFailed { pid: LogicalPid, errno: Errno },

    #[error("failed to change priority: {errno}")]
    PriorityChange { errno: Errno },
}

pub type Result<T> = std::result::Result<T, ProcessError>;
