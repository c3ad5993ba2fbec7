//! Unix-style process and job control layered over the host OS's native
//! process primitives.
//!
//! A [`Supervisor`] owns a bounded process table and a job registry. It
//! spawns commands (foreground or background), waits on them, delivers the
//! modeled signal set (terminate, interrupt, stop, continue), tracks their
//! resource usage on demand, and hands out point-in-time snapshots for
//! display. Logical pids are a distinct identifier space from the host's
//! native process ids.

mod control;
mod error;
mod jobs;
mod record;
mod spawn;
mod stats;
mod supervisor;
mod table;

pub use error::{ProcessError, Result};
pub use jobs::{JobId, JobSnapshot};
pub use record::{LogicalPid, NativePid, Priority, ProcessSnapshot, ProcessState, Signal};
pub use supervisor::{Spawned, Supervisor};
pub use table::MAX_PROCESSES;
