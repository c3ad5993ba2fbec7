//! The process table: single source of truth for tracked processes.
//!
//! One mutex guards the whole table. The discipline is that the lock is only
//! ever held for short, non-blocking sections; anything that can block on
//! the native OS (waiting for an exit) clones the record's [`ProcessHandle`]
//! under the lock, releases it, blocks, and relocks to write the result
//! back. See `control::wait`.

use crate::error::{ProcessError, Result};
use crate::record::{LogicalPid, ProcessRecord, ProcessSnapshot};
use log::{trace, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal as NixSignal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Capacity bound of the table, counting the supervisor's own record.
pub const MAX_PROCESSES: usize = 512;

struct TableInner {
    records: HashMap<LogicalPid, ProcessRecord>,
    next_pid: u32,
}

pub(crate) struct ProcessTable {
    inner: Mutex<TableInner>,
}

impl ProcessTable {
    /// A fresh table with the supervisor pre-inserted as pid 1.
    pub(crate) fn new() -> Self {
        let mut records = HashMap::new();
        let supervisor = ProcessRecord::supervisor();
        records.insert(supervisor.pid, supervisor);
        ProcessTable {
            inner: Mutex::new(TableInner {
                records,
                next_pid: LogicalPid::SUPERVISOR.as_u32() + 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.lock().records.len() < MAX_PROCESSES
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Assign the next logical pid and insert the record built for it.
    ///
    /// Pids come from a monotonic counter and are never recycled while the
    /// table lives, so a freed slot never resurrects an old identity.
    pub(crate) fn allocate(
        &self,
        build: impl FnOnce(LogicalPid) -> ProcessRecord,
    ) -> Result<LogicalPid> {
        let mut inner = self.lock();
        if inner.records.len() >= MAX_PROCESSES {
            return Err(ProcessError::TableFull {
                limit: MAX_PROCESSES,
            });
        }
        let pid = LogicalPid(inner.next_pid);
        inner.next_pid += 1;
        let record = build(pid);
        debug_assert_eq!(record.pid, pid);
        inner.records.insert(pid, record);
        trace!("allocated {pid}");
        Ok(pid)
    }

    /// Run `access` on the record under the table lock.
    ///
    /// The closure must not block; this is the short-held section of the
    /// locking discipline.
    pub(crate) fn with_record<T>(
        &self,
        pid: LogicalPid,
        access: impl FnOnce(&mut ProcessRecord) -> T,
    ) -> Result<T> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(&pid)
            .ok_or(ProcessError::NotFound(pid))?;
        Ok(access(record))
    }

    /// Remove a terminal (Zombie or Dead) record, returning it so the caller
    /// can log before the owned handles and channels drop.
    pub(crate) fn remove(&self, pid: LogicalPid) -> Result<ProcessRecord> {
        if pid == LogicalPid::SUPERVISOR {
            return Err(ProcessError::Protected(pid));
        }
        let mut inner = self.lock();
        let state = inner
            .records
            .get(&pid)
            .map(|record| record.state)
            .ok_or(ProcessError::NotFound(pid))?;
        if !state.is_terminal() {
            return Err(ProcessError::InvalidState { pid, state });
        }
        inner
            .records
            .remove(&pid)
            .ok_or(ProcessError::NotFound(pid))
    }

    /// Point-in-time copy of every record, ordered by logical pid.
    pub(crate) fn list(&self) -> Vec<ProcessSnapshot> {
        let inner = self.lock();
        let mut snapshots: Vec<_> = inner.records.values().map(ProcessRecord::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.pid);
        snapshots
    }
}

impl Drop for ProcessTable {
    /// Best-effort teardown: terminate anything still alive and reap it.
    /// Failures are logged, never propagated; the rest of the table is
    /// always torn down.
    fn drop(&mut self) {
        let mut inner = self.lock();
        for (_, record) in inner.records.drain() {
            if record.state.is_terminal() {
                continue;
            }
            let (Some(handle), Some(native)) = (record.handle.as_ref(), record.native_pid) else {
                continue;
            };
            match signal::kill(Pid::from_raw(native.as_u32() as i32), NixSignal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => {
                    warn!("teardown could not terminate {native}: {errno}");
                }
            }
            if let Some(Err(err)) = handle.reap_if_uncontended() {
                warn!("teardown could not reap {native}: {err}");
            }
        }
    }
}
