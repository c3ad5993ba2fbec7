//! Control operations: kill, suspend, resume, wait, set_priority.
//!
//! Every operation reads what it needs from the table under the short-held
//! lock, performs the native call without it, and relocks to write the
//! lifecycle transition back.

use crate::error::{ProcessError, Result};
use crate::record::{LogicalPid, NativePid, Priority, ProcessState, Signal};
use crate::table::ProcessTable;
use log::{debug, trace};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal as NixSignal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Exit code derived from a native exit status: the plain code for a normal
/// exit, `128 + signal` for a signal death.
pub(crate) fn exit_code_of(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// Deliver a native signal, tolerating a process that vanished between the
/// table read and the call.
fn send(pid: LogicalPid, native: NativePid, native_signal: NixSignal) -> Result<()> {
    match signal::kill(Pid::from_raw(native.as_u32() as i32), native_signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ProcessError::SignalFailed { pid, errno }),
    }
}

/// Forcibly terminate a process.
///
/// Both `Terminate` and `Interrupt` map to forced termination; no graceful
/// shutdown channel is modeled. The record transitions to `Dead` with the
/// signal's conventional number as its exit code, and the native handle is
/// closed exactly once. A waiter already blocked inside the native wait
/// observes the termination and completes on its own; in that case the reap
/// is left to it.
pub(crate) fn kill(table: &ProcessTable, pid: LogicalPid, sig: Signal) -> Result<()> {
    if pid == LogicalPid::SUPERVISOR {
        return Err(ProcessError::Protected(pid));
    }
    let (handle, native, state) =
        table.with_record(pid, |record| (record.handle.clone(), record.native_pid, record.state))?;
    if state.is_terminal() {
        return Ok(());
    }
    let Some(native) = native else {
        return Ok(());
    };

    send(pid, native, NixSignal::SIGKILL)?;

    if let Some(handle) = handle {
        match handle.reap_if_uncontended() {
            Some(Ok(status)) => trace!("reaped {native} after kill: {status}"),
            Some(Err(err)) => debug!("reap of {native} after kill failed: {err}"),
            None => trace!("a blocked wait will reap {native}"),
        }
    }

    table.with_record(pid, |record| {
        // A racing waiter may have recorded the natural verdict first; the
        // first terminal transition wins.
        if !record.state.is_terminal() {
            record.state = ProcessState::Dead;
            record.exit_code = Some(sig.exit_code());
            record.close_handle();
        }
    })?;
    debug!("{pid} killed with {sig:?}");
    Ok(())
}

/// Pause execution via SIGSTOP. `NotFound` when the pid is unknown or its
/// native handle is already closed.
pub(crate) fn suspend(table: &ProcessTable, pid: LogicalPid) -> Result<()> {
    if pid == LogicalPid::SUPERVISOR {
        return Err(ProcessError::Protected(pid));
    }
    let native = table.with_record(pid, |record| record.handle.as_ref().and(record.native_pid))?;
    let Some(native) = native else {
        return Err(ProcessError::NotFound(pid));
    };
    send(pid, native, NixSignal::SIGSTOP)?;
    table.with_record(pid, |record| {
        if record.state == ProcessState::Running {
            record.state = ProcessState::Stopped;
            trace!("{pid} stopped");
        }
    })
}

/// Resume execution via SIGCONT, the inverse of [`suspend`].
pub(crate) fn resume(table: &ProcessTable, pid: LogicalPid) -> Result<()> {
    if pid == LogicalPid::SUPERVISOR {
        return Err(ProcessError::Protected(pid));
    }
    let native = table.with_record(pid, |record| record.handle.as_ref().and(record.native_pid))?;
    let Some(native) = native else {
        return Err(ProcessError::NotFound(pid));
    };
    send(pid, native, NixSignal::SIGCONT)?;
    table.with_record(pid, |record| {
        if record.state == ProcessState::Stopped {
            record.state = ProcessState::Running;
            trace!("{pid} resumed");
        }
    })
}

/// Block until the process exits and return its exit code.
///
/// The table lock is never held across the native wait. Once a record is
/// terminal the call is idempotent and returns the recorded code.
pub(crate) fn wait(table: &ProcessTable, pid: LogicalPid) -> Result<i32> {
    let (handle, settled) = table.with_record(pid, |record| {
        if record.state.is_terminal() {
            (None, record.exit_code)
        } else {
            (record.handle.clone(), None)
        }
    })?;
    if let Some(code) = settled {
        return Ok(code);
    }
    let Some(handle) = handle else {
        return Err(ProcessError::NotFound(pid));
    };

    trace!("blocking on {pid}");
    match handle.wait() {
        Ok(status) => {
            let code = exit_code_of(&status);
            table.with_record(pid, |record| {
                if !record.state.is_terminal() {
                    record.state = ProcessState::Zombie;
                    record.exit_code = Some(code);
                    record.close_handle();
                    debug!("{pid} exited with code {code}");
                }
                record.exit_code.unwrap_or(code)
            })
        }
        Err(err) => {
            // A concurrent kill already closed and reaped the native child;
            // the record carries the verdict.
            debug!("native wait on {pid} failed ({err}); reading recorded verdict");
            table
                .with_record(pid, |record| record.exit_code)?
                .ok_or(ProcessError::NotFound(pid))
        }
    }
}

/// Apply a scheduling priority by mapping it to a native nice value.
pub(crate) fn set_priority(table: &ProcessTable, pid: LogicalPid, priority: Priority) -> Result<()> {
    let native = table.with_record(pid, |record| record.native_pid)?;
    let Some(native) = native else {
        return Err(ProcessError::NotFound(pid));
    };
    // SAFETY: setpriority reads no memory through its arguments. The casts
    // absorb per-platform differences in the `which`/`who` parameter types.
    let rc = unsafe {
        libc::setpriority(
            libc::PRIO_PROCESS as _,
            native.as_u32() as _,
            priority.nice(),
        )
    };
    if rc == -1 {
        return match Errno::last() {
            Errno::ESRCH => Err(ProcessError::NotFound(pid)),
            errno => Err(ProcessError::PriorityChange { errno }),
        };
    }
    table.with_record(pid, |record| record.priority = priority)?;
    debug!("{pid} priority set to {priority:?}");
    Ok(())
}
