//! The owning facade: one `Supervisor` holds the process table, the job
//! registry and the stats collector, and every public operation goes
//! through it. No process-wide statics.

use crate::control;
use crate::error::{ProcessError, Result};
use crate::jobs::{JobId, JobRegistry, JobSnapshot};
use crate::record::{
    LogicalPid, Priority, ProcessRecord, ProcessSnapshot, ProcessState, Signal,
};
use crate::spawn;
use crate::stats::StatsCollector;
use crate::table::{MAX_PROCESSES, ProcessTable};
use log::{debug, trace};
use std::path::Path;
use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::time::{Instant, SystemTime};

/// Result of a successful [`Supervisor::spawn`].
#[derive(Debug)]
pub enum Spawned {
    /// Foreground spawn: the process already ran to completion and this is
    /// its exit code.
    Exited(i32),
    /// Background spawn: the process is running, tracked under this job.
    Background { job_id: JobId, pid: LogicalPid },
}

pub struct Supervisor {
    table: ProcessTable,
    jobs: JobRegistry,
    stats: StatsCollector,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor {
            table: ProcessTable::new(),
            jobs: JobRegistry::new(),
            stats: StatsCollector::new(),
        }
    }

    /// Spawn `command` with `argv`.
    ///
    /// A foreground spawn blocks until the process exits and returns
    /// [`Spawned::Exited`]; a background spawn registers a job and returns
    /// [`Spawned::Background`] immediately.
    pub fn spawn(&self, command: &str, argv: &[String], background: bool) -> Result<Spawned> {
        if !self.table.has_capacity() {
            return Err(ProcessError::TableFull {
                limit: MAX_PROCESSES,
            });
        }
        let argv_line = spawn::assemble_command_line(command, argv)?;
        let child = spawn::launch(command, argv)?;
        let native_pid = child.native_pid;
        let cleanup_handle = child.handle.clone();

        let name = Path::new(command)
            .file_name()
            .map_or_else(|| command.to_string(), |n| n.to_string_lossy().into_owned());
        let working_directory = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();

        let allocated = self.table.allocate(|pid| ProcessRecord {
            pid,
            parent_pid: LogicalPid::SUPERVISOR,
            name,
            argv_line: argv_line.clone(),
            working_directory,
            state: ProcessState::Running,
            priority: Priority::Normal,
            start_time: SystemTime::now(),
            started: Instant::now(),
            exit_code: None,
            native_pid: Some(child.native_pid),
            handle: Some(child.handle),
            stdin: child.stdin,
            stdout: child.stdout,
            stderr: child.stderr,
            is_background: background,
            memory_used: 0,
            peak_memory: 0,
            read_bytes: 0,
            written_bytes: 0,
            cpu_percent: 0.0,
        });
        let pid = match allocated {
            Ok(pid) => pid,
            Err(err) => {
                // Lost the race for the last slot after the native launch.
                debug!("table rejected freshly launched {native_pid}; terminating it");
                spawn::abort(&cleanup_handle, native_pid);
                return Err(err);
            }
        };
        debug!("{pid} spawned: {argv_line} (native {native_pid})");

        if background {
            let job_id = self.jobs.add(pid, argv_line);
            Ok(Spawned::Background { job_id, pid })
        } else {
            let code = control::wait(&self.table, pid)?;
            Ok(Spawned::Exited(code))
        }
    }

    /// Deliver a modeled signal. `Stop` and `Continue` route to suspend and
    /// resume; `Terminate` and `Interrupt` force termination and drop any
    /// job tracking the pid in the same operation. The supervisor's own pid
    /// is rejected for every signal value.
    pub fn kill(&self, pid: LogicalPid, signal: Signal) -> Result<()> {
        if pid == LogicalPid::SUPERVISOR {
            return Err(ProcessError::Protected(pid));
        }
        match signal {
            Signal::Stop => self.suspend(pid),
            Signal::Continue => self.resume(pid),
            Signal::Terminate | Signal::Interrupt => {
                control::kill(&self.table, pid, signal)?;
                if let Some(job_id) = self.jobs.remove_for_pid(pid) {
                    debug!("{job_id} removed with killed {pid}");
                }
                Ok(())
            }
        }
    }

    pub fn suspend(&self, pid: LogicalPid) -> Result<()> {
        control::suspend(&self.table, pid)?;
        self.jobs.set_stopped(pid, true);
        Ok(())
    }

    pub fn resume(&self, pid: LogicalPid) -> Result<()> {
        control::resume(&self.table, pid)?;
        self.jobs.set_stopped(pid, false);
        Ok(())
    }

    /// Block until the process exits; idempotent once it has.
    pub fn wait(&self, pid: LogicalPid) -> Result<i32> {
        control::wait(&self.table, pid)
    }

    pub fn set_priority(&self, pid: LogicalPid, priority: Priority) -> Result<()> {
        control::set_priority(&self.table, pid, priority)
    }

    /// Refresh a record's resource counters; also the path that detects
    /// natural exits outside of an explicit wait.
    pub fn refresh_stats(&self, pid: LogicalPid) -> Result<()> {
        self.stats.refresh(&self.table, pid)
    }

    /// Remove a Zombie or Dead record from the table, dropping its job (if
    /// any) in the same operation.
    pub fn reap(&self, pid: LogicalPid) -> Result<()> {
        let record = self.table.remove(pid)?;
        if let Some(job_id) = self.jobs.remove_for_pid(pid) {
            debug!("{job_id} removed with reaped {pid}");
        }
        trace!("reaped {} ({})", record.pid, record.name);
        Ok(())
    }

    /// Drop a job entry without touching the underlying process record.
    /// Used when the record is reaped through another path.
    pub fn remove_job(&self, job_id: JobId) -> Result<()> {
        self.jobs.remove(job_id)
    }

    pub fn list(&self) -> Vec<ProcessSnapshot> {
        self.table.list()
    }

    /// Number of occupied table slots, the supervisor's own record included.
    pub fn process_count(&self) -> usize {
        self.table.len()
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.list()
    }

    pub fn process(&self, pid: LogicalPid) -> Result<ProcessSnapshot> {
        self.table.with_record(pid, |record| record.snapshot())
    }

    /// Bring a job to the foreground: resume it if stopped, then block until
    /// it exits. The finished job is dropped from the registry.
    pub fn foreground(&self, job_id: JobId) -> Result<i32> {
        let pid = self.jobs.pid_of(job_id)?;
        let stopped = self
            .table
            .with_record(pid, |record| record.state == ProcessState::Stopped)?;
        if stopped {
            self.resume(pid)?;
        }
        let code = control::wait(&self.table, pid)?;
        if self.jobs.remove(job_id).is_ok() {
            debug!("{job_id} finished in the foreground with code {code}");
        }
        Ok(code)
    }

    /// Keep a job in the background: resume it if stopped, otherwise a
    /// no-op.
    pub fn background(&self, job_id: JobId) -> Result<()> {
        let pid = self.jobs.pid_of(job_id)?;
        let stopped = self
            .table
            .with_record(pid, |record| record.state == ProcessState::Stopped)?;
        if stopped {
            self.resume(pid)?;
        }
        Ok(())
    }

    /// Take ownership of the captured stdout endpoint, if still present.
    /// The core never consumes captured output itself.
    pub fn take_stdout(&self, pid: LogicalPid) -> Result<Option<ChildStdout>> {
        self.table.with_record(pid, |record| record.stdout.take())
    }

    pub fn take_stderr(&self, pid: LogicalPid) -> Result<Option<ChildStderr>> {
        self.table.with_record(pid, |record| record.stderr.take())
    }

    pub fn take_stdin(&self, pid: LogicalPid) -> Result<Option<ChildStdin>> {
        self.table.with_record(pid, |record| record.stdin.take())
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
