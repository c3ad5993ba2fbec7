//! The job registry: a secondary index over background processes.
//!
//! Jobs reference process records by logical pid, never by reaching into
//! them; everything stateful goes through the process table's own API, so
//! the two locks never nest.

use crate::error::{ProcessError, Result};
use crate::record::LogicalPid;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Sequential background-job identifier, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u32);

impl JobId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}", self.0)
    }
}

struct JobRecord {
    job_id: JobId,
    pid: LogicalPid,
    command_text: String,
    is_stopped: bool,
}

/// Point-in-time copy of a job entry.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub pid: LogicalPid,
    pub command_text: String,
    pub is_stopped: bool,
}

struct JobsInner {
    jobs: Vec<JobRecord>,
    next_id: u32,
}

pub(crate) struct JobRegistry {
    inner: Mutex<JobsInner>,
}

impl JobRegistry {
    pub(crate) fn new() -> Self {
        JobRegistry {
            inner: Mutex::new(JobsInner {
                jobs: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, pid: LogicalPid, command_text: String) -> JobId {
        let mut inner = self.lock();
        let job_id = JobId(inner.next_id);
        inner.next_id += 1;
        inner.jobs.push(JobRecord {
            job_id,
            pid,
            command_text,
            is_stopped: false,
        });
        debug!("{job_id} tracks {pid}");
        job_id
    }

    pub(crate) fn pid_of(&self, job_id: JobId) -> Result<LogicalPid> {
        self.lock()
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .map(|job| job.pid)
            .ok_or(ProcessError::JobNotFound(job_id))
    }

    /// Mirror the stopped flag of the underlying process, if a job tracks it.
    pub(crate) fn set_stopped(&self, pid: LogicalPid, stopped: bool) {
        if let Some(job) = self.lock().jobs.iter_mut().find(|job| job.pid == pid) {
            job.is_stopped = stopped;
        }
    }

    pub(crate) fn remove(&self, job_id: JobId) -> Result<()> {
        let mut inner = self.lock();
        let index = inner
            .jobs
            .iter()
            .position(|job| job.job_id == job_id)
            .ok_or(ProcessError::JobNotFound(job_id))?;
        inner.jobs.remove(index);
        Ok(())
    }

    /// Drop the job tracking `pid`, if any. Called whenever the underlying
    /// record is killed or reaped so no job dangles.
    pub(crate) fn remove_for_pid(&self, pid: LogicalPid) -> Option<JobId> {
        let mut inner = self.lock();
        let index = inner.jobs.iter().position(|job| job.pid == pid)?;
        let job = inner.jobs.remove(index);
        Some(job.job_id)
    }

    pub(crate) fn list(&self) -> Vec<JobSnapshot> {
        self.lock()
            .jobs
            .iter()
            .map(|job| JobSnapshot {
                job_id: job.job_id,
                pid: job.pid,
                command_text: job.command_text.clone(),
                is_stopped: job.is_stopped,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_sequential_from_one() {
        let registry = JobRegistry::new();
        let first = registry.add(LogicalPid(2), "sleep 5".to_string());
        let second = registry.add(LogicalPid(3), "sleep 6".to_string());
        assert_eq!(first, JobId(1));
        assert_eq!(second, JobId(2));
    }

    #[test]
    fn removal_by_pid_reports_the_job_id() {
        let registry = JobRegistry::new();
        let job_id = registry.add(LogicalPid(2), "sleep 5".to_string());
        assert_eq!(registry.remove_for_pid(LogicalPid(2)), Some(job_id));
        assert_eq!(registry.remove_for_pid(LogicalPid(2)), None);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn unknown_job_is_reported() {
        let registry = JobRegistry::new();
        assert!(matches!(
            registry.pid_of(JobId(9)).unwrap_err(),
            ProcessError::JobNotFound(JobId(9))
        ));
        assert!(matches!(
            registry.remove(JobId(9)).unwrap_err(),
            ProcessError::JobNotFound(_)
        ));
    }

    #[test]
    fn stopped_flag_follows_the_pid() {
        let registry = JobRegistry::new();
        registry.add(LogicalPid(2), "sleep 5".to_string());
        registry.set_stopped(LogicalPid(2), true);
        assert!(registry.list()[0].is_stopped);
        registry.set_stopped(LogicalPid(2), false);
        assert!(!registry.list()[0].is_stopped);
    }
}
