//! On-demand resource statistics, refreshed from the native OS counters.

use crate::control::exit_code_of;
use crate::error::{ProcessError, Result};
use crate::record::{LogicalPid, ProcessState};
use crate::table::ProcessTable;
use log::debug;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

pub(crate) struct StatsCollector {
    system: Mutex<System>,
    cores: usize,
}

impl StatsCollector {
    pub(crate) fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        StatsCollector {
            system: Mutex::new(system),
            cores,
        }
    }

    /// Refresh the record's counters from the native OS.
    ///
    /// This is also the designed exit-detection path: a child found to have
    /// exited transitions the record to `Zombie` with its native exit code,
    /// which is not an error. `NotFound` when the pid is unknown or its
    /// native identity is already gone.
    pub(crate) fn refresh(&self, table: &ProcessTable, pid: LogicalPid) -> Result<()> {
        let (handle, native, started) = table.with_record(pid, |record| {
            (record.handle.clone(), record.native_pid, record.started)
        })?;
        let Some(native) = native else {
            return Err(ProcessError::NotFound(pid));
        };

        if let Some(handle) = &handle {
            match handle.try_status() {
                Ok(Some(status)) => {
                    let code = exit_code_of(&status);
                    debug!("{pid} found exited during stats refresh, code {code}");
                    return table.with_record(pid, |record| {
                        if !record.state.is_terminal() {
                            record.state = ProcessState::Zombie;
                            record.exit_code = Some(code);
                            record.close_handle();
                        }
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    debug!("status poll of {native} failed: {err}");
                }
            }
        }

        let sys_pid = SysPid::from_u32(native.as_u32());
        let refresh_kind = ProcessRefreshKind::nothing()
            .with_memory()
            .with_cpu()
            .with_disk_usage();

        let (memory, cpu_ms, disk_read, disk_written) = {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            let found = system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[sys_pid]),
                true,
                refresh_kind,
            );
            if found == 0 {
                // The native process vanished between the status poll and the
                // query; the next wait or refresh will record the exit.
                debug!("{native} is no longer visible to the system query");
                return Ok(());
            }
            let Some(process) = system.process(sys_pid) else {
                return Ok(());
            };
            let disk = process.disk_usage();
            (
                process.memory(),
                process.accumulated_cpu_time(),
                disk.total_read_bytes,
                disk.total_written_bytes,
            )
        };

        let elapsed_ms = started.elapsed().as_millis().max(1) as f64;
        let ceiling = (self.cores * 100) as f64;
        let cpu_percent = (100.0 * cpu_ms as f64 / elapsed_ms).clamp(0.0, ceiling) as f32;

        table.with_record(pid, |record| {
            record.memory_used = memory;
            record.peak_memory = record.peak_memory.max(memory);
            record.read_bytes = disk_read;
            record.written_bytes = disk_written;
            record.cpu_percent = cpu_percent;
        })
    }
}
