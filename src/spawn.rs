//! Turning a command and argument vector into a running native process.

use crate::error::{ProcessError, Result};
use crate::record::{NativePid, ProcessHandle};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal as NixSignal};
use nix::unistd::Pid;
use std::process::{ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

/// Native command-line length limit of the host this core was modeled on.
/// A longer line fails the spawn instead of being truncated.
pub(crate) const MAX_COMMAND_LINE: usize = 32 * 1024;

/// Join command and arguments into a single display line, quoting any
/// argument that needs it so nothing is ambiguous or dropped.
pub(crate) fn assemble_command_line(command: &str, argv: &[String]) -> Result<String> {
    let line = shell_words::join(std::iter::once(command).chain(argv.iter().map(String::as_str)));
    if line.len() > MAX_COMMAND_LINE {
        return Err(ProcessError::CommandTooLong {
            length: line.len(),
            limit: MAX_COMMAND_LINE,
        });
    }
    Ok(line)
}

/// A freshly launched native process with its captured stdio endpoints.
///
/// The child-side pipe ends are closed by the spawn machinery as soon as the
/// native call returns; only the parent-side endpoints live here. Capture is
/// best-effort: an endpoint the runtime could not provide is `None`.
#[derive(Debug)]
pub(crate) struct SpawnedChild {
    pub(crate) handle: ProcessHandle,
    pub(crate) native_pid: NativePid,
    pub(crate) stdin: Option<ChildStdin>,
    pub(crate) stdout: Option<ChildStdout>,
    pub(crate) stderr: Option<ChildStderr>,
}

/// Launch the native process with all three stdio streams piped.
///
/// A launch failure surfaces the native error code and leaves nothing
/// allocated.
pub(crate) fn launch(command: &str, argv: &[String]) -> Result<SpawnedChild> {
    let mut cmd = Command::new(command);
    cmd.args(argv)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning native process: {command} {argv:?}");
    let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
        code: source.raw_os_error().unwrap_or(-1),
        source,
    })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let native_pid = NativePid(child.id());
    debug!("native process launched as {native_pid}");

    Ok(SpawnedChild {
        handle: ProcessHandle::new(child),
        native_pid,
        stdin,
        stdout,
        stderr,
    })
}

/// Terminate and reap a child that was launched but could not be tracked
/// (lost the race for the last table slot). Nothing may leak here.
pub(crate) fn abort(handle: &ProcessHandle, native_pid: NativePid) {
    match signal::kill(Pid::from_raw(native_pid.as_u32() as i32), NixSignal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!("could not terminate untracked {native_pid}: {errno}"),
    }
    if let Some(Err(err)) = handle.reap_if_uncontended() {
        warn!("could not reap untracked {native_pid}: {err}");
    }
}
