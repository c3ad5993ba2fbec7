//! Integration tests driving real child processes through the full
//! lifecycle: spawn, suspend/resume, wait, kill, stats refresh, reap.

#![cfg(unix)]

use anyhow::Result;
use prochost::{
    JobId, LogicalPid, Priority, ProcessError, ProcessState, Signal, Spawned, Supervisor,
};
use rstest::rstest;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn args(argv: &[&str]) -> Vec<String> {
    argv.iter().map(|s| s.to_string()).collect()
}

fn spawn_background(sup: &Supervisor, command: &str, argv: &[&str]) -> (JobId, LogicalPid) {
    match sup.spawn(command, &args(argv), true).unwrap() {
        Spawned::Background { job_id, pid } => (job_id, pid),
        other => panic!("expected a background spawn, got {other:?}"),
    }
}

#[test_log::test]
fn foreground_spawn_blocks_and_returns_exit_code() -> Result<()> {
    let sup = Supervisor::new();
    let Spawned::Exited(code) = sup.spawn("echo", &args(&["hello"]), false)? else {
        panic!("foreground spawn must report an exit code");
    };
    assert_eq!(code, 0);

    // The record is left behind as a zombie until it is reaped.
    let listing = sup.list();
    assert_eq!(listing.len(), 2);
    let record = &listing[1];
    assert_eq!(record.pid, LogicalPid(2));
    assert_eq!(record.state, ProcessState::Zombie);
    assert_eq!(record.exit_code, Some(0));

    // Captured output stays readable after the exit.
    let mut stdout = sup.take_stdout(record.pid)?.expect("stdout was captured");
    let mut output = String::new();
    stdout.read_to_string(&mut output)?;
    assert_eq!(output, "hello\n");

    sup.reap(record.pid)?;
    assert_eq!(sup.list().len(), 1);
    Ok(())
}

#[test_log::test]
fn foreground_exit_codes_propagate() -> Result<()> {
    let sup = Supervisor::new();
    let Spawned::Exited(code) = sup.spawn("sh", &args(&["-c", "exit 7"]), false)? else {
        panic!("foreground spawn must report an exit code");
    };
    assert_eq!(code, 7);
    Ok(())
}

#[test_log::test]
fn background_job_suspend_resume_kill() -> Result<()> {
    let sup = Supervisor::new();
    let (job_id, pid) = spawn_background(&sup, "sleep", &["5"]);
    assert_eq!(job_id, JobId(1));
    assert_eq!(pid, LogicalPid(2));
    assert_eq!(sup.process(pid)?.state, ProcessState::Running);

    sup.suspend(pid)?;
    assert_eq!(sup.process(pid)?.state, ProcessState::Stopped);
    assert!(sup.list_jobs()[0].is_stopped);

    sup.resume(pid)?;
    assert_eq!(sup.process(pid)?.state, ProcessState::Running);
    assert!(!sup.list_jobs()[0].is_stopped);

    sup.kill(pid, Signal::Terminate)?;
    let record = sup.process(pid)?;
    assert_eq!(record.state, ProcessState::Dead);
    assert_eq!(record.exit_code, Some(15));

    // The job went away with the kill, in the same operation.
    assert!(sup.list_jobs().is_empty());

    sup.reap(pid)?;
    assert!(matches!(
        sup.process(pid),
        Err(ProcessError::NotFound(_))
    ));
    Ok(())
}

#[test_log::test]
fn wait_is_idempotent_after_exit() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "sh", &["-c", "exit 3"]);
    assert_eq!(sup.wait(pid)?, 3);
    assert_eq!(sup.wait(pid)?, 3);
    assert_eq!(sup.process(pid)?.state, ProcessState::Zombie);
    Ok(())
}

#[rstest]
#[case(Signal::Terminate)]
#[case(Signal::Interrupt)]
#[case(Signal::Stop)]
#[case(Signal::Continue)]
fn supervisor_pid_is_protected(#[case] signal: Signal) {
    let sup = Supervisor::new();
    let err = sup.kill(LogicalPid::SUPERVISOR, signal).unwrap_err();
    assert!(matches!(err, ProcessError::Protected(LogicalPid(1))));
    // The supervisor record is still there.
    assert_eq!(sup.list()[0].pid, LogicalPid::SUPERVISOR);
}

#[test_log::test]
fn operations_on_unknown_pids_report_not_found() {
    let sup = Supervisor::new();
    let pid = LogicalPid(999);
    assert!(matches!(
        sup.kill(pid, Signal::Terminate).unwrap_err(),
        ProcessError::NotFound(LogicalPid(999))
    ));
    assert!(matches!(
        sup.suspend(pid).unwrap_err(),
        ProcessError::NotFound(_)
    ));
    assert!(matches!(
        sup.wait(pid).unwrap_err(),
        ProcessError::NotFound(_)
    ));
    assert!(matches!(
        sup.foreground(JobId(9)).unwrap_err(),
        ProcessError::JobNotFound(JobId(9))
    ));
}

#[test_log::test]
fn foreground_waits_for_a_background_job() -> Result<()> {
    let sup = Supervisor::new();
    let (job_id, _) = spawn_background(&sup, "sh", &["-c", "sleep 0.2; exit 7"]);
    assert_eq!(sup.foreground(job_id)?, 7);
    assert!(sup.list_jobs().is_empty());
    Ok(())
}

#[test_log::test]
fn foreground_resumes_a_stopped_job_before_waiting() -> Result<()> {
    let sup = Supervisor::new();
    let (job_id, pid) = spawn_background(&sup, "sh", &["-c", "sleep 0.2; exit 4"]);
    sup.suspend(pid)?;
    // A stopped job can never exit; foreground must resume it first.
    assert_eq!(sup.foreground(job_id)?, 4);
    Ok(())
}

#[test_log::test]
fn background_resumes_a_stopped_job() -> Result<()> {
    let sup = Supervisor::new();
    let (job_id, pid) = spawn_background(&sup, "sleep", &["5"]);
    sup.suspend(pid)?;
    sup.background(job_id)?;
    assert_eq!(sup.process(pid)?.state, ProcessState::Running);

    // Already-running jobs are a no-op.
    sup.background(job_id)?;
    assert_eq!(sup.process(pid)?.state, ProcessState::Running);

    sup.kill(pid, Signal::Terminate)?;
    Ok(())
}

#[test_log::test]
fn remove_job_leaves_the_record_alone() -> Result<()> {
    let sup = Supervisor::new();
    let (job_id, pid) = spawn_background(&sup, "sleep", &["2"]);
    assert_eq!(sup.process_count(), 2);
    sup.remove_job(job_id)?;
    assert!(sup.list_jobs().is_empty());
    assert_eq!(sup.process(pid)?.state, ProcessState::Running);
    sup.kill(pid, Signal::Terminate)?;
    Ok(())
}

#[test_log::test]
fn stats_refresh_updates_counters_for_a_live_process() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "sleep", &["2"]);
    thread::sleep(Duration::from_millis(100));

    sup.refresh_stats(pid)?;
    let record = sup.process(pid)?;
    assert_eq!(record.state, ProcessState::Running);
    assert!(record.peak_memory >= record.memory_used);
    assert!(record.cpu_percent >= 0.0);

    sup.kill(pid, Signal::Terminate)?;
    Ok(())
}

#[test_log::test]
fn stats_refresh_detects_a_natural_exit() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "true", &[]);
    thread::sleep(Duration::from_millis(200));

    // Not an error: this is the designed exit-detection path.
    sup.refresh_stats(pid)?;
    let record = sup.process(pid)?;
    assert_eq!(record.state, ProcessState::Zombie);
    assert_eq!(record.exit_code, Some(0));

    // The native identity is gone now, so a further refresh is NotFound.
    assert!(matches!(
        sup.refresh_stats(pid).unwrap_err(),
        ProcessError::NotFound(_)
    ));
    Ok(())
}

#[test_log::test]
fn control_after_exit_detection_reports_not_found() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "sh", &["-c", "exit 0"]);
    sup.wait(pid)?;

    // The handle is closed; suspend/resume must say so, not silently no-op.
    assert!(matches!(
        sup.suspend(pid).unwrap_err(),
        ProcessError::NotFound(_)
    ));
    assert!(matches!(
        sup.resume(pid).unwrap_err(),
        ProcessError::NotFound(_)
    ));
    Ok(())
}

#[test_log::test]
fn pids_and_job_ids_stay_unique_and_sequential() -> Result<()> {
    let sup = Supervisor::new();
    let mut pids = Vec::new();
    for _ in 0..3 {
        let (job_id, pid) = spawn_background(&sup, "sleep", &["3"]);
        assert!(!pids.contains(&pid));
        pids.push(pid);
        assert_eq!(job_id.as_u32() as usize, pids.len());
    }
    assert_eq!(pids, vec![LogicalPid(2), LogicalPid(3), LogicalPid(4)]);

    for pid in pids {
        sup.kill(pid, Signal::Terminate)?;
        sup.reap(pid)?;
    }
    // Reaped pids are never handed out again.
    let (_, next) = spawn_background(&sup, "sleep", &["1"]);
    assert_eq!(next, LogicalPid(5));
    sup.kill(next, Signal::Terminate)?;
    Ok(())
}

#[test_log::test]
fn oversized_command_lines_are_rejected_before_launch() {
    let sup = Supervisor::new();
    let before = sup.list().len();
    let err = sup.spawn("echo", &["x".repeat(40_000)], false).unwrap_err();
    assert!(matches!(err, ProcessError::CommandTooLong { .. }));
    assert_eq!(sup.list().len(), before);
}

#[test_log::test]
fn failed_launches_surface_the_native_code_and_track_nothing() {
    let sup = Supervisor::new();
    let err = sup
        .spawn("/nonexistent/not-a-real-binary", &[], true)
        .unwrap_err();
    match err {
        ProcessError::SpawnFailed { code, .. } => assert_eq!(code, libc::ENOENT),
        other => panic!("expected SpawnFailed, got {other:?}"),
    }
    assert_eq!(sup.list().len(), 1);
    assert!(sup.list_jobs().is_empty());
}

#[test_log::test]
fn set_priority_applies_a_lower_priority() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "sleep", &["2"]);
    // Lowering priority needs no privileges.
    sup.set_priority(pid, Priority::Low)?;
    assert_eq!(sup.process(pid)?.priority, Priority::Low);
    sup.kill(pid, Signal::Terminate)?;
    Ok(())
}

#[test_log::test]
fn kill_racing_an_in_flight_wait_yields_one_verdict() -> Result<()> {
    let sup = Arc::new(Supervisor::new());
    let (_, pid) = spawn_background(&sup, "sleep", &["5"]);

    let waiter = {
        let sup = Arc::clone(&sup);
        thread::spawn(move || sup.wait(pid))
    };
    thread::sleep(Duration::from_millis(100));
    sup.kill(pid, Signal::Terminate)?;

    // The waiter observes the termination; whichever side recorded the
    // verdict first wins, and both report the same code afterwards.
    let waited = waiter.join().expect("waiter panicked")?;
    assert!([15, 137].contains(&waited), "unexpected code {waited}");
    assert_eq!(sup.wait(pid)?, waited);

    let record = sup.process(pid)?;
    assert!(record.state.is_terminal());
    assert!(sup.list_jobs().is_empty());
    Ok(())
}

#[test_log::test]
fn stdin_channel_feeds_the_child() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "cat", &[]);

    let mut stdin = sup.take_stdin(pid)?.expect("stdin was captured");
    std::io::Write::write_all(&mut stdin, b"ping\n")?;
    drop(stdin); // EOF lets cat exit

    assert_eq!(sup.wait(pid)?, 0);
    let mut stdout = sup.take_stdout(pid)?.expect("stdout was captured");
    let mut output = String::new();
    stdout.read_to_string(&mut output)?;
    assert_eq!(output, "ping\n");
    Ok(())
}

#[test_log::test]
fn snapshots_serialize_for_display() -> Result<()> {
    let sup = Supervisor::new();
    let (_, pid) = spawn_background(&sup, "sleep", &["1"]);

    let listing = serde_json::to_value(sup.list())?;
    assert_eq!(listing[0]["pid"], 1);
    assert_eq!(listing[0]["name"], "supervisor");
    assert_eq!(listing[1]["state"], "Running");

    let jobs = serde_json::to_value(sup.list_jobs())?;
    assert_eq!(jobs[0]["command_text"], "sleep 1");

    sup.kill(pid, Signal::Terminate)?;
    Ok(())
}

#[test_log::test]
fn dropping_the_supervisor_tears_down_live_children() {
    let native = {
        let sup = Supervisor::new();
        let (_, pid) = spawn_background(&sup, "sleep", &["30"]);
        sup.process(pid).unwrap().native_pid.unwrap()
    };
    // Teardown killed and reaped the child; signal 0 probes existence.
    thread::sleep(Duration::from_millis(100));
    let alive = unsafe { libc::kill(native.as_u32() as i32, 0) } == 0;
    assert!(!alive, "child survived supervisor teardown");
}
