//! C1 — Path & Process Utilities.
//!
//! Grounded on `src/cmd/command.rs` (`QoveryCommand`, `CommandKiller`,
//! `ExecutableCommand`): a subprocess wrapper that streams stdout/stderr line
//! by line, supports cooperative cancellation via a `CommandKiller`, and
//! escalates an unresponsive child from SIGINT to SIGKILL after a grace
//! period. The scheduler (C10) and unit runner (C9) are the only callers.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use itertools::Itertools;
use timeout_readwrite::TimeoutReader;

use crate::process::ProcessError::{ExecutionError, ExitStatusError, Killed, TimeoutError};

const LOGGING_INTERVAL: Duration = Duration::from_secs(120);

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("error while executing command")]
    ExecutionError(#[from] Error),

    #[error("command terminated with a non success exit status code: {0}")]
    ExitStatusError(ExitStatus),

    #[error("command killed due to timeout: {0}")]
    TimeoutError(String),

    #[error("command killed by cancellation: {0}")]
    Killed(String),
}

/// Alias kept for readability at call sites in C9/C10.
pub type CommandError = ProcessError;

#[derive(Debug, Clone)]
pub enum AbortReason {
    Timeout(Duration),
    Cancelled(String),
}

impl AbortReason {
    pub fn is_cancel(&self) -> bool {
        matches!(self, AbortReason::Cancelled(_))
    }
}

pub enum KillerTrigger<'a> {
    Timeout(Instant, Duration),
    Cancelable(&'a dyn Fn() -> bool),
}

impl<'a> KillerTrigger<'a> {
    pub fn should_abort(&self) -> Option<AbortReason> {
        match self {
            KillerTrigger::Timeout(since, timeout) => {
                if &since.elapsed() >= timeout {
                    Some(AbortReason::Timeout(*timeout))
                } else {
                    None
                }
            }
            KillerTrigger::Cancelable(func) => {
                if (func)() {
                    Some(AbortReason::Cancelled("cancellation token set".to_string()))
                } else {
                    None
                }
            }
        }
    }
}

/// Composes up to two abort triggers (a deadline and a cancellation flag),
/// matching the scheduler's need to both honour `--fail-fast`/SIGINT *and*
/// a per-unit timeout.
pub enum CommandKiller<'a> {
    None,
    One(KillerTrigger<'a>),
    Two(KillerTrigger<'a>, KillerTrigger<'a>),
}

impl<'a> CommandKiller<'a> {
    pub fn should_abort(&self) -> Option<AbortReason> {
        match self {
            CommandKiller::None => None,
            CommandKiller::One(t) => t.should_abort(),
            CommandKiller::Two(a, b) => a.should_abort().or_else(|| b.should_abort()),
        }
    }

    pub fn never() -> CommandKiller<'a> {
        CommandKiller::None
    }

    pub fn from_timeout(timeout: Duration) -> CommandKiller<'a> {
        CommandKiller::One(KillerTrigger::Timeout(Instant::now(), timeout))
    }

    pub fn from_cancelable(is_cancelled: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        CommandKiller::One(KillerTrigger::Cancelable(is_cancelled))
    }

    pub fn from(timeout: Duration, is_cancelled: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        CommandKiller::Two(
            KillerTrigger::Timeout(Instant::now(), timeout),
            KillerTrigger::Cancelable(is_cancelled),
        )
    }
}

/// A subprocess invocation, streaming output line by line.
pub struct ProcessRunner {
    command: Command,
    kill_grace_period: Duration,
}

impl ProcessRunner {
    pub fn new<P: AsRef<OsStr>>(binary: P, args: &[&str], envs: &[(&str, &str)]) -> ProcessRunner {
        let mut command = Command::new(binary.as_ref());
        command.args(args);
        for (k, v) in envs {
            command.env(k, v);
        }
        ProcessRunner {
            command,
            kill_grace_period: Duration::from_secs(crate::constants::DEFAULT_KILL_GRACE_PERIOD_SECS),
        }
    }

    pub fn set_kill_grace_period(&mut self, grace_period: Duration) {
        self.kill_grace_period = grace_period;
    }

    pub fn set_current_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.command.current_dir(dir);
    }

    pub fn args(&self) -> Vec<String> {
        self.command.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn kill(&self, child: &mut Child) {
        warn!("killing command: {:?}", child);
        #[cfg(unix)]
        unsafe {
            let pid = child.id() as i32;
            let _ = libc::kill(pid, libc::SIGINT);
        }
        let killed_since = Instant::now();
        while let Ok(None) = child.try_wait() {
            if killed_since.elapsed() > self.kill_grace_period {
                warn!("command still running after grace period, hard killing it");
                let _ = child.kill();
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        let _ = child.wait();
    }

    pub fn exec(&mut self) -> Result<(), ProcessError> {
        self.exec_with_abort(&mut |line| info!("{line}"), &mut |line| warn!("{line}"), &CommandKiller::never())
    }

    pub fn exec_with_output<O, E>(&mut self, stdout: &mut O, stderr: &mut E) -> Result<(), ProcessError>
    where
        O: FnMut(String),
        E: FnMut(String),
    {
        self.exec_with_abort(stdout, stderr, &CommandKiller::never())
    }

    pub fn exec_with_abort<O, E>(
        &mut self,
        stdout_sink: &mut O,
        stderr_sink: &mut E,
        abort_notifier: &CommandKiller,
    ) -> Result<(), ProcessError>
    where
        O: FnMut(String),
        E: FnMut(String),
    {
        debug!("command: {:?}", self.command);
        let mut child = self.command.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn().map_err(ExecutionError)?;

        let reader_timeout = Duration::from_secs(1);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError(Error::new(ErrorKind::BrokenPipe, "cannot get stdout for command")))?;
        let mut stdout_reader = BufReader::new(TimeoutReader::new(stdout, reader_timeout)).lines();

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError(Error::new(ErrorKind::BrokenPipe, "cannot get stderr for command")))?;
        let mut stderr_reader = BufReader::new(TimeoutReader::new(stderr, Duration::from_secs(0))).lines();

        let mut stdout_closed = false;
        let mut stderr_closed = false;
        let mut last_log = Instant::now();

        while !stdout_closed || !stderr_closed {
            if abort_notifier.should_abort().is_some() {
                break;
            }

            while !stdout_closed {
                let line = match stdout_reader.next() {
                    Some(line) => line,
                    None => {
                        stdout_closed = true;
                        break;
                    }
                };
                match line {
                    Err(ref err) if err.kind() == ErrorKind::TimedOut => {
                        if last_log.elapsed() > LOGGING_INTERVAL {
                            stderr_sink("still running, no output available...".to_string());
                            last_log = Instant::now();
                        }
                        break;
                    }
                    Ok(line) => stdout_sink(line),
                    Err(err) => {
                        error!("error on stdout of command: {err:?}");
                        stdout_closed = true;
                        break;
                    }
                }
                if abort_notifier.should_abort().is_some() {
                    stdout_closed = true;
                    stderr_closed = true;
                    break;
                }
            }

            while !stderr_closed {
                let line = match stderr_reader.next() {
                    Some(line) => line,
                    None => {
                        stderr_closed = true;
                        break;
                    }
                };
                match line {
                    Err(ref err) if err.kind() == ErrorKind::TimedOut => break,
                    Ok(line) => stderr_sink(line),
                    Err(err) => {
                        error!("error on stderr of command: {err:?}");
                        stderr_closed = true;
                        break;
                    }
                }
                if abort_notifier.should_abort().is_some() {
                    stdout_closed = true;
                    stderr_closed = true;
                    break;
                }
            }
        }

        let exit_status;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    exit_status = status;
                    break;
                }
                Ok(None) => match abort_notifier.should_abort() {
                    None => {}
                    Some(reason) => {
                        warn!("killing process due to {reason:?}");
                        self.kill(&mut child);
                        while let Some(Ok(line)) = stdout_reader.next() {
                            stdout_sink(line);
                        }
                        while let Some(Ok(line)) = stderr_reader.next() {
                            stderr_sink(line);
                        }
                        return if reason.is_cancel() {
                            Err(Killed(format!("{reason:?}")))
                        } else {
                            Err(TimeoutError(format!("{reason:?}")))
                        };
                    }
                },
                Err(err) => return Err(ExecutionError(err)),
            }
            std::thread::sleep(Duration::from_millis(250));
        }

        if !exit_status.success() {
            return Err(ExitStatusError(exit_status));
        }
        Ok(())
    }
}

pub fn does_binary_exist<S: AsRef<OsStr>>(binary: S) -> bool {
    Command::new(binary).stdout(Stdio::null()).stdin(Stdio::null()).stderr(Stdio::null()).spawn().map(|mut c| c.wait()).is_ok()
}

pub fn command_to_string<P: AsRef<Path>>(binary: P, args: &[&str], envs: &[(&str, &str)]) -> String {
    let env_str = envs.iter().map(|(k, v)| format!("{k}={v}")).join(" ");
    format!("{} {} {}", env_str, binary.as_ref().display(), args.join(" "))
}

/// Joins a unit's absolute path with a relative output root, without
/// normalising `..` segments away (matching `std::path::Path::join`
/// semantics; normalisation is left to the caller when it matters, e.g. when
/// deriving a backend state key).
pub fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    base.join(relative)
}

/// Creates a fresh, empty temp directory under `parent`, used for staging
/// a unit's working copy and for `sops`/archive extraction scratch space.
pub fn make_scratch_dir(parent: &Path, prefix: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(parent)?;
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
    Ok(dir.keep())
}

/// Runs `task` on the current thread while a background thread calls
/// `heartbeat(elapsed)` once per `interval` until `task` returns, so a
/// long-running unit still produces a log line even during a stretch with no
/// process output. The background thread is told to stop via a oneshot
/// completion signal rather than a polled flag.
pub fn log_heartbeat_while<R>(interval: Duration, heartbeat: impl Fn(Duration) + Send + 'static, task: impl FnOnce() -> R) -> R {
    let (tx, rx) = oneshot::channel::<()>();
    let start = Instant::now();
    let monitor = std::thread::Builder::new()
        .name("unit-heartbeat".to_string())
        .spawn(move || loop {
            match rx.recv_timeout(interval) {
                Ok(()) => return,
                Err(oneshot::RecvTimeoutError::Timeout) => heartbeat(start.elapsed()),
                Err(oneshot::RecvTimeoutError::Disconnected) => return,
            }
        })
        .ok();

    let result = task();
    let _ = tx.send(());
    if let Some(handle) = monitor {
        let _ = handle.join();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_binary_exist() {
        assert!(!does_binary_exist("definitely-not-a-real-binary"));
        assert!(does_binary_exist("ls"));
    }

    #[test]
    fn test_exit_status_error() {
        let mut cmd = ProcessRunner::new("false", &[], &[]);
        assert!(matches!(cmd.exec(), Err(ProcessError::ExitStatusError(_))));
    }

    #[test]
    fn test_timeout() {
        let mut cmd = ProcessRunner::new("sleep", &["30"], &[]);
        let ret = cmd.exec_with_abort(&mut |_| {}, &mut |_| {}, &CommandKiller::from_timeout(Duration::from_secs(1)));
        assert!(matches!(ret, Err(ProcessError::TimeoutError(_))));
    }

    #[test]
    fn test_cancellation() {
        let mut cmd = ProcessRunner::new("sleep", &["30"], &[]);
        let should_kill = Arc::new(AtomicBool::new(false));
        let should_kill2 = should_kill.clone();
        let barrier = Arc::new(Barrier::new(2));
        let barrier2 = barrier.clone();
        thread::spawn(move || {
            barrier2.wait();
            thread::sleep(Duration::from_millis(300));
            should_kill.store(true, Ordering::Release);
        });
        let is_cancelled = move || should_kill2.load(Ordering::Acquire);
        let killer = CommandKiller::from_cancelable(&is_cancelled);
        barrier.wait();
        let ret = cmd.exec_with_abort(&mut |_| {}, &mut |_| {}, &killer);
        assert!(matches!(ret, Err(ProcessError::Killed(_))));
    }
}
