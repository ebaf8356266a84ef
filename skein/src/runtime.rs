//! Interface to the patched language runtime that records traces and replays schedules.
//!
//! The analyzer core never talks to the runtime; only the fuzzing driver does, through
//! [RuntimeDriver]. The process implementation resolves the runtime binary under the directory
//! named by `RUNTIME_ROOT` and enforces the per-phase timeouts the flags configure.

use std::{
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::info;

/// Environment variable pointing at the patched runtime binary directory.
pub const RUNTIME_ROOT_ENV: &str = "RUNTIME_ROOT";

/// Name of the runtime binary inside the runtime root.
const RUNTIME_BIN: &str = "runtime";

/// Exit code with which the runtime signals that a replayed schedule reproduced a bug.
const BUG_EXIT_CODE: i32 = 42;

// ERRORS
// ================================================================================================

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{RUNTIME_ROOT_ENV} is not set; the record and replay phases need the patched runtime")]
    RootNotConfigured,
    #[error("runtime binary not found at {0}")]
    BinaryMissing(PathBuf),
    #[error("runtime phase timed out after {0:?}")]
    Timeout(Duration),
    #[error("runtime exited with status {0}")]
    Failed(i32),
    #[error("failed to launch runtime")]
    Launch(#[source] std::io::Error),
}

/// Outcome of a replay phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplayOutcome {
    /// The run completed without reproducing anything.
    Clean,
    /// The runtime reported the suspected bug as reproduced.
    BugConfirmed,
}

// RUNTIME DRIVER
// ================================================================================================

/// Record/replay entry points of the external runtime.
pub trait RuntimeDriver {
    /// Runs the program under the recording runtime, producing a trace file. `exec` selects an
    /// executable or test inside the program under test.
    fn record(
        &self,
        prog: &Path,
        exec: Option<&str>,
        trace_out: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError>;

    /// Re-executes the program honoring a replay-directives file.
    fn replay(
        &self,
        prog: &Path,
        directives: &Path,
        timeout: Duration,
    ) -> Result<ReplayOutcome, RuntimeError>;
}

/// Spawns the runtime as a child process.
#[derive(Clone, Debug)]
pub struct ProcessRuntime {
    binary: PathBuf,
}

impl ProcessRuntime {
    /// Resolves the runtime binary under `RUNTIME_ROOT`.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let root = std::env::var_os(RUNTIME_ROOT_ENV).ok_or(RuntimeError::RootNotConfigured)?;
        let binary = PathBuf::from(root).join(RUNTIME_BIN);
        if !binary.is_file() {
            return Err(RuntimeError::BinaryMissing(binary));
        }
        Ok(Self { binary })
    }

    fn run(&self, args: &[&std::ffi::OsStr], timeout: Duration) -> Result<i32, RuntimeError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(RuntimeError::Launch)?;
        wait_with_timeout(&mut child, timeout)
    }
}

impl RuntimeDriver for ProcessRuntime {
    fn record(
        &self,
        prog: &Path,
        exec: Option<&str>,
        trace_out: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        info!(prog = %prog.display(), "recording trace");
        let mut args: Vec<&std::ffi::OsStr> = vec![
            "record".as_ref(),
            prog.as_os_str(),
            "--trace".as_ref(),
            trace_out.as_os_str(),
        ];
        if let Some(exec) = exec {
            args.push("--exec".as_ref());
            args.push(exec.as_ref());
        }
        let status = self.run(&args, timeout)?;
        if status == 0 { Ok(()) } else { Err(RuntimeError::Failed(status)) }
    }

    fn replay(
        &self,
        prog: &Path,
        directives: &Path,
        timeout: Duration,
    ) -> Result<ReplayOutcome, RuntimeError> {
        info!(prog = %prog.display(), directives = %directives.display(), "replaying schedule");
        let status = self.run(
            &[
                "replay".as_ref(),
                prog.as_os_str(),
                "--directives".as_ref(),
                directives.as_os_str(),
            ],
            timeout,
        )?;
        match status {
            0 => Ok(ReplayOutcome::Clean),
            BUG_EXIT_CODE => Ok(ReplayOutcome::BugConfirmed),
            other => Err(RuntimeError::Failed(other)),
        }
    }
}

/// Polls the child until it exits or the timeout elapses; a timed-out child is killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<i32, RuntimeError> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(RuntimeError::Launch)? {
            return Ok(status.code().unwrap_or(-1));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Timeout(timeout));
        }
        thread::sleep(Duration::from_millis(50));
    }
}
