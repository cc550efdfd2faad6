use crate::types::{JobId, OutputBlob};
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// How the process actually ended, before any interpretation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Exited { code: i32 },
    Killed { signal: i32 },
}

impl From<ExitStatus> for Termination {
    #[cfg(unix)]
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited { code },
            (None, Some(signal)) => Termination::Killed { signal },
            // neither a code nor a signal: stopped/continued statuses are never returned by wait
            (None, None) => Termination::Exited { code: -1 },
        }
    }

    #[cfg(not(unix))]
    fn from(status: ExitStatus) -> Self {
        Termination::Exited {
            code: status.code().unwrap_or(-1),
        }
    }
}

#[cfg(unix)]
fn is_kill_signal(signal: i32) -> bool {
    signal == nix::sys::signal::Signal::SIGKILL as i32
}

#[cfg(not(unix))]
fn is_kill_signal(_signal: i32) -> bool {
    false
}

/// The interpreted result of running a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    TimedOut,
    Failed { code: i32 },
}

impl JobOutcome {
    /// Maps a raw termination onto an outcome.
    ///
    /// A forced kill (`SIGKILL`) is always a timeout, whoever sent it, and so is any unsuccessful
    /// termination once the deadline has fired. Exit codes are never reinterpreted: a process that
    /// calls `exit(137)` has failed with code 137. Other signals fail with the negated signal
    /// number.
    pub fn classify(termination: Termination, deadline_elapsed: bool) -> Self {
        match termination {
            Termination::Exited { code: 0 } => JobOutcome::Succeeded,
            _ if deadline_elapsed => JobOutcome::TimedOut,
            Termination::Killed { signal } if is_kill_signal(signal) => JobOutcome::TimedOut,
            Termination::Killed { signal } => JobOutcome::Failed { code: -signal },
            Termination::Exited { code } => JobOutcome::Failed { code },
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "succeeded"),
            JobOutcome::TimedOut => write!(f, "timed out"),
            JobOutcome::Failed { code } => write!(f, "failed with code {}", code),
        }
    }
}

/// Everything the runner learned about one finished job.
#[derive(Clone, Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub pid: Option<u32>,
    pub outcome: JobOutcome,
    pub termination: Termination,
    pub deadline_elapsed: bool,
    pub stdout: OutputBlob,
    pub stderr: OutputBlob,
    pub elapsed: Duration,
}
