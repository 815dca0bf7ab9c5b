//! Runs the user's command and turns its termination into our exit status.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use nix::sys::signal::Signal;

/// Exit code reported for every failure that is not the child's own status.
pub const FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("cannot run command {command:?}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for command {command:?}")]
    Wait {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited(i32),
    Signaled(i32),
}

impl Outcome {
    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Outcome::Exited(code),
            (None, Some(signal)) => Outcome::Signaled(signal),
            // a waited-for child either exits or is killed
            (None, None) => Outcome::Signaled(0),
        }
    }

    /// The launcher's own exit code: the child's code passed through exactly,
    /// or a generic failure when it did not exit on its own.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Exited(code) => *code,
            Outcome::Signaled(_) => FAILURE_EXIT_CODE,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Exited(code) => write!(f, "exited with status {}", code),
            Outcome::Signaled(raw) => match Signal::try_from(*raw) {
                Ok(signal) => write!(f, "killed by {}", signal),
                Err(_) => write!(f, "killed by signal {}", raw),
            },
        }
    }
}

/// Spawn `command` with our stdin, stdout and stderr and block until it
/// terminates. There is no timeout.
pub fn run<P: AsRef<Path>>(command: P, args: &[String]) -> Result<Outcome, ExecutorError> {
    let command = command.as_ref();
    log::debug!("run {:?} with args {:?}", command, args);

    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            command: command.to_path_buf(),
            source,
        })?;
    log::debug!("command {:?} running as pid {}", command, child.id());

    let status = child.wait().map_err(|source| ExecutorError::Wait {
        command: command.to_path_buf(),
        source,
    })?;
    let outcome = Outcome::from_status(status);
    log::debug!("command {:?} {}", command, outcome);
    Ok(outcome)
}
