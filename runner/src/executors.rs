mod local;
pub mod slurm;

pub use local::LocalExecutor;

use itertools::Itertools;
use nix::sys::signal::Signal;
use std::{
    ffi::{OsStr, OsString},
    fmt,
    io::Error,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// shell convention for a command that could not be started
pub const SPAWN_FAILURE_CODE: i32 = 127;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Failed to wait for {program:?}: {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Failed to write the batch script to {program:?}: {source}")]
    Stdin {
        program: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Failed to locate the dispatch executable: {0}")]
    CurrentExe(#[source] Error),
}

/// program plus arguments, kept as OsString to pass paths through untouched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            std::iter::once(self.program.as_os_str())
                .chain(self.args.iter().map(OsString::as_os_str))
                .map(OsStr::to_string_lossy)
                .join(" ")
        )
    }
}

/// Outcome of a single step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Exited(i32),
    Signaled(i32),
    SpawnFailed,
    Skipped,
}

impl StepStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0) | Self::Skipped)
    }

    /// exit code following shell conventions, 128 + n for signals and 127 if never started
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signal) => 128 + signal,
            Self::SpawnFailed => SPAWN_FAILURE_CODE,
            Self::Skipped => 0,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with {code}"),
            Self::Signaled(signal) => match Signal::try_from(*signal) {
                Ok(name) => write!(f, "terminated by {name}"),
                Err(_) => write!(f, "terminated by signal {signal}"),
            },
            Self::SpawnFailed => write!(f, "failed to start"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Runs a command to completion
pub trait Executor {
    fn execute(&mut self, command: &CommandLine) -> Result<StepStatus, ExecutorError>;
}
