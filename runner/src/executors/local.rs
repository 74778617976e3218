use super::{CommandLine, Executor, ExecutorError, StepStatus};
use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, ExitStatus, Stdio},
    time::Instant,
};
use tracing::{debug, instrument};

/// Executor that runs commands as direct children, inheriting stdio
#[derive(Clone, Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub(super) fn status(status: ExitStatus) -> StepStatus {
        match (status.code(), status.signal()) {
            (Some(code), _) => StepStatus::Exited(code),
            (None, Some(signal)) => StepStatus::Signaled(signal),
            // neither code nor signal, only possible for stopped children
            (None, None) => StepStatus::Exited(1),
        }
    }
}

impl Executor for LocalExecutor {
    /// spawn the command and block until it terminates
    #[instrument(skip(self, command), fields(command = %command), level = "debug")]
    fn execute(&mut self, command: &CommandLine) -> Result<StepStatus, ExecutorError> {
        let start = Instant::now();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        debug!("Waiting on {}", child.id());
        let status = child.wait().map_err(|source| ExecutorError::Wait {
            program: command.program.clone(),
            source,
        })?;

        debug!(
            "Finished in {} ms | status: {}",
            start.elapsed().as_millis(),
            status
        );

        Ok(Self::status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shell(script: &str) -> CommandLine {
        let mut command = CommandLine::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn reports_exit_codes() {
        let mut executor = LocalExecutor;

        assert_eq!(
            executor.execute(&shell("exit 0")).unwrap(),
            StepStatus::Exited(0)
        );
        assert_eq!(
            executor.execute(&shell("exit 42")).unwrap(),
            StepStatus::Exited(42)
        );
    }

    #[test]
    fn reports_signals() {
        let mut executor = LocalExecutor;

        assert_eq!(
            executor.execute(&shell("kill -TERM $$")).unwrap(),
            StepStatus::Signaled(15)
        );
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let mut executor = LocalExecutor;
        let result = executor.execute(&CommandLine::new(PathBuf::from("/does/not/exist")));

        assert!(matches!(result, Err(ExecutorError::Spawn { .. })));
    }
}
