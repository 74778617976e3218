#[cfg(test)]
mod dispatcher_test;

use crate::{
    config::{ConfigErrors, JobConfig},
    executors::{CommandLine, Executor, ExecutorError, StepStatus},
    request::JobInvocation,
    sync::SyncTask,
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Independent outcome of both steps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub job: StepStatus,
    pub sync: StepStatus,
}

impl DispatchReport {
    /// the job decides the exit code, a failed sync is only logged
    pub fn exit_code(&self) -> i32 {
        self.job.exit_code()
    }
}

/// Runs the job and afterwards backs up its results
#[derive(Debug)]
pub struct Dispatcher<E: Executor> {
    job: JobConfig,
    sync: Option<SyncTask>,
    executor: E,
}

impl<E: Executor> Dispatcher<E> {
    pub fn new(job: JobConfig, sync: Option<SyncTask>, executor: E) -> Self {
        Self {
            job,
            sync,
            executor,
        }
    }

    pub fn job_command(&self, invocation: &JobInvocation) -> CommandLine {
        let mut command = CommandLine::new(&self.job.exec);
        command
            .args(&self.job.params)
            .args(invocation.argv(&self.job.index_flag));

        command
    }

    /// run the job, then the sync regardless of how the job ended
    #[instrument(skip(self), level = "info")]
    pub fn run(&mut self, invocation: &JobInvocation) -> DispatchReport {
        let job = self.run_job(invocation);
        let sync = self.run_sync();

        info!(job = %job, sync = %sync, "Dispatch finished");

        DispatchReport { job, sync }
    }

    fn run_job(&mut self, invocation: &JobInvocation) -> StepStatus {
        let command = self.job_command(invocation);
        info!(index = ?invocation.array_index, "Starting job: {command}");

        match self.executor.execute(&command) {
            Ok(status) => {
                if status.success() {
                    info!("Job {status}");
                } else {
                    error!("Job {status}");
                }

                status
            }
            Err(e @ ExecutorError::Spawn { .. }) => {
                error!("Job could not be started: {e}");

                StepStatus::SpawnFailed
            }
            Err(e) => {
                error!("Job was started but its exit status is unknown: {e}");

                StepStatus::Exited(1)
            }
        }
    }

    fn run_sync(&mut self) -> StepStatus {
        let Some(task) = &self.sync else {
            info!("Sync is disabled, results stay local");
            return StepStatus::Skipped;
        };

        let command = task.command_line();
        info!(
            source = ?task.source,
            destination = %task.destination,
            "Starting sync: {command}"
        );

        match self.executor.execute(&command) {
            Ok(status) => {
                if status.success() {
                    info!("Sync {status}");
                } else {
                    warn!("Sync {status}, results were not backed up");
                }

                status
            }
            Err(e @ ExecutorError::Spawn { .. }) => {
                warn!("Sync could not be started, results were not backed up: {e}");

                StepStatus::SpawnFailed
            }
            Err(e) => {
                warn!("Sync was started but its exit status is unknown: {e}");

                StepStatus::Exited(1)
            }
        }
    }
}
