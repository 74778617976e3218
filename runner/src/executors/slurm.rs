/*
 * Submission of a dispatch run as a Slurm job array:
 * 1. Render a batch script with resource directives (gpus, cpus, array range, ...)
 * 2. The script body execs `dispatch run` so every array task goes through the same
 *    job + sync pipeline, Slurm supplies SLURM_ARRAY_TASK_ID per task
 * 3. Either print the script or pipe it into sbatch
 */

use super::{CommandLine, ExecutorError, LocalExecutor, StepStatus};
use crate::config::SlurmConfig;
use itertools::Itertools;
use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::{debug, info, instrument};

#[derive(Debug)]
pub struct SlurmExecutor {
    config: SlurmConfig,
    // dispatch binary called from within the batch script
    dispatch: PathBuf,
    config_path: PathBuf,
}

impl SlurmExecutor {
    pub fn load(config: SlurmConfig, dispatch: PathBuf, config_path: PathBuf) -> Self {
        Self {
            config,
            dispatch,
            config_path,
        }
    }

    pub fn render(&self, args: &[String]) -> String {
        let config = &self.config;
        let mut directives = vec![format!("--job-name={}", config.job_name)];

        if config.gpus > 0 {
            directives.push(format!("--gres=gpu:{}", config.gpus));
        }
        directives.push(format!("--cpus-per-task={}", config.cpus));
        if let Some(array) = &config.array {
            directives.push(format!("--array={array}"));
        }
        if let Some(partition) = &config.partition {
            directives.push(format!("--partition={partition}"));
        }
        if let Some(time) = &config.time {
            directives.push(format!("--time={time}"));
        }
        directives.push(format!("--output={}", config.output));

        let command = [
            "exec".to_string(),
            shell_quote(&self.dispatch.to_string_lossy()),
            "run".to_string(),
            "--config".to_string(),
            shell_quote(&self.config_path.to_string_lossy()),
            "--".to_string(),
        ]
        .into_iter()
        .chain(args.iter().map(|arg| shell_quote(arg)))
        .join(" ");

        let mut script = String::with_capacity(512);
        script.push_str("#!/bin/bash\n");
        for directive in directives {
            script.push_str(&format!("#SBATCH {directive}\n"));
        }
        script.push('\n');
        script.push_str(&command);
        script.push('\n');

        script
    }

    /// pipe the script into sbatch and wait for the submission to finish
    #[instrument(skip(self, script), level = "info")]
    pub fn submit(&self, script: &str) -> Result<StepStatus, ExecutorError> {
        self.submit_with(&CommandLine::new("sbatch"), script)
    }

    fn submit_with(&self, sbatch: &CommandLine, script: &str) -> Result<StepStatus, ExecutorError> {
        let mut child = Command::new(&sbatch.program)
            .args(&sbatch.args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: sbatch.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .map_err(|source| ExecutorError::Stdin {
                    program: sbatch.program.clone(),
                    source,
                })?;
            // closing stdin marks the end of the script
            drop(stdin);
        }

        debug!("sbatch waiting on {}", child.id());
        let status = child.wait().map_err(|source| ExecutorError::Wait {
            program: sbatch.program.clone(),
            source,
        })?;

        let status = LocalExecutor::status(status);
        info!(job_name = %self.config.job_name, "Submission {status}");

        Ok(status)
    }
}

/// quote a word for bash, words made of safe characters are left as they are
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));

    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
