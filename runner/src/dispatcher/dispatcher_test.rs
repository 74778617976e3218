use super::{DispatchReport, Dispatcher};
use crate::{
    config::{Environment, JobConfig, SyncConfig},
    executors::{CommandLine, Executor, ExecutorError, LocalExecutor, StepStatus},
    request::JobInvocation,
    sync::SyncTask,
};
use std::{
    collections::VecDeque,
    ffi::OsString,
    fs,
    io::{Error, ErrorKind},
    path::{Path, PathBuf},
};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy)]
enum Response {
    Status(StepStatus),
    SpawnError,
    WaitError,
}

/// records every command and answers with preset responses, defaulting to success
#[derive(Debug, Default)]
struct RecordingExecutor {
    responses: VecDeque<Response>,
    commands: Vec<CommandLine>,
}

impl RecordingExecutor {
    fn with_responses(responses: Vec<Response>) -> Self {
        Self {
            responses: responses.into(),
            commands: Vec::new(),
        }
    }
}

impl Executor for RecordingExecutor {
    fn execute(&mut self, command: &CommandLine) -> Result<StepStatus, ExecutorError> {
        self.commands.push(command.clone());

        match self.responses.pop_front() {
            Some(Response::Status(status)) => Ok(status),
            Some(Response::SpawnError) => Err(ExecutorError::Spawn {
                program: command.program.clone(),
                source: Error::from(ErrorKind::NotFound),
            }),
            Some(Response::WaitError) => Err(ExecutorError::Wait {
                program: command.program.clone(),
                source: Error::from(ErrorKind::Interrupted),
            }),
            None => Ok(StepStatus::Exited(0)),
        }
    }
}

fn job_config(exec: &str) -> JobConfig {
    JobConfig {
        exec: PathBuf::from(exec),
        params: Vec::new(),
        index_flag: "-k".to_string(),
    }
}

fn sync_task(local: &Path) -> SyncTask {
    let config = SyncConfig {
        local: local.to_path_buf(),
        remote: Some("backup".to_string()),
        remote_path: Some("results".to_string()),
        ..SyncConfig::default()
    };

    SyncTask::load(&config, &Environment::default(), "HOME").unwrap()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn os_strings(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

fn dispatcher(responses: Vec<Response>) -> Dispatcher<RecordingExecutor> {
    Dispatcher::new(
        job_config("/opt/train"),
        Some(sync_task(Path::new("/scratch/results"))),
        RecordingExecutor::with_responses(responses),
    )
}

#[test]
fn forwards_args_unchanged_without_index() {
    let mut dispatcher = dispatcher(vec![]);
    let report = dispatcher.run(&JobInvocation::new(strings(&["--epochs", "10"]), None));

    let job = &dispatcher.executor.commands[0];
    assert_eq!(job.program, PathBuf::from("/opt/train"));
    assert_eq!(job.args, os_strings(&["--epochs", "10"]));
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn appends_index_flag() {
    let mut dispatcher = dispatcher(vec![]);
    dispatcher.run(&JobInvocation::new(strings(&["--epochs", "10"]), Some(3)));

    assert_eq!(
        dispatcher.executor.commands[0].args,
        os_strings(&["--epochs", "10", "-k", "3"])
    );
}

#[test]
fn params_come_before_forwarded_args() {
    let mut job = job_config("/usr/bin/python3");
    job.params = strings(&["train.py"]);
    let mut dispatcher = Dispatcher::new(job, None, RecordingExecutor::default());
    dispatcher.run(&JobInvocation::new(strings(&["--lr", "0.1"]), Some(0)));

    assert_eq!(
        dispatcher.executor.commands[0].args,
        os_strings(&["train.py", "--lr", "0.1", "-k", "0"])
    );
}

#[test]
fn sync_runs_once_after_successful_job() {
    let mut dispatcher = dispatcher(vec![]);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(dispatcher.executor.commands.len(), 2);
    assert_eq!(
        dispatcher.executor.commands[1].to_string(),
        "rclone copy --update -v /scratch/results backup:results"
    );
    assert_eq!(
        report,
        DispatchReport {
            job: StepStatus::Exited(0),
            sync: StepStatus::Exited(0),
        }
    );
}

#[test]
fn sync_runs_once_after_failed_job() {
    let mut dispatcher = dispatcher(vec![Response::Status(StepStatus::Exited(4))]);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(dispatcher.executor.commands.len(), 2);
    assert_eq!(dispatcher.executor.commands[1].program, PathBuf::from("rclone"));
    assert_eq!(report.exit_code(), 4);
}

#[test]
fn exit_code_ignores_sync_status() {
    for (job, sync) in [
        (StepStatus::Exited(0), StepStatus::Exited(1)),
        (StepStatus::Exited(2), StepStatus::Exited(0)),
        (StepStatus::Exited(2), StepStatus::Exited(5)),
    ] {
        let mut dispatcher = dispatcher(vec![Response::Status(job), Response::Status(sync)]);
        let report = dispatcher.run(&JobInvocation::default());

        assert_eq!(report.exit_code(), job.exit_code());
        assert_eq!(report.sync, sync);
    }
}

#[test]
fn unspawnable_sync_is_not_fatal() {
    let mut dispatcher = dispatcher(vec![Response::Status(StepStatus::Exited(0)), Response::SpawnError]);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(report.sync, StepStatus::SpawnFailed);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn unspawnable_job_still_syncs() {
    let mut dispatcher = dispatcher(vec![Response::SpawnError]);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(dispatcher.executor.commands.len(), 2);
    assert_eq!(report.job, StepStatus::SpawnFailed);
    assert_eq!(report.exit_code(), 127);
}

#[test]
fn lost_job_status_is_a_failure_not_a_spawn_error() {
    let mut dispatcher = dispatcher(vec![Response::WaitError]);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(dispatcher.executor.commands.len(), 2);
    assert_eq!(report.job, StepStatus::Exited(1));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn lost_sync_status_is_not_fatal() {
    let mut dispatcher = dispatcher(vec![Response::Status(StepStatus::Exited(0)), Response::WaitError]);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(report.sync, StepStatus::Exited(1));
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn disabled_sync_is_skipped() {
    let mut dispatcher = Dispatcher::new(job_config("/opt/train"), None, RecordingExecutor::default());
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(dispatcher.executor.commands.len(), 1);
    assert_eq!(report.sync, StepStatus::Skipped);
}

// the fake job and sync utility are shell scripts run through /bin/sh, they append their
// arguments to a log so the order and content of both invocations can be checked
fn fake_program(dir: &TempDir, name: &str, exit_code: i32) -> PathBuf {
    let path = dir.path().join(name);
    let log = dir.path().join("calls.log");
    fs::write(
        &path,
        format!(
            "echo \"{name} $*\" >> '{}'\nexit {exit_code}\n",
            log.display()
        ),
    )
    .unwrap();
    path
}

fn calls(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

fn local_dispatcher(dir: &TempDir, job_code: i32, sync_code: i32) -> Dispatcher<LocalExecutor> {
    let job = JobConfig {
        exec: PathBuf::from("/bin/sh"),
        params: vec![fake_program(dir, "train", job_code)
            .to_string_lossy()
            .into_owned()],
        index_flag: "-k".to_string(),
    };
    let mut sync = sync_task(&dir.path().join("results"));
    sync.exec = PathBuf::from("/bin/sh");
    sync.command = fake_program(dir, "rclone", sync_code)
        .to_string_lossy()
        .into_owned();

    Dispatcher::new(job, Some(sync), LocalExecutor)
}

#[test]
fn local_processes_run_in_order() {
    let dir = TempDir::new().unwrap();
    let mut dispatcher = local_dispatcher(&dir, 0, 0);
    let report = dispatcher.run(&JobInvocation::new(strings(&["--epochs", "10"]), Some(3)));

    let calls = calls(&dir);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], "train --epochs 10 -k 3");
    assert_eq!(
        calls[1],
        format!(
            "rclone --update -v {} backup:results",
            dir.path().join("results").display()
        )
    );
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn local_job_exit_code_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut dispatcher = local_dispatcher(&dir, 3, 1);
    let report = dispatcher.run(&JobInvocation::default());

    assert_eq!(calls(&dir).len(), 2);
    assert_eq!(report.job, StepStatus::Exited(3));
    assert_eq!(report.sync, StepStatus::Exited(1));
    assert_eq!(report.exit_code(), 3);
}
