use crate::sync::SyncTask;
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound)
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

/// look up a bare program name on `$PATH`, paths with a separator are returned as they are
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return Some(program.to_path_buf());
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Config file is not valid: {0}")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("Array index {0:?} is not a non-negative integer")]
    InvalidIndex(String),
    #[error("File not found")]
    FileNotFound,
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Results path {path:?} is relative but ${var} is not set")]
    MissingHome { path: PathBuf, var: String },
    #[error("Unable to determine a remote for {0:?}")]
    UnresolvedRemote(PathBuf),
    #[error("Preflight checks failed")]
    PreflightFailed,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    // the training/ prediction job that gets wrapped
    pub job: JobConfig,
    // backup of the results directory after the job finished
    #[serde(default)]
    pub sync: SyncConfig,
    // names of the environment variables read at startup
    #[serde(default)]
    pub env: EnvConfig,
    // batch script directives, only used by `dispatch script`
    #[serde(default)]
    pub slurm: SlurmConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub exec: PathBuf,
    // fixed parameters placed before the forwarded arguments
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "default_index_flag")]
    pub index_flag: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sync_exec")]
    pub exec: PathBuf,
    #[serde(default = "default_sync_command")]
    pub command: String,
    #[serde(default = "default_sync_flags")]
    pub flags: Vec<String>,
    #[serde(default = "default_true")]
    pub update_only: bool,
    // relative paths are resolved against the home directory
    #[serde(default = "default_local")]
    pub local: PathBuf,
    pub remote: Option<String>,
    pub remote_path: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    #[serde(default = "default_array_index_var")]
    pub array_index: String,
    #[serde(default = "default_home_var")]
    pub home: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SlurmConfig {
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    pub array: Option<String>,
    pub partition: Option<String>,
    pub time: Option<String>,
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exec: default_sync_exec(),
            command: default_sync_command(),
            flags: default_sync_flags(),
            update_only: true,
            local: default_local(),
            remote: None,
            remote_path: None,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            array_index: default_array_index_var(),
            home: default_home_var(),
        }
    }
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            gpus: 0,
            cpus: default_cpus(),
            array: None,
            partition: None,
            time: None,
            output: default_output(),
        }
    }
}

/// Snapshot of the environment variables the dispatcher consumes, taken once at startup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    pub array_index: Option<String>,
    pub home: Option<PathBuf>,
}

impl Environment {
    pub fn capture(config: &EnvConfig) -> Self {
        let lookup = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());

        let captured = Self {
            array_index: lookup(&config.array_index),
            home: lookup(&config.home).map(PathBuf::from),
        };
        debug!(environment = ?captured, "Captured environment");

        captured
    }

    /// parse the scheduler supplied array index, unset and empty both mean "no index"
    pub fn array_index(&self) -> Result<Option<u32>, ConfigErrors> {
        match self.array_index.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value
                .parse::<u32>()
                .map(Some)
                .map_err(|_| ConfigErrors::InvalidIndex(value.to_string())),
        }
    }

    /// resolve a possibly relative results path against the home directory
    pub fn resolve(&self, path: &Path, var: &str) -> Result<PathBuf, ConfigErrors> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            match &self.home {
                Some(home) => Ok(home.join(path)),
                None => Err(ConfigErrors::MissingHome {
                    path: path.to_path_buf(),
                    var: var.to_string(),
                }),
            }
        }
    }
}

impl DispatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// attempt to catch all errors instead of piece-by-piece to make debugging easier for users,
    /// returns true if any check failed. An index given on the command line replaces the
    /// scheduler supplied one, so the environment is only validated without it
    pub fn preflight_checks(
        &mut self,
        environment: &Environment,
        index_override: Option<u32>,
    ) -> bool {
        let mut contains_error = false;

        // a broken job is still dispatched, it fails with 127 and the sync runs afterwards
        let job_exec = resolve_program(&self.job.exec).ok_or(ConfigErrors::FileNotFound);

        match job_exec.and_then(|exec| check_executable(&exec)) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "job.exec ({}) is not executable, the job will fail",
                    self.job.exec.to_string_lossy()
                );
            }
            Err(e) => {
                warn!(
                    "Failed to find job.exec. Either not a file or not found at {}, the job will fail: {e}",
                    self.job.exec.to_string_lossy()
                );
            }
        }

        if self.job.index_flag.is_empty() {
            error!("job.index_flag cannot be empty, the index would be passed without a flag");
            contains_error = true;
        }

        if index_override.is_some() {
            debug!("Array index given on the command line, ignoring ${}", self.env.array_index);
        } else if let Err(e) = environment.array_index() {
            error!("${} holds an invalid array index: {e}", self.env.array_index);
            contains_error = true;
        }

        if !self.sync.enabled {
            debug!("Sync is disabled, skipping sync checks");
            return contains_error;
        }

        if self.sync.exec.as_os_str().is_empty() {
            error!("sync.exec cannot be empty");
            contains_error = true;
        } else if resolve_program(&self.sync.exec).is_none() {
            // the job may still be worth running, the sync failure will be logged afterwards
            warn!(
                "sync.exec ({}) was not found, the backup will fail",
                self.sync.exec.to_string_lossy()
            );
        }

        if self.sync.command.is_empty() {
            warn!("sync.command is empty, the sync utility is called without a sub command");
        }

        if let Err(e) = SyncTask::load(&self.sync, environment, &self.env.home) {
            error!("sync is misconfigured: {e}");
            contains_error = true;
        }

        contains_error
    }
}

fn default_true() -> bool {
    true
}

fn default_index_flag() -> String {
    "-k".to_string()
}

fn default_sync_exec() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_sync_command() -> String {
    "copy".to_string()
}

fn default_sync_flags() -> Vec<String> {
    vec!["-v".to_string()]
}

fn default_local() -> PathBuf {
    PathBuf::from("results")
}

fn default_array_index_var() -> String {
    "SLURM_ARRAY_TASK_ID".to_string()
}

fn default_home_var() -> String {
    "HOME".to_string()
}

fn default_job_name() -> String {
    "dispatch".to_string()
}

fn default_cpus() -> u32 {
    1
}

fn default_output() -> String {
    "slurm-%A_%a.out".to_string()
}
