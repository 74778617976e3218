//! Update-only backup of the results directory to a remote (rclone style `name:path`).

use crate::{
    config::{ConfigErrors, Environment, SyncConfig},
    executors::CommandLine,
};
use itertools::Itertools;
use std::{
    fmt,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// marker used to find the remote in a results path when none is configured
pub const REMOTE_MARKER: &str = "-drive";

/// destination of a sync, rendered as `name:path`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    pub name: String,
    pub path: String,
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.path)
    }
}

impl RemoteTarget {
    /// Derive the remote from the local path.
    ///
    /// Without a name the first path component containing [`REMOTE_MARKER`] is the remote.
    /// The remote path is made of the components following the remote's component.
    pub fn infer(local: &Path, name: Option<&str>) -> Option<Self> {
        let folders = local
            .components()
            .filter_map(|component| match component {
                Component::Normal(folder) => Some(folder.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect_vec();

        let position = match name {
            Some(name) => folders.iter().position(|folder| folder == name),
            None => folders
                .iter()
                .position(|folder| folder.contains(REMOTE_MARKER)),
        }?;

        Some(Self {
            name: folders[position].clone(),
            path: folders[position + 1..].join("/"),
        })
    }
}

/// One-directional copy of `source` to `destination`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncTask {
    pub exec: PathBuf,
    pub command: String,
    pub flags: Vec<String>,
    pub source: PathBuf,
    pub destination: RemoteTarget,
    // skip files that are newer at the destination
    pub update_only: bool,
}

impl SyncTask {
    pub fn load(
        config: &SyncConfig,
        environment: &Environment,
        home_var: &str,
    ) -> Result<Self, ConfigErrors> {
        let source = environment.resolve(&config.local, home_var)?;

        let destination = match (&config.remote, &config.remote_path) {
            (Some(name), Some(path)) => RemoteTarget {
                name: name.clone(),
                path: path.trim_start_matches('/').to_string(),
            },
            (name, _) => RemoteTarget::infer(&source, name.as_deref())
                .ok_or_else(|| ConfigErrors::UnresolvedRemote(source.clone()))?,
        };
        debug!(source = ?source, destination = %destination, "Resolved sync task");

        Ok(Self {
            exec: config.exec.clone(),
            command: config.command.clone(),
            flags: config.flags.clone(),
            source,
            destination,
            update_only: config.update_only,
        })
    }

    /// `<exec> <command> [--update] <flags...> <source> <name>:<path>`
    pub fn command_line(&self) -> CommandLine {
        let mut command = CommandLine::new(&self.exec);

        if !self.command.is_empty() {
            command.arg(&self.command);
        }
        if self.update_only {
            command.arg("--update");
        }

        command
            .args(&self.flags)
            .arg(&self.source)
            .arg(self.destination.to_string());

        command
    }
}
