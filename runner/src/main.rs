mod config;
mod dispatcher;
mod executors;
mod request;
mod sync;

use clap::{ArgAction, Parser, Subcommand};
use config::{ConfigErrors, DispatchConfig, Environment};
use dispatcher::{DispatchError, Dispatcher};
use executors::{slurm::SlurmExecutor, ExecutorError, LocalExecutor};
use request::JobInvocation;
use std::{env, fs, path::PathBuf, process::exit};
use sync::SyncTask;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// exit code for invalid configuration, nothing was executed
const CONFIG_FAILURE_CODE: i32 = 2;

/// Run a training/ prediction job, optionally as a Slurm array task, and back up its results
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the dispatch config
    #[arg(
        short,
        long,
        global = true,
        env = "DISPATCH_CONFIG",
        default_value = "dispatch.yaml"
    )]
    config: PathBuf,

    /// Increase log verbosity, RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the job, then sync its results
    Run {
        /// Array index, overrides the scheduler supplied one
        #[arg(short, long)]
        index: Option<u32>,

        /// Do not sync the results afterwards
        #[arg(long)]
        no_sync: bool,

        /// Arguments forwarded to the job
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        args: Vec<String>,
    },
    /// Only run the preflight checks
    Check,
    /// Render a Slurm batch script that runs dispatch for every array task
    Script {
        /// Submit the script with sbatch instead of printing it
        #[arg(long)]
        submit: bool,

        /// Arguments forwarded to the job
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        args: Vec<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr, stdout belongs to the job
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// load the config and run all preflight checks, reporting every problem at once
fn prepare(
    cli: &Cli,
    no_sync: bool,
    index: Option<u32>,
) -> Result<(DispatchConfig, Environment), ConfigErrors> {
    let mut config = DispatchConfig::load(&cli.config)?;
    debug!(config = ?config, "Loaded config from {:?}", cli.config);

    if no_sync {
        config.sync.enabled = false;
    }

    let environment = Environment::capture(&config.env);

    if config.preflight_checks(&environment, index) {
        Err(ConfigErrors::PreflightFailed)
    } else {
        Ok((config, environment))
    }
}

fn run(cli: Cli) -> Result<i32, DispatchError> {
    match &cli.command {
        Commands::Run {
            index,
            no_sync,
            args,
        } => {
            let (config, environment) = prepare(&cli, *no_sync, *index)?;

            let array_index = match index {
                Some(index) => Some(*index),
                None => environment.array_index()?,
            };

            let sync = if config.sync.enabled {
                Some(SyncTask::load(&config.sync, &environment, &config.env.home)?)
            } else {
                None
            };

            let mut dispatcher = Dispatcher::new(config.job, sync, LocalExecutor);
            let report = dispatcher.run(&JobInvocation::new(args.clone(), array_index));

            Ok(report.exit_code())
        }
        Commands::Check => {
            prepare(&cli, false, None)?;
            info!("Preflight checks passed");

            Ok(0)
        }
        Commands::Script { submit, args } => {
            let (config, _) = prepare(&cli, false, None)?;

            let dispatch = env::current_exe().map_err(ExecutorError::CurrentExe)?;
            let config_path = fs::canonicalize(&cli.config).map_err(ConfigErrors::from)?;
            let executor = SlurmExecutor::load(config.slurm, dispatch, config_path);
            let script = executor.render(args);

            if *submit {
                Ok(executor.submit(&script)?.exit_code())
            } else {
                print!("{script}");

                Ok(0)
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => exit(code),
        Err(e) => {
            error!("{e}");
            exit(CONFIG_FAILURE_CODE)
        }
    }
}
