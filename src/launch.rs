use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use capsule::config::{self, ConfigError};
use capsule::signal::{self, SignalTo};
use capsule::{topology, trace};
use exitcode::ExitCode;
use tracing::{error, info};

use crate::validate;

fn default_worker_threads() -> usize {
    match std::env::var("CAPSULE_WORKER_THREADS") {
        Ok(value) => value
            .parse::<usize>()
            .expect("invalid env value for CAPSULE_WORKER_THREADS"),
        Err(_) => {
            // not found
            std::thread::available_parallelism()
                .expect("get available working threads")
                .get()
        }
    }
}

#[derive(FromArgs)]
#[argh(
    description = "Capsule periodically snapshots Kubernetes ConfigMaps and ships them to a sink",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from the given file"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,

    #[argh(subcommand)]
    sub_commands: Option<SubCommands>,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]

    fn show_version(&self) {
        println!("Capsule {}", env!("CARGO_PKG_VERSION"));
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        if let Some(sub_command) = &self.sub_commands {
            sub_command.run()?;
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("capsule-worker")
            .worker_threads(self.threads)
            .enable_io()
            .enable_time()
            .build()
            .unwrap();

        let log_level = std::env::var("CAPSULE_LOG").unwrap_or(self.log_level.clone());
        let color = std::io::stdout().is_terminal();
        trace::init(color, &log_level);

        runtime.block_on(async move {
            let config_path = self.config.as_ref().ok_or_else(|| {
                error!(message = "No config file path, pass one with --config");

                exitcode::CONFIG
            })?;

            info!(
                message = "Start capsule",
                threads = self.threads,
                config = ?config_path
            );

            let (mut signal_handler, mut signal_rx) = signal::SignalHandler::new();
            signal_handler.forever(signal::os_signals());

            let config = config::load_from_path(config_path).map_err(handle_config_errors)?;

            let topology = match topology::build(config).await {
                Ok(topology) => topology,
                Err(err) => {
                    error!(message = "Failed to build topology", %err);

                    return Err(exitcode::SOFTWARE);
                }
            };
            let topology = topology.start();

            let mut sources_finished = topology.sources_finished();

            let signal = loop {
                tokio::select! {
                    Some(signal) = signal_rx.recv() => break signal,

                    // Trigger graceful shutdown if the source has ended
                    _ = &mut sources_finished => break SignalTo::Shutdown,

                    else => unreachable!("Signal streams never end"),
                }
            };

            match signal {
                SignalTo::Shutdown => {
                    info!(message = "Shutdown signal received");

                    tokio::select! {
                        // graceful shutdown finished
                        _ = topology.stop() => (),
                        _ = signal_rx.recv() => {
                            // Dropping the shutdown future will immediately shut the
                            // topology down
                        }
                    }
                }

                SignalTo::Quit => {
                    info!(message = "Quit signal received");

                    drop(topology);
                }
            }

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

pub fn handle_config_errors(err: ConfigError) -> ExitCode {
    match err {
        ConfigError::Invalid(errors) => {
            for err in errors {
                error!(message = "configuration error", %err);
            }
        }
        err => error!(message = "configuration error", %err),
    }

    exitcode::CONFIG
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum SubCommands {
    Validate(validate::Validate),
}

impl SubCommands {
    fn run(&self) -> Result<(), ExitCode> {
        match self {
            SubCommands::Validate(validate) => match validate.run() {
                exitcode::OK => Ok(()),
                other => Err(other),
            },
        }
    }
}
