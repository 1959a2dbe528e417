use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gtfleet::commands::doctor::DoctorArgs;
use gtfleet::commands::init::InitArgs;
use gtfleet::commands::queue::QueueCommand;
use gtfleet::commands::status::StatusArgs;
use gtfleet::{commands, error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "gt",
    version,
    about = "Fleet supervisor for a town of tmux-hosted coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Find orphaned sessions and processes (and kill them with --fix)
    Doctor(DoctorArgs),
    /// Show town and rig agents and whether they are running
    Status(StatusArgs),
    /// Work-item queues: add, list, claim, release
    Queue(QueueCommand),
    /// Initialize a new town
    Init(InitArgs),
    /// Print the JSON Schema for gt.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Doctor(_) => "doctor",
            Self::Status(_) => "status",
            Self::Queue(_) => "queue",
            Self::Init(_) => "init",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Doctor(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Queue(command) => command.execute(),
        Commands::Init(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
