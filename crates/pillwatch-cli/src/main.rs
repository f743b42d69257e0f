use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pillwatch", version, about = "Pillwatch medication intake CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patient management
    Patient {
        #[command(subcommand)]
        action: commands::patient::PatientAction,
    },
    /// Emergency contacts of a patient
    Contact {
        #[command(subcommand)]
        action: commands::contact::ContactAction,
    },
    /// Prescription management
    Prescription {
        #[command(subcommand)]
        action: commands::prescription::PrescriptionAction,
    },
    /// Intake events and confirmations
    Intake {
        #[command(subcommand)]
        action: commands::intake::IntakeAction,
    },
    /// Seven-day adherence statistics for a patient
    Stats(commands::stats::StatsArgs),
    /// Today's summary for a patient, optionally pushed to their device
    Summary(commands::summary::SummaryArgs),
    /// Run one escalation tick
    Tick(commands::tick::TickArgs),
    /// Run the escalation tick periodically until interrupted
    Serve,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Patient { action } => commands::patient::run(action),
        Commands::Contact { action } => commands::contact::run(action),
        Commands::Prescription { action } => commands::prescription::run(action),
        Commands::Intake { action } => commands::intake::run(action),
        Commands::Stats(args) => commands::stats::run(args),
        Commands::Summary(args) => commands::summary::run(args),
        Commands::Tick(args) => commands::tick::run(args),
        Commands::Serve => commands::serve::run(),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
