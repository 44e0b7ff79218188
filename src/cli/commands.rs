use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nightshift", version, about = "Scheduling and execution engine for observatory automation agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler daemon
    Run(RunArgs),
    /// Run the scheduler with the HTTP API
    Serve(ServeArgs),
    /// Validate a configuration file or an agent definition
    Validate(ValidateArgs),
    /// Run an agent once now and wait for the result
    Trigger(TriggerArgs),
    /// Show recent runs of an agent
    History(HistoryArgs),
    /// Show an agent's logs
    Logs(LogsArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Also serve the HTTP API on this address, e.g. 127.0.0.1:8080
    #[arg(long)]
    pub listen: Option<String>,
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Listen port
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file or agent definition to validate
    pub file: PathBuf,
}

#[derive(Args, Clone)]
pub struct TriggerArgs {
    /// Agent to run
    pub agent_id: String,

    /// Output the run record as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct HistoryArgs {
    pub agent_id: String,

    /// Number of runs to show
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct LogsArgs {
    pub agent_id: String,

    /// Follow log output
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines to show
    #[arg(short = 'n', long, default_value = "100")]
    pub lines: usize,
}
