use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use nightshift::cli::{self, Commands};
use nightshift::errors::NightshiftError;

fn exit_code(e: &NightshiftError) -> i32 {
    match e {
        e if e.is_validation() => 2,
        NightshiftError::NotFound(_) => 3,
        NightshiftError::Config(_) | NightshiftError::Yaml(_) => 4,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .init();
    }
    if cli.no_color {
        console::set_colors_enabled(false);
    }
    debug!(version = %nightshift::version(), "nightshift starting");

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, config).await,
        Commands::Serve(args) => cli::serve::handle_serve(args, config).await,
        Commands::Validate(args) => cli::validate::handle_validate(args).await,
        Commands::Trigger(args) => cli::trigger::handle_trigger(args, config).await,
        Commands::History(args) => cli::history::handle_history(args, config).await,
        Commands::Logs(args) => cli::logs::handle_logs(args, config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}
