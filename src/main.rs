//! Helmsman CLI entry point.

use clap::Parser;

use helmsman::cli::{Cli, Commands};
use helmsman::infrastructure::config::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Project config also drives logging; fall back to defaults so the
    // failure itself can be reported.
    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(err) => {
            helmsman::cli::handle_error(err, cli.json);
            return;
        }
    };

    if let Err(err) = helmsman::infrastructure::logging::init(&config.logging) {
        helmsman::cli::handle_error(err, cli.json);
        return;
    }

    let result = match cli.command {
        Commands::Init(args) => helmsman::cli::commands::init::execute(args, cli.json).await,
        Commands::Decide(args) => {
            helmsman::cli::commands::decide::execute(args, config, cli.json).await
        }
        Commands::Train(args) => {
            helmsman::cli::commands::train::execute(args, config, cli.json).await
        }
        Commands::Calibration(command) => {
            helmsman::cli::commands::calibration::execute(command, config, cli.json).await
        }
        Commands::Event(command) => {
            helmsman::cli::commands::event::execute(command, config, cli.json).await
        }
        Commands::Metrics(args) => {
            helmsman::cli::commands::metrics::execute(args, config, cli.json).await
        }
    };

    if let Err(err) = result {
        helmsman::cli::handle_error(err, cli.json);
    }
}
