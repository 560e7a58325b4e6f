use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use pubsub_subscriber::config::{SubscriberConfig, config_path};
use pubsub_subscriber::telemetry;

mod commands;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

// Git describe output from build.rs, or the package version outside a git checkout
const VERSION: &str = match option_env!("VERGEN_GIT_DESCRIBE") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(
    name = "pubsub-subscriber",
    version = VERSION,
    about = "Consumes JSON messages from a subscription and acks or nacks each one"
)]
struct Cli {
    /// Path to the TOML config file (defaults to $PUBSUB_SUBSCRIBER_CONFIG or ./subscriber.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let _sentry = telemetry::init_sentry(VERSION);
    telemetry::init_tracing();

    info!("pubsub-subscriber {} starting", VERSION);

    let path = config_path(cli.config);
    let config = match SubscriberConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Invalid configuration ({}): {:#}",
                path.display(),
                anyhow::Error::from(e)
            );
            return ExitCode::FAILURE;
        }
    };

    match commands::handle_subscribe(config).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Subscriber failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
