use clap::Parser;
use screenshot_maker::{cli, setup_logging, Cli};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose);

    info!("Starting screenshot-maker v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli::run(args).await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
