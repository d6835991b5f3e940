use crate::{
    AppState, BrowserSession, ChromeRenderer, Config, ConfigError, OutputFormat,
    ScreenshotUrlBuilder,
};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "screenshot-maker")]
#[command(about = "HTTP service that renders web pages to images")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Port to listen on (overrides PORT)")]
    pub port: Option<u16>,

    #[arg(long, help = "Bind address")]
    pub bind: Option<String>,

    #[arg(long, help = "Chrome executable path (overrides CHROME_EXECUTABLE_PATH)")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service (default)
    Serve,

    /// Print a screenshot link for a page
    Url {
        #[arg(help = "Page to screenshot")]
        url: String,

        #[arg(long, default_value = "http://localhost:3000", help = "Base URL of the service")]
        base: String,

        #[arg(long, help = "Viewport width")]
        width: Option<u32>,

        #[arg(long, help = "Viewport height")]
        height: Option<u32>,

        #[arg(long, help = "Downscale factor (0.1 - 1)")]
        scale: Option<f64>,

        #[arg(long, help = "Encoder quality (1 - 100)")]
        quality: Option<u8>,

        #[arg(long, help = "Capture the whole page")]
        full_page: bool,

        #[arg(long = "type", help = "Output format (png, jpeg, webp, avif)")]
        format: Option<String>,

        #[arg(long, help = "API key to embed in the link")]
        key: Option<String>,
    },

    /// Validate configuration
    Validate {
        #[arg(help = "Configuration file to validate")]
        file: PathBuf,
    },
}

/// Build the effective configuration: file or defaults, then environment, then flags
pub fn load_config(args: &Cli) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    config.apply_env()?;

    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }

    if let Some(chrome_path) = &args.chrome_path {
        config.browser.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Browser launch mode: {:?}", config.browser.launch_mode);
    info!("Max concurrent renders: {}", config.render.max_concurrent_renders);
    info!("Cache TTL: {:?}", config.cache.ttl);

    Ok(config)
}

pub async fn run(args: Cli) -> anyhow::Result<()> {
    match &args.command {
        None | Some(Commands::Serve) => {
            let config = load_config(&args)?;
            run_server(config).await
        }
        Some(Commands::Url {
            url,
            base,
            width,
            height,
            scale,
            quality,
            full_page,
            format,
            key,
        }) => {
            let format = match format.as_deref() {
                Some(name) => Some(
                    OutputFormat::parse(name)
                        .ok_or_else(|| anyhow::anyhow!("Unknown output format '{name}'"))?,
                ),
                None => None,
            };

            let link = ScreenshotUrlBuilder {
                url: url.clone(),
                width: *width,
                height: *height,
                scale: *scale,
                quality: *quality,
                full_page: *full_page,
                format,
                key: key.clone(),
            }
            .build(base)?;

            println!("{link}");
            Ok(())
        }
        Some(Commands::Validate { file }) => validate_config(file),
    }
}

/// Socket address from a bind address and port, IPv4 or IPv6
pub fn listen_addr(bind: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = bind
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{bind}': {e}"))?;
    Ok(SocketAddr::new(ip, port))
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr = listen_addr(&config.server.bind, config.server.port)?;

    if config.auth.bypass {
        warn!("BYPASS_AUTH_CHECK is set, every request is authorized");
    } else if config.auth.api_key.is_none() && config.auth.allowed_origins.is_empty() {
        warn!("No API key or allowed origins configured, every screenshot request will be rejected");
    }

    let prometheus = if config.metrics_enabled {
        Some(crate::metrics::install_prometheus()?)
    } else {
        None
    };

    let session = Arc::new(BrowserSession::new(config.browser.clone()));
    let renderer = Arc::new(ChromeRenderer::new(session.clone(), config.render.clone()));
    let sweep_interval = config.cache.sweep_interval;

    let state = Arc::new(AppState::new(config, renderer, prometheus));
    let sweeper = state.cache.start_sweeper(sweep_interval);

    let result = crate::server::serve(state, addr, shutdown_signal()).await;

    info!("Shutting down...");
    sweeper.abort();
    session.shutdown().await;

    result?;
    info!("Screenshot-maker stopped");
    Ok(())
}

fn validate_config(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = Config::from_file(path)?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Listen: {}:{}", config.server.bind, config.server.port);
    println!("  Launch mode: {:?}", config.browser.launch_mode);
    println!("  Scale strategy: {:?}", config.render.scale_strategy);
    println!("  Max concurrent renders: {}", config.render.max_concurrent_renders);
    println!("  Cache TTL: {:?}", config.cache.ttl);
    println!(
        "  Default viewport: {}x{} @ {} ({})",
        config.defaults.width, config.defaults.height, config.defaults.scale, config.defaults.format
    );

    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
