//! Wirecast server: entry point.
//!
//! ```text
//! wirecast-server                   Listen with defaults
//! wirecast-server --config <path>   Load a custom config TOML
//! wirecast-server --port <port>     Override the listen port
//! wirecast-server --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wirecast_server::config::ServerConfig;
use wirecast_server::service::BroadcastService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wirecast-server", about = "Wirecast broadcast server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "wirecast-server.toml")]
    config: PathBuf,

    /// Listen port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// File to broadcast (overrides config).
    #[arg(short, long)]
    file: Option<String>,

    /// Broadcast interval in milliseconds, 0 to disable (overrides config).
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(file) = cli.file {
        config.payload.file = file;
    }
    if let Some(ms) = cli.interval_ms {
        config.network.broadcast_interval_ms = ms;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("wirecast-server v{}", env!("CARGO_PKG_VERSION"));
    info!("port: {}", config.network.port);
    info!("broadcast interval: {} ms", config.network.broadcast_interval_ms);
    info!("relay: {}", config.network.relay);

    let service = BroadcastService::bind(config).await?;
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    let stats = service.run().await;
    info!(
        "served {} clients, {} broadcasts, {} relays",
        stats.connects, stats.broadcasts, stats.relayed
    );

    Ok(())
}
