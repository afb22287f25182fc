//! Wirecast client: entry point.
//!
//! ```text
//! wirecast-client                     Connect with defaults
//! wirecast-client --config <path>     Use custom config TOML
//! wirecast-client --server <host>     Override the server address
//! wirecast-client --gen-config        Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wirecast_client::config::ClientConfig;
use wirecast_client::session::run_session;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wirecast-client", about = "Wirecast broadcast receiver")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "wirecast-client.toml")]
    config: PathBuf,

    /// Server host or IP (overrides config).
    #[arg(short, long)]
    server: Option<String>,

    /// Server port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to store received payloads in (overrides config).
    #[arg(short, long)]
    out_dir: Option<String>,

    /// File to upload once connected (overrides config).
    #[arg(short = 'u', long)]
    send_file: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(server) = cli.server {
        config.network.server_address = server;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(dir) = cli.out_dir {
        config.output.dir = dir;
    }
    if let Some(file) = cli.send_file {
        config.upload.file = file;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("wirecast-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "server: {}:{}",
        config.network.server_address, config.network.port
    );

    let stop = CancellationToken::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    let stats = run_session(&config, stop).await?;
    info!(
        "received {} payloads ({} bytes)",
        stats.payloads, stats.bytes
    );

    Ok(())
}
