//! screenlink host daemon entry point.
//!
//! ```text
//! screenlink-server                  Run in the foreground
//! screenlink-server --config <path>  Load a custom config TOML
//! screenlink-server --gen-config     Write default config to stdout
//! screenlink-server --write-config   Write default config to --config
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use screenlink_server::config::ServerConfig;
use screenlink_server::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "screenlink-server", about = "screenlink host daemon")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "screenlink-server.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    write_config: bool,

    /// Override the listening port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Require this pairing PIN.
    #[arg(long)]
    pin: Option<String>,
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
    if cli.write_config {
        ServerConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(pin) = cli.pin {
        config.network.require_pin = true;
        config.network.fixed_pin = Some(pin);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("screenlink-server v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}:{}", config.network.bind_address, config.network.port);
    info!(
        "stream: {}x{} @ {} fps, {} bit/s",
        config.session.width, config.session.height, config.session.frame_rate, config.session.bitrate
    );

    let service = HostService::new(config)?;
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;
    Ok(())
}
