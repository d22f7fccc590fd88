//! screenlink headless viewer entry point.
//!
//! ```text
//! screenlink-viewer discover                 Probe the LAN for hosts
//! screenlink-viewer connect [ADDR]           View a host's stream
//!     --pin 1234 --duration 10 --action tap:100,200 --action key:66
//! screenlink-viewer --gen-config             Dump default config and exit
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use screenlink_core::transport::discovery;

use screenlink_viewer::config::ViewerConfig;
use screenlink_viewer::input::Action;
use screenlink_viewer::player::{self, PlayOptions};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "screenlink-viewer", about = "screenlink headless viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "screenlink-viewer.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Broadcast a discovery probe and list the hosts that answer.
    Discover {
        /// Probe this address instead of the broadcast address.
        #[arg(long)]
        target: Option<SocketAddr>,
        /// How long to collect answers, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
    /// Connect to a host and view its stream.
    Connect {
        /// Host address (overrides config). Example: 192.168.1.20:8000
        addr: Option<SocketAddr>,
        /// Pairing PIN (overrides config).
        #[arg(long)]
        pin: Option<String>,
        /// Disconnect after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
        /// Scripted input: tap:X,Y  move:X,Y  key:CODE (repeatable).
        #[arg(long = "action")]
        actions: Vec<Action>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = ViewerConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("screenlink-viewer v{}", env!("CARGO_PKG_VERSION"));

    let command = cli.command.unwrap_or(Command::Connect {
        addr: None,
        pin: None,
        duration: None,
        actions: Vec::new(),
    });

    match command {
        Command::Discover { target, wait_ms } => {
            let target = target.unwrap_or_else(|| {
                SocketAddr::from(([255, 255, 255, 255], config.network.discovery_port))
            });
            let found = discovery::discover(target, Duration::from_millis(wait_ms)).await?;
            if found.is_empty() {
                println!("no hosts answered");
            }
            for (from, ann) in found {
                println!(
                    "{}  {}:{}  {}x{}  {:?}{}",
                    ann.name,
                    from.ip(),
                    ann.port,
                    ann.width,
                    ann.height,
                    ann.codec,
                    if ann.pin_required { "  (PIN)" } else { "" }
                );
            }
        }
        Command::Connect {
            addr,
            pin,
            duration,
            actions,
        } => {
            let addr = match addr {
                Some(addr) => addr,
                None => config.network.host_address.parse()?,
            };
            let options = PlayOptions {
                pin: pin.or(config.network.pin),
                timeout: Duration::from_millis(config.network.timeout_ms),
                keepalive: Duration::from_millis(config.network.keepalive_ms.max(100)),
                duration: duration.map(Duration::from_secs),
                actions,
            };
            info!(%addr, "connecting");
            let stats = player::play(addr, options).await?;
            println!(
                "received {} units ({} key-frames, {} gaps, {} decode errors), {:.1} fps, {} kbit/s",
                stats.units,
                stats.key_frames,
                stats.gaps,
                stats.decode_errors,
                stats.fps(),
                stats.bits_per_second() / 1000
            );
        }
    }

    Ok(())
}
