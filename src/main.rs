//! Meshdisco - Service discovery announcer and listener
//!
//! Advertises this host over UDP and prints the advertisements of others.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meshdisco::config::{self, Config};
use meshdisco::discovery::{Announcer, DiscoveredService, DiscoveryEvent, Listener};
use meshdisco::protocol::{self, DiscoveryMessage, MsgType};

/// Meshdisco - service discovery over UDP
#[derive(Parser)]
#[command(name = "meshdisco")]
#[command(author = "Meshdisco Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Advertise and discover services with compact UDP datagrams", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Periodically advertise this host
    Announce {
        /// Destination address (defaults to the configured target)
        #[arg(short, long)]
        target: Option<SocketAddr>,

        /// Wire variant (0 = simple, anything else = generic)
        #[arg(short, long)]
        msg_type: Option<u8>,

        /// Send a single datagram and exit
        #[arg(long)]
        once: bool,
    },

    /// Print advertisements received on the discovery port
    Listen {
        /// Port to listen on (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Print messages as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the hex encoding of a message
    Encode {
        #[arg(long, default_value_t = 0)]
        state: u8,

        #[arg(long)]
        port: u16,

        #[arg(long)]
        host: String,

        #[arg(long)]
        payload: Option<String>,

        #[arg(short, long, default_value_t = protocol::MSG_TYPE_SIMPLE)]
        msg_type: u8,
    },

    /// Decode a hex-encoded datagram and print it as JSON
    Decode {
        /// Hex string, whitespace allowed
        hex: String,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Announce {
            target,
            msg_type,
            once,
        } => {
            run_announcer(config, target, msg_type, once).await?;
        }
        Commands::Listen { port, json } => {
            run_listener(config, port, json).await?;
        }
        Commands::Encode {
            state,
            port,
            host,
            payload,
            msg_type,
        } => {
            let mut msg = DiscoveryMessage::new(state, port, host);
            if let Some(payload) = payload {
                msg = msg.with_payload(payload);
            }
            println!("{}", encode_hex(&msg, msg_type)?);
        }
        Commands::Decode { hex } => {
            let frame = decode_hex(&hex)?;
            println!("{}", serde_json::to_string_pretty(&frame.message)?);
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Advertise this host until Ctrl+C
async fn run_announcer(
    config: Config,
    target: Option<SocketAddr>,
    msg_type: Option<u8>,
    once: bool,
) -> anyhow::Result<()> {
    let target = match target {
        Some(target) => target,
        None => config.discovery.target.parse()?,
    };
    let msg_type = MsgType::from(msg_type.unwrap_or(config.discovery.msg_type));
    let message = config.announcement();

    let announcer = Announcer::bind(format!("{}:0", config.discovery.bind_address)).await?;

    if once {
        let sent = announcer.announce_once(target, &message, msg_type).await?;
        println!("Sent {} bytes to {}", sent, target);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    let interval = Duration::from_millis(config.discovery.announce_interval_ms.max(1));
    announcer
        .run(target, message, msg_type, interval, shutdown_rx)
        .await?;

    Ok(())
}

/// Print advertisements until Ctrl+C
async fn run_listener(config: Config, port: Option<u16>, json: bool) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        config.discovery.bind_address,
        port.unwrap_or(config.discovery.port)
    );
    let mut listener = Listener::bind(addr).await?;

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let handle = tokio::spawn(async move { listener.run(event_tx, shutdown_rx).await });

    println!("Listening for advertisements. Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    DiscoveryEvent::ServiceSeen(service) => {
                        println!("{}", format_service(&service, json)?);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            else => break,
        }
    }

    let _ = shutdown_tx.send(()).await;
    handle.await??;

    Ok(())
}

fn format_service(service: &DiscoveredService, json: bool) -> anyhow::Result<String> {
    if json {
        let line = serde_json::json!({
            "from": service.addr.to_string(),
            "msg_type": service.msg_type.tag(),
            "message": service.message,
        });
        Ok(line.to_string())
    } else {
        Ok(format!(
            "{} [type {}] {}",
            service.addr,
            service.msg_type.tag(),
            service.message
        ))
    }
}

fn encode_hex(msg: &DiscoveryMessage, msg_type: u8) -> anyhow::Result<String> {
    let bytes = protocol::encode(msg, msg_type)?;
    Ok(hex::encode_upper(&bytes))
}

fn decode_hex(input: &str) -> anyhow::Result<protocol::Frame> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(cleaned)?;
    Ok(protocol::decode_frame(&bytes)?)
}
