//! Veil CLI
//!
//! Runs a blind packet relay and provides small clients for testing it.

mod config;
mod keyfile;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;
use veil_relay::{Client, PublicKey, SecretKey, Server};

use config::Config;

/// Veil - blind packet relay keyed by public key
#[derive(Parser)]
#[command(name = "veil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (default: ~/.config/veil/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Listen address, overrides the configuration file
        #[arg(short, long)]
        bind: Option<String>,

        /// Use a fresh identity instead of the private key file
        #[arg(long)]
        ephemeral: bool,
    },

    /// Generate a new identity keypair
    Keygen {
        /// Output file for private key
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Print the public key for a private key file
    Pubkey {
        /// Private key file
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Send one message through a relay
    Send {
        /// Relay address (host:port)
        #[arg(required = true)]
        relay: String,

        /// Recipient public key (hex)
        #[arg(required = true)]
        to: PublicKey,

        /// Message to send
        #[arg(required = true)]
        message: String,

        /// Private key file, a fresh identity is used if omitted
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Print packets received through a relay
    Listen {
        /// Relay address (host:port)
        #[arg(required = true)]
        relay: String,

        /// Private key file, a fresh identity is used if omitted
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Mark this connection as the preferred home
        #[arg(long)]
        preferred: bool,

        /// Exit after this many packets
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::load_or_default(&config_path)?
    };
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { bind, ephemeral } => serve(bind, ephemeral, &config).await?,
        Commands::Keygen { output, force } => generate_keypair(output, force, &config)?,
        Commands::Pubkey { key } => {
            let path = key.unwrap_or_else(|| config.server.private_key_file.clone());
            println!("{}", keyfile::load(&path)?.public_key());
        }
        Commands::Send {
            relay,
            to,
            message,
            key,
        } => send_message(&relay, to, &message, key).await?,
        Commands::Listen {
            relay,
            key,
            preferred,
            count,
        } => listen(&relay, key, preferred, count).await?,
    }

    Ok(())
}

/// Run the relay until Ctrl+C
async fn serve(bind: Option<String>, ephemeral: bool, config: &Config) -> anyhow::Result<()> {
    let secret = if ephemeral {
        SecretKey::generate()
    } else {
        keyfile::load(&config.server.private_key_file)
            .context("no relay identity (run `veil keygen` or pass --ephemeral)")?
    };
    let addr = bind.unwrap_or_else(|| config.server.listen_addr.clone());

    let server = Server::with_config(secret, config.to_server_config())?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    println!("Veil relay");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Listen: {}", listener.local_addr()?);
    println!("Public key: {}", server.public_key());

    let stats_task = config.stats_interval().map(|every| {
        let server = server.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match serde_json::to_string(&server.stats()) {
                    Ok(stats) => tracing::info!(%stats, "relay stats"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode stats"),
                }
            }
        })
    });

    loop {
        let (stream, peer) = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, %peer, "failed to set TCP_NODELAY");
        }

        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.accept(stream, peer.to_string()).await {
                tracing::debug!(error = %e, %peer, "session ended with error");
            }
        });
    }

    println!("\nShutting down...");
    server.close();
    if let Some(task) = stats_task {
        task.abort();
    }
    let stats = server.stats();
    tracing::info!(
        forwarded = stats.counters.packets_forwarded,
        dropped = stats.counters.packets_dropped(),
        "relay stopped"
    );

    Ok(())
}

/// Generate a new identity keypair
fn generate_keypair(output: Option<PathBuf>, force: bool, config: &Config) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(|| config.server.private_key_file.clone());
    let secret = SecretKey::generate();
    keyfile::save(&path, &secret, force)?;

    println!("Public key: {}", secret.public_key());
    println!("Private key saved to: {}", path.display());
    Ok(())
}

fn identity(key: Option<PathBuf>) -> anyhow::Result<SecretKey> {
    match key {
        Some(path) => keyfile::load(&path),
        None => Ok(SecretKey::generate()),
    }
}

async fn dial(relay: &str, secret: &SecretKey) -> anyhow::Result<Client> {
    let stream = TcpStream::connect(relay)
        .await
        .with_context(|| format!("connecting to {relay}"))?;
    stream.set_nodelay(true)?;
    let client = Client::connect(secret, stream).await?;
    tracing::info!(relay, server = %client.server_key(), "connected");
    Ok(client)
}

/// Send one message to `to`
async fn send_message(
    relay: &str,
    to: PublicKey,
    message: &str,
    key: Option<PathBuf>,
) -> anyhow::Result<()> {
    let secret = identity(key)?;
    let client = dial(relay, &secret).await?;
    client.send(to, message.as_bytes()).await?;
    client.close().await?;
    println!("Sent {} bytes to {}", message.len(), to);
    Ok(())
}

/// Print received packets until Ctrl+C, the relay closes, or `count` is reached
async fn listen(
    relay: &str,
    key: Option<PathBuf>,
    preferred: bool,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let secret = identity(key)?;
    let client = dial(relay, &secret).await?;
    if preferred {
        client.note_preferred(true).await?;
    }
    println!("Listening as {}", client.public_key());

    let mut received = 0usize;
    while count.is_none_or(|n| received < n) {
        let packet = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            packet = client.recv() => match packet {
                Ok(packet) => packet,
                Err(e) if e.is_eof() => {
                    println!("Relay closed the connection");
                    break;
                }
                Err(e) => return Err(e.into()),
            },
        };
        received += 1;
        println!("{}: {}", packet.source, String::from_utf8_lossy(&packet.data));
    }

    client.close().await?;
    Ok(())
}
