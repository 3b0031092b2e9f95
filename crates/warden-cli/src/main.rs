//! Warden agent CLI - SSL bootstrap against the control plane CA.
//!
//! # Examples
//!
//! ```bash
//! # Acquire CA certs, a key, and a signed client certificate
//! warden bootstrap --certname agent.example.net --server https://ca.example:8140
//!
//! # Establish the trust anchors only
//! warden ca
//!
//! # Show the resolved settings
//! warden config
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod bootstrap;

/// Warden agent - certificate bootstrap against the control plane CA
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG")]
    #[arg(default_value = "/etc/warden/warden.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full bootstrap pipeline through a signed client certificate
    Bootstrap(bootstrap::BootstrapArgs),

    /// Establish CA certificates and CRLs only
    Ca(bootstrap::BootstrapArgs),

    /// Show the resolved configuration
    Config(bootstrap::BootstrapArgs),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Bootstrap(args) => bootstrap::full(args, &cli.config).await,
        Commands::Ca(args) => bootstrap::ca_only(args, &cli.config).await,
        Commands::Config(args) => bootstrap::show_config(args, &cli.config),
    }
}
