//! The `bootstrap`, `ca`, and `config` commands.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};

use warden_ssl::machine::exit_message;
use warden_ssl::{Bootstrap, Config, DiskCertProvider, HttpCaClient, SslMachine};

/// Settings shared by the bootstrap-flavored commands.
#[derive(Args, Debug, Clone)]
pub struct BootstrapArgs {
    /// Base URL of the CA service (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// The agent's certname (overrides the config file)
    #[arg(long)]
    certname: Option<String>,

    /// Seconds between polls for a signed certificate; 0 exits instead
    #[arg(long)]
    waitforcert: Option<u64>,
}

/// Loads the configuration file and applies command-line overrides.
fn load_config(path: &str, args: &BootstrapArgs) -> Result<Config> {
    let expanded = shellexpand::tilde(path).to_string();
    let mut config = if Path::new(&expanded).exists() {
        let raw = std::fs::read_to_string(&expanded)
            .with_context(|| format!("failed to read {expanded}"))?;
        toml::from_str::<Config>(&raw).with_context(|| format!("failed to parse {expanded}"))?
    } else if let Some(certname) = &args.certname {
        Config::new(certname.clone())
    } else {
        bail!("config file {expanded} not found and --certname not given");
    };

    if let Some(certname) = &args.certname {
        config.certname = certname.clone();
    }
    if let Some(server) = &args.server {
        config.ca_server = server.clone();
    }
    if let Some(waitforcert) = args.waitforcert {
        config.waitforcert = waitforcert;
    }
    Ok(config)
}

fn build_machine(config: Config) -> Result<SslMachine<HttpCaClient, DiskCertProvider>> {
    let ca = HttpCaClient::from_config(&config)?;
    let provider = DiskCertProvider::from_config(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping bootstrap");
            let _ = shutdown_tx.send(true);
        }
    });

    Ok(SslMachine::new(config, ca, provider).with_shutdown(shutdown_rx))
}

/// Runs the full pipeline through a signed client certificate.
pub async fn full(args: BootstrapArgs, config_path: &str) -> Result<()> {
    let config = load_config(config_path, &args)?;
    let certname = config.certname.clone();
    let machine = build_machine(config)?;

    match machine.ensure_client_certificate().await? {
        Bootstrap::Complete(context) => {
            info!(
                certname = %certname,
                cacerts = context.cacerts.len(),
                crls = context.crls.len(),
                "bootstrap complete"
            );
            Ok(())
        }
        Bootstrap::ExitRequested => {
            println!("{}", exit_message(&certname));
            std::process::exit(1);
        }
    }
}

/// Establishes CA certificates and CRLs only.
pub async fn ca_only(args: BootstrapArgs, config_path: &str) -> Result<()> {
    let config = load_config(config_path, &args)?;
    let certname = config.certname.clone();
    let machine = build_machine(config)?;

    let context = machine.ensure_ca_certificates().await?;
    info!(
        certname = %certname,
        cacerts = context.cacerts.len(),
        crls = context.crls.len(),
        "trust anchors established"
    );
    Ok(())
}

/// Prints the resolved configuration as TOML.
pub fn show_config(args: BootstrapArgs, config_path: &str) -> Result<()> {
    let config = load_config(config_path, &args)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
