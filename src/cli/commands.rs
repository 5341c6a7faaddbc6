use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{cert, Cli, Commands, RunArgs};
use crate::config::Mode;
use crate::material::MaterialSource;
use crate::proxy::{launch, Proxy};

/// Execute CLI commands
pub async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Cert {
            out_dir,
            ca_name,
            server_names,
            client_name,
        }) => {
            cert::generate_certificates(out_dir, ca_name, server_names, client_name)?;
        }
        Some(Commands::Check { run }) => {
            check_config(run)?;
        }
        None => {
            run_proxy(&cli.run).await?;
        }
    }

    Ok(())
}

/// Run the proxy until Ctrl+C or a fatal error
async fn run_proxy(args: &RunArgs) -> Result<()> {
    let settings = args.layered_settings(|k| std::env::var(k).ok())?;
    launch(settings, shutdown_signal())
        .await
        .context("mTLS proxy terminated")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Resolve configuration and build the TLS context without opening sockets
fn check_config(args: &RunArgs) -> Result<()> {
    let settings = args.layered_settings(|k| std::env::var(k).ok())?;
    let resolved = settings.resolve()?;

    println!("✓ Mode: {}", resolved.proxy.mode);
    println!("✓ Listen address: {}", resolved.proxy.listen_addr);
    println!("✓ Peer address: {}", resolved.proxy.peer_addr);
    if resolved.proxy.mode == Mode::Client {
        let name = if resolved.proxy.peer_server_name.is_empty() {
            "<host of peer address>"
        } else {
            resolved.proxy.peer_server_name.as_str()
        };
        println!("✓ Expected server name: {}", name);
    }

    for (label, source) in [
        ("Certificate", &resolved.material.certificate),
        ("Private key", &resolved.material.private_key),
        ("CA bundle", &resolved.material.ca_bundle),
    ] {
        match source {
            MaterialSource::File(path) => println!("✓ {}: {:?}", label, path),
            MaterialSource::Inline(_) => println!("✓ {}: inline base64", label),
        }
    }

    let material = resolved.material.load()?;
    let proxy = Proxy::from_material(resolved.proxy, &material)?;
    info!("TLS context built for {} mode", proxy.config().mode);

    println!("\n✓ Configuration is valid!");
    Ok(())
}
