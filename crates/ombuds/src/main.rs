#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use ombuds::auth::HmacTokenVerifier;
use ombuds::config::{Args, ServerConfig};
use ombuds::metrics::start_metrics_server;
use ombuds::run;
use ombuds::ServerState;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.clone().into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let secret = if let Some(ref path) = args.token_secret {
        load_secret(path)?
    } else {
        generate_secret()
    };
    let verifier = Arc::new(HmacTokenVerifier::new(secret));

    let state = Arc::new(ServerState::new(config.clone(), verifier));

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(config.metrics_addr).await {
            warn!("metrics server error: {}", e);
        }
    });

    tokio::select! {
        result = run(listener, state) => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

fn load_secret(path: &Path) -> Result<Vec<u8>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            anyhow::bail!(
                "token secret file permissions too open: {:o}. Expected 0600",
                mode
            );
        }
    }

    let data = std::fs::read(path)?;
    if data.len() < 32 {
        anyhow::bail!("token secret file too short, expected at least 32 bytes");
    }
    info!("loaded token secret from {}", path.display());
    Ok(data)
}

fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    OsRng.fill_bytes(&mut secret);
    warn!("using ephemeral token secret (not persisted); externally issued tokens will not verify");
    secret
}
