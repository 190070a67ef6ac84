use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use pair_relay::{
    cli::{Cli, Command},
    config::RelayConfig,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let config = RelayConfig::from(&args);
            let server = Server::bind(&config)
                .await
                .context("failed to start relay")?;
            let addr = server.local_addr()?;
            info!(
                register_timeout = ?config.register_timeout,
                max_pending = ?config.max_pending,
                "relay listening on {}",
                addr
            );
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err.into());
            }
        }
    }

    Ok(())
}
