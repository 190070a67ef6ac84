use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::RelayConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting WebSocket clients and admin HTTP requests.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8089")]
    pub listen: SocketAddr,

    /// Seconds a half-open room waits for its second client before it is torn down.
    #[arg(long, default_value_t = 10)]
    pub register_timeout_secs: u64,

    /// Seconds a WebSocket may stay silent before the relay drops it.
    #[arg(long, default_value_t = 60 * 60 * 24)]
    pub read_timeout_secs: u64,

    /// Cap on messages queued in a half-open room. Unbounded when omitted.
    #[arg(long)]
    pub max_pending: Option<usize>,
}

impl From<&ServeArgs> for RelayConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            listen: args.listen,
            register_timeout: Duration::from_secs(args.register_timeout_secs),
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            max_pending: args.max_pending,
        }
    }
}
