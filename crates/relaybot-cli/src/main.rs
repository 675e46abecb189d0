//! Relaybot CLI — composition-root binary.
//!
//! Wires the message bus, memory subsystem, agent subscriber, and HTTP
//! gateway together and runs until interrupted.

mod gateway;
mod helpers;

use anyhow::Result;
use clap::Parser;

/// 🦀 Relaybot — conversational agent runtime with an OpenAI-compatible gateway
#[derive(Parser)]
#[command(name = "relaybot", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logs);
    gateway::run().await
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("relaybot=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
