//! Simulated players.
//!
//! Connects a batch of sessions through the matchmaker, prints where each
//! one landed, holds them open until Ctrl-C and then disconnects them.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use gamefleet::client::{ClientFactory, SessionIdAllocator};
use gamefleet::config::ObservabilityConfig;
use gamefleet::observability::logging;

#[derive(Parser)]
#[command(name = "fleet-client")]
#[command(about = "Connect simulated players through a gamefleet matchmaker", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:42069")]
    matchmaker: SocketAddr,

    /// Number of concurrent sessions.
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// How long each session may take to become ready.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// First session sequence number.
    #[arg(long, default_value_t = 1)]
    first_session: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(&ObservabilityConfig::default());

    let factory = ClientFactory::new(cli.matchmaker, SessionIdAllocator::starting_at(cli.first_session))
        .with_ready_timeout(Duration::from_millis(cli.timeout_ms));

    let sessions = factory.connect_batch(cli.count).await?;
    for session in &sessions {
        match session.assignment() {
            Some(assignment) => println!(
                "{} -> {} ({}:{}, {:?})",
                session.id(),
                assignment.node_id,
                assignment.host,
                assignment.port,
                assignment.mode
            ),
            None => println!("{} -> unassigned", session.id()),
        }
    }

    println!("{} sessions connected, Ctrl-C to disconnect", sessions.len());
    tokio::signal::ctrl_c().await?;

    for session in &sessions {
        session.disconnect().await;
    }
    println!("Disconnected");
    Ok(())
}
