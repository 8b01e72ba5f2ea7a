//! Tandem Simulator - randomized convergence check for the datastore.
//!
//! Runs several replicas over the in-memory hub, edits them concurrently,
//! delivers their transactions out of order and verifies that every replica
//! ends in the same state.

mod config;
mod error;
mod simulation;

use crate::config::Config;
use crate::simulation::Simulation;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_sim=info,tandem_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        replicas = config.replicas,
        rounds = config.rounds,
        edits_per_round = config.edits_per_round,
        seed = config.seed,
        "Starting simulation"
    );

    let report = Simulation::new(&config)?.run().await?;

    tracing::info!(
        transactions = report.transactions,
        undos = report.undos,
        redos = report.redos,
        deliveries = report.deliveries,
        events = report.events,
        snapshot_bytes = report.snapshot_bytes,
        "All replicas converged"
    );

    Ok(())
}
