//! Verification Service Binary
//!
//! Runs the GenesisGraph verification HTTP server.

use std::env;
use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use genesis_core::{Limits, VerifierConfig};
use genesis_verifier::{create_router, AppState, CheckpointStore, KeyRegistry, MemoryStore, ServiceConfig};

/// Read `name`, falling back to `default` when unset
fn env_or<T>(name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| format!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

fn verifier_config() -> Result<VerifierConfig, Box<dyn Error>> {
    let defaults = VerifierConfig::default();
    let limits = Limits::default()
        .with_max_proof_nodes(env_or("GENESIS_VERIFIER_MAX_PROOF_NODES", defaults.limits.max_proof_nodes)?)
        .with_max_chain_length(env_or("GENESIS_VERIFIER_MAX_CHAIN_LENGTH", defaults.limits.max_chain_length)?);

    let config = VerifierConfig::default()
        .with_limits(limits)
        .with_quorum(env_or("GENESIS_VERIFIER_QUORUM", defaults.quorum)?)
        .with_policy_tolerance_secs(env_or(
            "GENESIS_VERIFIER_POLICY_TOLERANCE_SECS",
            defaults.policy_tolerance_secs,
        )?)
        .with_strict(env_or("GENESIS_VERIFIER_STRICT", defaults.strict)?);

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    let log_level = env::var("GENESIS_VERIFIER_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Configuration
    let port: u16 = env_or("GENESIS_VERIFIER_PORT", 8080)?;

    let name = env::var("GENESIS_VERIFIER_NAME")
        .unwrap_or_else(|_| format!("genesis-verifier-{}", uuid::Uuid::new_v4()));

    let config = ServiceConfig {
        name,
        verifier: verifier_config()?,
    };

    // TODO: persist checkpoints across restarts once a durable CheckpointStore exists
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());

    info!(
        name = %config.name,
        port = port,
        quorum = config.verifier.quorum,
        strict = config.verifier.strict,
        "Starting verification server"
    );

    let state = Arc::new(AppState {
        registry: KeyRegistry::new(),
        store,
        config,
    });

    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Verification server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
