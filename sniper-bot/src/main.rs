mod monitor;
mod signal_listener;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;
use solana_client::nonblocking::rpc_client::RpcClient;
use sniper_common::{
    derive_master_key, BroadcastClient, EventSystem, KeyVault, PositionService, PriceClient,
    QuoteClient, SupabaseClient,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use monitor::PositionMonitor;
use signal_listener::SignalListener;

/// All shared handles, built once in `main` and passed down explicitly.
struct EngineContext {
    db: Arc<SupabaseClient>,
    service: Arc<PositionService>,
    price_client: Arc<PriceClient>,
    rpc_client: Arc<RpcClient>,
    event_system: Arc<EventSystem>,
}

fn interval_from_env(var: &str, default_secs: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}

fn build_context() -> Result<EngineContext> {
    let rpc_url = std::env::var("SOLANA_RPC_HTTP_URL").context("SOLANA_RPC_HTTP_URL must be set")?;
    let supabase_url = std::env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
    let supabase_service_role_key =
        std::env::var("SUPABASE_SERVICE_ROLE_KEY").context("SUPABASE_SERVICE_ROLE_KEY must be set")?;
    let quote_url = std::env::var("QUOTE_SERVICE_URL").context("QUOTE_SERVICE_URL must be set")?;
    let price_url = std::env::var("PRICE_FEED_URL").context("PRICE_FEED_URL must be set")?;
    let operator_secret =
        std::env::var("VAULT_OPERATOR_SECRET").context("VAULT_OPERATOR_SECRET must be set")?;
    let kdf_salt = std::env::var("VAULT_KDF_SALT").context("VAULT_KDF_SALT must be set")?;

    // Derived once; the operator secret is not kept around after this.
    let master_key = derive_master_key(&operator_secret, &kdf_salt)?;

    let event_system = Arc::new(EventSystem::new());
    let db = Arc::new(SupabaseClient::new(
        &supabase_url,
        &supabase_service_role_key,
        event_system.clone(),
    ));
    let rpc_client = Arc::new(RpcClient::new(rpc_url));
    let vault = Arc::new(KeyVault::new(master_key, db.clone()));
    let quote_client = Arc::new(QuoteClient::new(&quote_url));
    let price_client = Arc::new(PriceClient::new(&price_url));
    let broadcast = Arc::new(BroadcastClient::new(
        rpc_client.clone(),
        quote_client,
        vault.clone(),
    ));
    let service = Arc::new(PositionService::new(
        db.clone(),
        broadcast,
        vault,
        event_system.clone(),
    ));

    Ok(EngineContext {
        db,
        service,
        price_client,
        rpc_client,
        event_system,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let ctx = build_context()?;

    let sweep_interval = interval_from_env("SWEEP_INTERVAL_SECS", 5);
    let aggregate_interval = interval_from_env("AGGREGATE_INTERVAL_SECS", 60);

    let monitor = Arc::new(PositionMonitor::new(
        ctx.db.clone(),
        ctx.service.clone(),
        ctx.price_client.clone(),
        ctx.rpc_client.clone(),
        ctx.event_system.clone(),
        sweep_interval,
        aggregate_interval,
    ));
    tokio::spawn(monitor.clone().run());
    tokio::spawn(monitor.run_aggregates());

    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        let listener = Arc::new(SignalListener::new(redis_url, ctx.service.clone()));
        tokio::spawn(listener.run());
    } else {
        info!("REDIS_URL not set, running without signal ingestion");
    }

    info!("sniper-bot running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    Ok(())
}
