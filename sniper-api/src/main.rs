mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use solana_client::nonblocking::rpc_client::RpcClient;
use sniper_common::{
    derive_master_key, BroadcastClient, EventSystem, KeyVault, PositionService, QuoteClient,
    SupabaseClient,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PositionService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let rpc_url = std::env::var("SOLANA_RPC_HTTP_URL").context("SOLANA_RPC_HTTP_URL must be set")?;
    let supabase_url = std::env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
    let supabase_service_role_key =
        std::env::var("SUPABASE_SERVICE_ROLE_KEY").context("SUPABASE_SERVICE_ROLE_KEY must be set")?;
    let quote_url = std::env::var("QUOTE_SERVICE_URL").context("QUOTE_SERVICE_URL must be set")?;
    let operator_secret =
        std::env::var("VAULT_OPERATOR_SECRET").context("VAULT_OPERATOR_SECRET must be set")?;
    let kdf_salt = std::env::var("VAULT_KDF_SALT").context("VAULT_KDF_SALT must be set")?;
    let port: u16 = std::env::var("API_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .context("API_PORT must be a port number")?;

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
    let broadcast = Arc::new(BroadcastClient::new(rpc_client, quote_client, vault.clone()));
    let service = Arc::new(PositionService::new(db, broadcast, vault, event_system));

    let state = AppState { service };

    let app = Router::new()
        .route("/wallet/:user_id/generate", post(routes::generate_wallet))
        .route("/wallet/:user_id/import", post(routes::import_wallet))
        .route("/wallet/:user_id/export", get(routes::export_wallet))
        .route("/positions", post(routes::open_position))
        .route("/users/:user_id/positions", get(routes::get_open_positions))
        .route("/positions/:position_id/sell", post(routes::sell_fraction))
        .route("/positions/:position_id", delete(routes::close_position))
        .route(
            "/positions/:position_id/force-close",
            post(routes::force_close_position),
        )
        .route(
            "/settings/:user_id/:mode",
            get(routes::get_settings).put(routes::update_settings),
        )
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "sniper-api listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}
