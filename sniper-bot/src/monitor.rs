//! Recurring position sweeps.
//!
//! The price sweep drives the exit ladder for every open position on a
//! fixed interval; a slower aggregate sweep refreshes custodial balances
//! and per-user exposure. One position's failure never aborts a sweep:
//! errors are logged and the sweep moves on unconditionally.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use solana_client::nonblocking::rpc_client::RpcClient;
use sniper_common::constants::LAMPORTS_PER_SOL;
use sniper_common::events::event_system::{Event, EventSystem};
use sniper_common::models::{
    Position, PriceUpdate, PriceUpdateNotification, WalletUpdate, WalletUpdateNotification,
};
use sniper_common::{PositionService, PriceClient, SupabaseClient};
use tracing::{debug, error, info, warn};

/// Sized to what the price and broadcast collaborators tolerate, not to the
/// host. Per-position error isolation is unaffected by the pooling.
const MAX_CONCURRENT_POSITIONS: usize = 8;

pub struct PositionMonitor {
    db: Arc<SupabaseClient>,
    service: Arc<PositionService>,
    price_client: Arc<PriceClient>,
    rpc_client: Arc<RpcClient>,
    event_system: Arc<EventSystem>,
    sweep_interval: Duration,
    aggregate_interval: Duration,
}

impl PositionMonitor {
    pub fn new(
        db: Arc<SupabaseClient>,
        service: Arc<PositionService>,
        price_client: Arc<PriceClient>,
        rpc_client: Arc<RpcClient>,
        event_system: Arc<EventSystem>,
        sweep_interval: Duration,
        aggregate_interval: Duration,
    ) -> Self {
        Self {
            db,
            service,
            price_client,
            rpc_client,
            event_system,
            sweep_interval,
            aggregate_interval,
        }
    }

    /// Price/exit sweep loop. Never returns.
    pub async fn run(self: Arc<Self>) {
        info!(interval = ?self.sweep_interval, "position monitor started");
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        let positions = match self.db.get_all_open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                error!("failed to load open positions, skipping sweep: {}", e);
                return;
            }
        };
        if positions.is_empty() {
            return;
        }
        debug!(count = positions.len(), "sweeping open positions");

        stream::iter(positions)
            .for_each_concurrent(MAX_CONCURRENT_POSITIONS, |position| async move {
                self.process_position(position).await;
            })
            .await;
    }

    /// One position, fully isolated: any failure here is logged and only
    /// skips this position for this tick.
    async fn process_position(&self, position: Position) {
        let price = match self.price_client.get_price(&position.token_address).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                debug!(position = %position.id, token = %position.token_address, "no price available, skipping");
                return;
            }
            Err(e) => {
                warn!(position = %position.id, "price fetch failed, skipping: {}", e);
                return;
            }
        };

        self.event_system.emit(Event::PriceUpdate(PriceUpdateNotification {
            data: PriceUpdate {
                token_address: position.token_address.clone(),
                price_sol: price,
                timestamp: chrono::Utc::now(),
            },
            type_: "price_update".to_string(),
        }));

        let pnl = if position.entry_price > 0.0 {
            (price / position.entry_price - 1.0) * 100.0
        } else {
            0.0
        };
        if let Err(e) = self
            .db
            .update_position_price(position.id, price, pnl)
            .await
        {
            warn!(position = %position.id, "price persist failed: {}", e);
        }

        let settings = match self
            .db
            .get_settings(&position.user_id, position.mode)
            .await
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!(position = %position.id, "settings fetch failed, skipping: {}", e);
                return;
            }
        };

        // The service re-reads and re-evaluates under the position lock, so
        // a sell failure leaves bracket flags untouched and the same
        // bracket retries next tick.
        match self.service.execute_exit(position.id, &settings, price).await {
            Ok(_) => {}
            Err(e) => {
                warn!(
                    position = %position.id,
                    signature = e.signature().unwrap_or("-"),
                    "exit execution failed: {}", e
                );
            }
        }
    }

    /// Slower aggregate loop: custodial SOL balance and open exposure per
    /// user with at least one open position.
    pub async fn run_aggregates(self: Arc<Self>) {
        info!(interval = ?self.aggregate_interval, "aggregate sweep started");
        let mut ticker = tokio::time::interval(self.aggregate_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.recompute_aggregates().await {
                warn!("aggregate sweep failed: {}", e);
            }
        }
    }

    async fn recompute_aggregates(&self) -> Result<(), sniper_common::AppError> {
        let positions = self.db.get_all_open_positions().await?;
        let users: HashSet<String> = positions.iter().map(|p| p.user_id.clone()).collect();

        for user_id in users {
            let Some(wallet) = self.db.get_wallet(&user_id).await? else {
                continue;
            };
            let Ok(pubkey) = wallet.public_key.parse() else {
                warn!(user = %user_id, "wallet record has unparseable public key");
                continue;
            };

            let balance_sol = match self.rpc_client.get_balance(&pubkey).await {
                Ok(lamports) => lamports as f64 / LAMPORTS_PER_SOL as f64,
                Err(e) => {
                    warn!(user = %user_id, "balance read failed: {}", e);
                    continue;
                }
            };

            let open_exposure_sol: f64 = positions
                .iter()
                .filter(|p| p.user_id == user_id)
                .map(|p| p.entry_cost_sol * p.remaining_fraction())
                .sum();

            self.event_system.emit(Event::WalletUpdate(WalletUpdateNotification {
                data: WalletUpdate {
                    address: wallet.public_key.clone(),
                    balance_sol,
                    open_exposure_sol,
                },
                type_: "wallet_update".to_string(),
            }));
        }
        Ok(())
    }
}
