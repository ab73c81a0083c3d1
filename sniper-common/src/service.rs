//! Position service: the single choke point for everything that moves
//! money. Both the scheduler and the HTTP surface call through here, so a
//! position can never be recorded without verified token receipt and two
//! writers can never race the same row.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::BroadcastClient;
use crate::database::SupabaseClient;
use crate::error::AppError;
use crate::events::event_system::{Event, EventSystem};
use crate::exit_rules::{self, ExitAction};
use crate::models::{
    ExitReason, Position, PositionNotification, Signal, StrategyMode, TradeNotification,
    TradeRecord, TradeSide,
};
use crate::settings::StrategySettings;
use crate::vault::KeyVault;

pub struct PositionService {
    db: Arc<SupabaseClient>,
    broadcast: Arc<BroadcastClient>,
    vault: Arc<KeyVault>,
    event_system: Arc<EventSystem>,
    /// In-process serialization of sell attempts per position. The row
    /// version check in the store covers writers outside this process.
    position_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PositionService {
    pub fn new(
        db: Arc<SupabaseClient>,
        broadcast: Arc<BroadcastClient>,
        vault: Arc<KeyVault>,
        event_system: Arc<EventSystem>,
    ) -> Self {
        Self {
            db,
            broadcast,
            vault,
            event_system,
            position_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.position_locks.entry(id).or_default().clone()
    }

    // ---- buys --------------------------------------------------------------

    /// Auto-triggered entry point for external signals. Applies the
    /// admission gate; a skipped signal is dropped, never queued.
    pub async fn handle_signal(&self, signal: &Signal) -> Result<Option<Position>, AppError> {
        let settings = self.db.get_settings(&signal.user_id, signal.mode).await?;
        if !settings.auto_buy_enabled {
            info!(user = %signal.user_id, token = %signal.token_address, "auto-buy disabled, signal dropped");
            return Ok(None);
        }

        let open_count = self.db.count_open_positions(&signal.user_id).await?;
        if !settings.admits_new_position(open_count) {
            info!(
                user = %signal.user_id,
                open_count,
                limit = settings.max_open_positions,
                "open-position limit reached, signal dropped"
            );
            return Ok(None);
        }

        self.open_position(&signal.user_id, &signal.token_address, signal.mode, "signal")
            .await
            .map(Some)
    }

    /// Buy and record a position. The position row is inserted only after
    /// the broadcast client has verified token receipt; a failed or voided
    /// buy leaves the positions table untouched.
    pub async fn open_position(
        &self,
        user_id: &str,
        token_address: &str,
        mode: StrategyMode,
        trigger_reason: &str,
    ) -> Result<Position, AppError> {
        let settings = self.db.get_settings(user_id, mode).await?;

        let swap = self
            .broadcast
            .execute_swap(
                user_id,
                token_address,
                TradeSide::Buy,
                settings.buy_amount_sol,
                &settings,
            )
            .await?;

        let position = Position::new(
            user_id,
            token_address,
            swap.unit_price,
            swap.sol_amount,
            swap.token_amount,
            mode,
        );
        self.db.insert_position(&position).await?;

        let trade = TradeRecord::new(
            position.id,
            TradeSide::Buy,
            swap.token_amount,
            swap.unit_price,
            &swap.signature,
            trigger_reason,
        );
        self.db.insert_trade(&trade).await?;

        info!(
            position = %position.id,
            user = %user_id,
            token = %token_address,
            signature = %swap.signature,
            "position opened"
        );
        self.event_system.emit(Event::PositionOpened(PositionNotification {
            data: position.clone(),
            type_: "position_opened".to_string(),
        }));
        self.event_system.emit(Event::TradeExecuted(TradeNotification {
            data: trade,
            type_: "trade_executed".to_string(),
        }));

        Ok(position)
    }

    // ---- sells -------------------------------------------------------------

    /// Scheduler entry point. Re-reads and re-evaluates under the position
    /// lock so a concurrent manual sell cannot double-fire a bracket; the
    /// rule engine's flags guarantee at most one attempt per bracket per
    /// tick. Returns the refreshed position, or `None` when the row
    /// disappeared or the action no longer applies.
    pub async fn execute_exit(
        &self,
        position_id: Uuid,
        settings: &StrategySettings,
        current_price: f64,
    ) -> Result<Option<Position>, AppError> {
        let lock = self.lock_for(position_id);
        let _guard = lock.lock().await;

        let Some(position) = self.db.get_position(position_id).await? else {
            return Ok(None);
        };
        let Some(action) = exit_rules::evaluate(&position, settings, current_price) else {
            return Ok(Some(position));
        };

        let updated = self
            .sell_locked(position, action, current_price)
            .await?;
        Ok(Some(updated))
    }

    /// Manual fractional sell, callable while the scheduler is live.
    pub async fn sell_fraction(
        &self,
        position_id: Uuid,
        percent: f64,
    ) -> Result<Position, AppError> {
        if !(0.0..=100.0).contains(&percent) || percent == 0.0 {
            return Err(AppError::BadRequest("percent must be in (0, 100]".into()));
        }

        let lock = self.lock_for(position_id);
        let _guard = lock.lock().await;

        let position = self
            .db
            .get_position(position_id)
            .await?
            .ok_or(AppError::PositionNotFound)?;
        if !position.is_open() {
            return Err(AppError::BadRequest("position already closed".into()));
        }

        let action = ExitAction {
            fraction_of_remaining: percent / 100.0,
            reason: ExitReason::Manual,
        };
        let current_price = position.current_price;
        self.sell_locked(position, action, current_price).await
    }

    /// Full manual liquidation.
    pub async fn close_position(&self, position_id: Uuid) -> Result<Position, AppError> {
        self.sell_fraction(position_id, 100.0).await
    }

    /// Administrative termination without a sell, for positions whose
    /// on-chain balance is already gone. The row version still guards the
    /// write.
    pub async fn force_close(&self, position_id: Uuid) -> Result<Position, AppError> {
        let lock = self.lock_for(position_id);
        let _guard = lock.lock().await;

        let mut position = self
            .db
            .get_position(position_id)
            .await?
            .ok_or(AppError::PositionNotFound)?;
        let expected_version = position.version;
        position.force_close();
        self.db
            .force_close_position(&position, expected_version)
            .await?;
        position.version = expected_version + 1;

        warn!(position = %position.id, "position force-closed");
        self.emit_position_state(&position);
        self.position_locks.remove(&position_id);
        Ok(position)
    }

    /// Sell `action.fraction_of_remaining` of the position. Caller holds the
    /// position lock. Bracket flags and sizes are persisted only after the
    /// broadcast client reports a verified sell; on failure the row is left
    /// untouched so the same bracket retries next tick.
    async fn sell_locked(
        &self,
        mut position: Position,
        action: ExitAction,
        current_price: f64,
    ) -> Result<Position, AppError> {
        let tokens_to_sell = position.size_remaining * action.fraction_of_remaining;
        let settings = self
            .db
            .get_settings(&position.user_id, position.mode)
            .await?;

        let swap = self
            .broadcast
            .execute_swap(
                &position.user_id,
                &position.token_address,
                TradeSide::Sell,
                tokens_to_sell,
                &settings,
            )
            .await?;

        let expected_version = position.version;
        position.update_price(current_price);
        position.apply_sell_fill(action.fraction_of_remaining, action.reason);
        match self
            .db
            .commit_position_fill(&position, expected_version)
            .await
        {
            Ok(()) => {
                position.version = expected_version + 1;
            }
            // The tokens are already sold on-chain at this point, so a lost
            // version race must not lose the fill: re-apply it onto the
            // latest row and commit against that version.
            Err(AppError::StaleUpdate) => {
                warn!(position = %position.id, "row changed under a verified sell, re-applying fill");
                let fresh = self
                    .db
                    .get_position(position.id)
                    .await?
                    .ok_or(AppError::PositionNotFound)?;
                let fresh_version = fresh.version;
                position = fresh;
                position.update_price(current_price);
                position.apply_sell_fill(action.fraction_of_remaining, action.reason);
                self.db
                    .commit_position_fill(&position, fresh_version)
                    .await?;
                position.version = fresh_version + 1;
            }
            Err(e) => return Err(e),
        }

        let trade = TradeRecord::new(
            position.id,
            TradeSide::Sell,
            swap.token_amount,
            swap.unit_price,
            &swap.signature,
            action.reason.as_str(),
        );
        self.db.insert_trade(&trade).await?;

        info!(
            position = %position.id,
            reason = action.reason.as_str(),
            signature = %swap.signature,
            sold = swap.token_amount,
            remaining = position.size_remaining,
            "sell executed"
        );
        self.emit_position_state(&position);
        self.event_system.emit(Event::TradeExecuted(TradeNotification {
            data: trade,
            type_: "trade_executed".to_string(),
        }));

        if !position.is_open() {
            self.position_locks.remove(&position.id);
        }
        Ok(position)
    }

    fn emit_position_state(&self, position: &Position) {
        let (event_type, event) = if position.is_open() {
            ("position_updated", Event::PositionUpdated as fn(PositionNotification) -> Event)
        } else {
            ("position_closed", Event::PositionClosed as fn(PositionNotification) -> Event)
        };
        self.event_system.emit(event(PositionNotification {
            data: position.clone(),
            type_: event_type.to_string(),
        }));
    }

    // ---- queries & settings ------------------------------------------------

    pub async fn get_open_positions(&self, user_id: &str) -> Result<Vec<Position>, AppError> {
        self.db.get_open_positions(user_id).await
    }

    pub async fn get_settings(
        &self,
        user_id: &str,
        mode: StrategyMode,
    ) -> Result<StrategySettings, AppError> {
        self.db.get_settings(user_id, mode).await
    }

    pub async fn update_settings(&self, settings: &StrategySettings) -> Result<(), AppError> {
        settings.validate()?;
        self.db.upsert_settings(settings).await
    }

    // ---- wallet ------------------------------------------------------------

    pub async fn generate_wallet(&self, user_id: &str) -> Result<String, AppError> {
        Ok(self.vault.generate(user_id).await?.to_string())
    }

    pub async fn import_wallet(&self, user_id: &str, raw: &[u8]) -> Result<String, AppError> {
        Ok(self.vault.import(user_id, raw).await?.to_string())
    }

    pub async fn export_wallet(&self, user_id: &str) -> Result<String, AppError> {
        self.vault.export(user_id).await
    }
}
