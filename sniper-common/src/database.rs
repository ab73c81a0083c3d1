use std::sync::Arc;
use std::time::Instant;

use postgrest::Postgrest;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::event_system::EventSystem;
use crate::models::{KeypairRecord, Position, StrategyMode, TradeRecord};
use crate::settings::StrategySettings;

/// PostgREST-backed store for the four durable record kinds: wallets,
/// strategy settings, positions and the append-only trade log. Individual
/// row updates are serialized; position mutations additionally carry an
/// optimistic version check.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Postgrest,
    event_system: Arc<EventSystem>,
}

impl SupabaseClient {
    pub fn new(url: &str, service_role_key: &str, event_system: Arc<EventSystem>) -> Self {
        let client = Postgrest::new(url)
            .insert_header("apikey", service_role_key)
            .insert_header("Authorization", format!("Bearer {}", service_role_key));

        Self {
            client,
            event_system,
        }
    }

    async fn body_of(resp: reqwest::Response) -> Result<String, AppError> {
        resp.text()
            .await
            .map_err(|e| AppError::RequestError(e.to_string()))
    }

    // ---- wallets -----------------------------------------------------------

    pub async fn get_wallet(&self, user_id: &str) -> Result<Option<KeypairRecord>, AppError> {
        let resp = self
            .client
            .from("wallets")
            .select("*")
            .eq("user_id", user_id)
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let body = Self::body_of(resp).await?;
        let mut records: Vec<KeypairRecord> = serde_json::from_str(&body)
            .map_err(|e| AppError::JsonParseError(format!("Failed to parse wallet: {}", e)))?;
        Ok(records.pop())
    }

    /// Insert-or-replace the single wallet row for a user. Re-import is a
    /// destructive overwrite with no soft-delete.
    pub async fn upsert_wallet(
        &self,
        user_id: &str,
        public_key: &str,
        encrypted_secret: &str,
    ) -> Result<(), AppError> {
        let start_time = Instant::now();

        let operation_result = async {
            let resp = self
                .client
                .from("wallets")
                .upsert(
                    json!({
                        "user_id": user_id,
                        "public_key": public_key,
                        "encrypted_secret": encrypted_secret,
                        "updated_at": chrono::Utc::now(),
                    })
                    .to_string(),
                )
                .on_conflict("user_id")
                .execute()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = Self::body_of(resp).await.unwrap_or_default();
                return Err(AppError::DatabaseError(format!(
                    "Failed to upsert wallet. Status: {}, Body: {}",
                    status, body
                )));
            }
            Ok(())
        }
        .await;

        self.event_system.emit_db_event(
            "upsert",
            "wallets",
            start_time,
            operation_result.as_ref().err().map(|e: &AppError| e.to_string()),
        );

        if let Err(ref e) = operation_result {
            self.event_system.emit_error(
                "database_error",
                &e.to_string(),
                json!({ "operation": "upsert", "table": "wallets", "user_id": user_id }),
            );
        }

        operation_result
    }

    // ---- strategy settings -------------------------------------------------

    /// Settings for one `(user, mode)` pair, defaults resolved here when the
    /// row does not exist yet.
    pub async fn get_settings(
        &self,
        user_id: &str,
        mode: StrategyMode,
    ) -> Result<StrategySettings, AppError> {
        let resp = self
            .client
            .from("strategy_settings")
            .select("*")
            .eq("user_id", user_id)
            .eq("mode", mode.as_str())
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let body = Self::body_of(resp).await?;
        let mut rows: Vec<StrategySettings> = serde_json::from_str(&body)
            .map_err(|e| AppError::JsonParseError(format!("Failed to parse settings: {}", e)))?;

        Ok(rows.pop().unwrap_or_else(|| {
            let mut defaults = StrategySettings::default_for(mode);
            defaults.user_id = Some(user_id.to_string());
            defaults
        }))
    }

    /// Write validated settings. Callers validate before this point; the
    /// store never re-checks ranges at read time.
    pub async fn upsert_settings(&self, settings: &StrategySettings) -> Result<(), AppError> {
        let start_time = Instant::now();

        let operation_result = async {
            let resp = self
                .client
                .from("strategy_settings")
                .upsert(serde_json::to_string(settings)?)
                .on_conflict("user_id,mode")
                .execute()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = Self::body_of(resp).await.unwrap_or_default();
                return Err(AppError::DatabaseError(format!(
                    "Failed to upsert settings. Status: {}, Body: {}",
                    status, body
                )));
            }
            Ok(())
        }
        .await;

        self.event_system.emit_db_event(
            "upsert",
            "strategy_settings",
            start_time,
            operation_result.as_ref().err().map(|e: &AppError| e.to_string()),
        );

        operation_result
    }

    // ---- positions ---------------------------------------------------------

    /// Insert a freshly opened position. Only called after verified on-chain
    /// token receipt; an unverified buy must never reach this method.
    pub async fn insert_position(&self, position: &Position) -> Result<(), AppError> {
        let start_time = Instant::now();

        let operation_result = async {
            let resp = self
                .client
                .from("positions")
                .insert(serde_json::to_string(position)?)
                .execute()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = Self::body_of(resp).await.unwrap_or_default();
                return Err(AppError::DatabaseError(format!(
                    "Failed to insert position. Status: {}, Body: {}",
                    status, body
                )));
            }
            Ok(())
        }
        .await;

        self.event_system.emit_db_event(
            "insert",
            "positions",
            start_time,
            operation_result.as_ref().err().map(|e: &AppError| e.to_string()),
        );

        if let Err(ref e) = operation_result {
            self.event_system.emit_error(
                "database_error",
                &e.to_string(),
                json!({
                    "operation": "insert",
                    "table": "positions",
                    "position_id": position.id,
                    "user_id": position.user_id,
                }),
            );
        }

        operation_result
    }

    pub async fn get_position(&self, id: Uuid) -> Result<Option<Position>, AppError> {
        let resp = self
            .client
            .from("positions")
            .select("*")
            .eq("id", id.to_string())
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let body = Self::body_of(resp).await?;
        let mut rows: Vec<Position> = serde_json::from_str(&body)
            .map_err(|e| AppError::JsonParseError(format!("Failed to parse position: {}", e)))?;
        Ok(rows.pop())
    }

    pub async fn get_open_positions(&self, user_id: &str) -> Result<Vec<Position>, AppError> {
        let resp = self
            .client
            .from("positions")
            .select("*")
            .eq("user_id", user_id)
            .neq("status", "closed")
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let body = Self::body_of(resp).await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::JsonParseError(format!("Failed to parse positions: {}", e)))
    }

    /// Every open or partial position across all users, in storage order.
    /// The monitor sweep iterates exactly this set.
    pub async fn get_all_open_positions(&self) -> Result<Vec<Position>, AppError> {
        let resp = self
            .client
            .from("positions")
            .select("*")
            .neq("status", "closed")
            .order("created_at")
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let body = Self::body_of(resp).await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::JsonParseError(format!("Failed to parse positions: {}", e)))
    }

    pub async fn count_open_positions(&self, user_id: &str) -> Result<usize, AppError> {
        Ok(self.get_open_positions(user_id).await?.len())
    }

    /// Price/PnL refresh. No version bump: the monitor is the only writer of
    /// these two columns and they carry no invariants.
    pub async fn update_position_price(
        &self,
        id: Uuid,
        current_price: f64,
        unrealized_pnl_percent: f64,
    ) -> Result<(), AppError> {
        let resp = self
            .client
            .from("positions")
            .update(
                json!({
                    "current_price": current_price,
                    "unrealized_pnl_percent": unrealized_pnl_percent,
                })
                .to_string(),
            )
            .eq("id", id.to_string())
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AppError::DatabaseError(format!(
                "Failed to update position price. Status: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Persist the outcome of a verified sell under a compare-and-swap on
    /// the row version. An empty update means another writer got there
    /// first; the caller re-reads and re-evaluates.
    pub async fn commit_position_fill(
        &self,
        position: &Position,
        expected_version: i64,
    ) -> Result<(), AppError> {
        let start_time = Instant::now();

        let operation_result = async {
            let resp = self
                .client
                .from("positions")
                .update(
                    json!({
                        "size_remaining": position.size_remaining,
                        "bracket_1_hit": position.bracket_1_hit,
                        "bracket_2_hit": position.bracket_2_hit,
                        "bracket_3_hit": position.bracket_3_hit,
                        "status": position.status,
                        "closed_at": position.closed_at,
                        "current_price": position.current_price,
                        "unrealized_pnl_percent": position.unrealized_pnl_percent,
                        "version": expected_version + 1,
                    })
                    .to_string(),
                )
                .eq("id", position.id.to_string())
                .eq("version", expected_version.to_string())
                .execute()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            let body = Self::body_of(resp).await?;
            let updated: Vec<serde_json::Value> = serde_json::from_str(&body)
                .map_err(|e| AppError::JsonParseError(e.to_string()))?;

            if updated.is_empty() {
                return Err(AppError::StaleUpdate);
            }
            Ok(())
        }
        .await;

        self.event_system.emit_db_event(
            "update",
            "positions",
            start_time,
            operation_result.as_ref().err().map(|e: &AppError| e.to_string()),
        );

        operation_result
    }

    /// Administrative force-close, still version-checked.
    pub async fn force_close_position(
        &self,
        position: &Position,
        expected_version: i64,
    ) -> Result<(), AppError> {
        self.commit_position_fill(position, expected_version).await
    }

    // ---- trades ------------------------------------------------------------

    /// Append one immutable trade-log row.
    pub async fn insert_trade(&self, trade: &TradeRecord) -> Result<(), AppError> {
        let start_time = Instant::now();

        let operation_result = async {
            let resp = self
                .client
                .from("trades")
                .insert(serde_json::to_string(trade)?)
                .execute()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = Self::body_of(resp).await.unwrap_or_default();
                return Err(AppError::DatabaseError(format!(
                    "Failed to insert trade. Status: {}, Body: {}",
                    status, body
                )));
            }
            Ok(())
        }
        .await;

        self.event_system.emit_db_event(
            "insert",
            "trades",
            start_time,
            operation_result.as_ref().err().map(|e: &AppError| e.to_string()),
        );

        if let Err(ref e) = operation_result {
            self.event_system.emit_error(
                "database_error",
                &e.to_string(),
                json!({
                    "operation": "insert",
                    "table": "trades",
                    "position_id": trade.position_id,
                    "signature": trade.signature,
                }),
            );
        }

        operation_result
    }

    pub async fn get_trades(&self, position_id: Uuid) -> Result<Vec<TradeRecord>, AppError> {
        let resp = self
            .client
            .from("trades")
            .select("*")
            .eq("position_id", position_id.to_string())
            .order("created_at")
            .execute()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let body = Self::body_of(resp).await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::JsonParseError(format!("Failed to parse trades: {}", e)))
    }
}
