use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    Primary,
    Bundle,
}

impl StrategyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::Primary => "primary",
            StrategyMode::Bundle => "bundle",
        }
    }
}

impl std::fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Partial,
    Closed,
}

/// Why a sell leg was triggered. Rendered into the immutable trade log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Bracket(u8),
    MoonBag,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Bracket(1) => "bracket_1",
            ExitReason::Bracket(2) => "bracket_2",
            ExitReason::Bracket(_) => "bracket_3",
            ExitReason::MoonBag => "moon_bag",
            ExitReason::Manual => "manual",
        }
    }
}

/// Custodial wallet row. `encrypted_secret` is the only at-rest form of the
/// secret key.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeypairRecord {
    pub user_id: String,
    pub public_key: String,
    pub encrypted_secret: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Position {
    pub id: Uuid,
    pub user_id: String,
    pub token_address: String,
    pub entry_price: f64,
    pub entry_cost_sol: f64,
    pub size_bought: f64,
    pub size_remaining: f64,
    pub current_price: f64,
    pub unrealized_pnl_percent: f64,
    pub bracket_1_hit: bool,
    pub bracket_2_hit: bool,
    pub bracket_3_hit: bool,
    pub status: PositionStatus,
    pub mode: StrategyMode,
    /// Optimistic-concurrency counter, bumped on every row update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(
        user_id: &str,
        token_address: &str,
        entry_price: f64,
        entry_cost_sol: f64,
        size_bought: f64,
        mode: StrategyMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            token_address: token_address.to_string(),
            entry_price,
            entry_cost_sol,
            size_bought,
            size_remaining: size_bought,
            current_price: entry_price,
            unrealized_pnl_percent: 0.0,
            bracket_1_hit: false,
            bracket_2_hit: false,
            bracket_3_hit: false,
            status: PositionStatus::Open,
            mode,
            version: 0,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.status, PositionStatus::Closed)
    }

    /// Fraction of the bought size still held, in [0, 1].
    pub fn remaining_fraction(&self) -> f64 {
        if self.size_bought <= 0.0 {
            return 0.0;
        }
        (self.size_remaining / self.size_bought).clamp(0.0, 1.0)
    }

    pub fn bracket_hit(&self, index: u8) -> bool {
        match index {
            1 => self.bracket_1_hit,
            2 => self.bracket_2_hit,
            3 => self.bracket_3_hit,
            _ => false,
        }
    }

    /// Bracket flags are one-way: setting is idempotent and there is no
    /// clearing path.
    fn mark_bracket_hit(&mut self, index: u8) {
        match index {
            1 => self.bracket_1_hit = true,
            2 => self.bracket_2_hit = true,
            3 => self.bracket_3_hit = true,
            _ => {}
        }
    }

    pub fn update_price(&mut self, current_price: f64) {
        self.current_price = current_price;
        if self.entry_price > 0.0 {
            self.unrealized_pnl_percent =
                (current_price / self.entry_price - 1.0) * 100.0;
        }
    }

    /// Apply a verified sell fill to the row. Size never goes negative, and
    /// a full fill (or dust remainder) closes the position.
    pub fn apply_sell_fill(&mut self, fraction_of_remaining: f64, reason: ExitReason) {
        let fraction = fraction_of_remaining.clamp(0.0, 1.0);
        let sold = self.size_remaining * fraction;
        self.size_remaining = (self.size_remaining - sold).max(0.0);

        match reason {
            ExitReason::StopLoss => {
                self.size_remaining = 0.0;
            }
            ExitReason::Bracket(n) => self.mark_bracket_hit(n),
            ExitReason::MoonBag | ExitReason::Manual => {}
        }

        if self.size_remaining <= f64::EPSILON * self.size_bought {
            self.size_remaining = 0.0;
            self.status = PositionStatus::Closed;
            self.closed_at = Some(Utc::now());
        } else {
            self.status = PositionStatus::Partial;
        }
    }

    /// Administrative termination without a fill (e.g. ghost positions with
    /// no on-chain balance left).
    pub fn force_close(&mut self) {
        self.size_remaining = 0.0;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(Utc::now());
    }
}

/// Immutable trade-log entry, one per executed leg.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TradeRecord {
    pub id: Uuid,
    pub position_id: Uuid,
    pub side: TradeSide,
    pub amount: f64,
    pub unit_price: f64,
    pub signature: String,
    pub trigger_reason: String,
    pub created_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(
        position_id: Uuid,
        side: TradeSide,
        amount: f64,
        unit_price: f64,
        signature: &str,
        trigger_reason: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            position_id,
            side,
            amount,
            unit_price,
            signature: signature.to_string(),
            trigger_reason: trigger_reason.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a completed, confirmed swap leg.
#[derive(Debug, Clone)]
pub struct SwapResult {
    pub signature: String,
    pub side: TradeSide,
    pub sol_amount: f64,
    pub token_amount: f64,
    pub unit_price: f64,
}

/// Buy signal delivered by the external detectors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Signal {
    pub user_id: String,
    pub token_address: String,
    pub mode: StrategyMode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenPositionRequest {
    pub user_id: String,
    pub token_address: String,
    pub mode: StrategyMode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SellFractionRequest {
    pub percent: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImportWalletRequest {
    pub key_material: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WalletUpdate {
    pub address: String,
    pub balance_sol: f64,
    pub open_exposure_sol: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceUpdate {
    pub token_address: String,
    pub price_sol: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseOperationEvent {
    pub operation_type: String,
    pub table: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorEvent {
    pub error_type: String,
    pub message: String,
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PositionNotification {
    pub data: Position,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TradeNotification {
    pub data: TradeRecord,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WalletUpdateNotification {
    pub data: WalletUpdate,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceUpdateNotification {
    pub data: PriceUpdate,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseNotification {
    pub data: DatabaseOperationEvent,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorNotification {
    pub data: ErrorEvent,
    #[serde(rename = "type")]
    pub type_: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position() -> Position {
        Position::new("user", "TokenMint111", 1.0, 0.5, 1_000_000.0, StrategyMode::Primary)
    }

    #[test]
    fn sell_fill_never_goes_negative() {
        let mut pos = position();
        pos.apply_sell_fill(1.5, ExitReason::Manual);
        assert_eq!(pos.size_remaining, 0.0);
        assert_eq!(pos.status, PositionStatus::Closed);
        assert!(pos.closed_at.is_some());
    }

    #[test]
    fn size_remaining_is_non_increasing() {
        let mut pos = position();
        let mut last = pos.size_remaining;
        for fraction in [0.5, 0.6, 1.0] {
            pos.apply_sell_fill(fraction, ExitReason::Manual);
            assert!(pos.size_remaining <= last);
            assert!(pos.size_remaining >= 0.0);
            last = pos.size_remaining;
        }
    }

    #[test]
    fn partial_fill_keeps_position_partial() {
        let mut pos = position();
        pos.apply_sell_fill(0.5, ExitReason::Bracket(1));
        assert_eq!(pos.status, PositionStatus::Partial);
        assert!(pos.bracket_1_hit);
        assert!((pos.size_remaining - 500_000.0).abs() < 1e-6);
        assert!((pos.remaining_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_liquidates_everything() {
        let mut pos = position();
        pos.apply_sell_fill(0.3, ExitReason::Bracket(1));
        pos.apply_sell_fill(1.0, ExitReason::StopLoss);
        assert_eq!(pos.size_remaining, 0.0);
        assert_eq!(pos.status, PositionStatus::Closed);
        // Flags survive: they are never reset.
        assert!(pos.bracket_1_hit);
    }

    #[test]
    fn bracket_flags_are_monotonic() {
        let mut pos = position();
        pos.apply_sell_fill(0.5, ExitReason::Bracket(2));
        assert!(pos.bracket_2_hit);
        pos.apply_sell_fill(0.5, ExitReason::Bracket(3));
        assert!(pos.bracket_2_hit && pos.bracket_3_hit);
    }

    #[test]
    fn price_update_tracks_pnl() {
        let mut pos = position();
        pos.update_price(2.0);
        assert!((pos.unrealized_pnl_percent - 100.0).abs() < 1e-9);
        pos.update_price(0.5);
        assert!((pos.unrealized_pnl_percent + 50.0).abs() < 1e-9);
    }
}
