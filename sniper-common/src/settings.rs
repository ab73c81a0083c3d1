use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::StrategyMode;

pub const MAX_BRACKETS: usize = 3;

/// One take-profit exit step: sell `sell_percent` (of the original
/// non-moon-bag size) once price reaches `multiplier` × entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct TakeProfitBracket {
    pub sell_percent: f64,
    pub multiplier: f64,
}

/// Per-user, per-mode trading configuration. One row per `(user, mode)`;
/// defaults are resolved once when the row is read, validation happens when
/// the row is written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StrategySettings {
    pub user_id: Option<String>,
    pub mode: StrategyMode,
    pub buy_amount_sol: f64,
    pub slippage_percent: f64,
    pub tip_amount_sol: f64,
    pub priority_fee_lamports: u64,
    /// Zero disables the stop-loss.
    pub stop_loss_percent: f64,
    #[serde(default)]
    pub take_profit_brackets: Vec<TakeProfitBracket>,
    pub moon_bag_percent: f64,
    /// Zero means the moon bag is held indefinitely.
    pub moon_bag_multiplier: f64,
    pub auto_buy_enabled: bool,
    /// Zero is the unlimited sentinel.
    #[serde(default)]
    pub max_open_positions: i32,
}

impl StrategySettings {
    pub fn default_for(mode: StrategyMode) -> Self {
        Self {
            user_id: None,
            mode,
            buy_amount_sol: 0.05,
            slippage_percent: 15.0,
            tip_amount_sol: 0.001,
            priority_fee_lamports: 100_000,
            stop_loss_percent: 50.0,
            take_profit_brackets: vec![
                TakeProfitBracket { sell_percent: 50.0, multiplier: 2.0 },
                TakeProfitBracket { sell_percent: 30.0, multiplier: 5.0 },
                TakeProfitBracket { sell_percent: 20.0, multiplier: 10.0 },
            ],
            moon_bag_percent: 0.0,
            moon_bag_multiplier: 0.0,
            auto_buy_enabled: false,
            max_open_positions: 3,
        }
    }

    /// Write-time validation. Ranges are enforced here, never re-checked at
    /// read time.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.buy_amount_sol <= 0.0 {
            return Err(AppError::BadRequest("buy_amount_sol must be positive".into()));
        }
        if !(0.0..100.0).contains(&self.slippage_percent) {
            return Err(AppError::BadRequest(
                "slippage_percent must be in [0, 100)".into(),
            ));
        }
        if self.tip_amount_sol < 0.0 {
            return Err(AppError::BadRequest("tip_amount_sol must not be negative".into()));
        }
        if !(0.0..100.0).contains(&self.stop_loss_percent) {
            return Err(AppError::BadRequest(
                "stop_loss_percent must be in [0, 100)".into(),
            ));
        }
        if !(0.0..=90.0).contains(&self.moon_bag_percent) {
            return Err(AppError::BadRequest(
                "moon_bag_percent must be in [0, 90]".into(),
            ));
        }
        if self.moon_bag_multiplier < 0.0 {
            return Err(AppError::BadRequest(
                "moon_bag_multiplier must not be negative".into(),
            ));
        }
        if self.max_open_positions < 0 {
            return Err(AppError::BadRequest(
                "max_open_positions must not be negative".into(),
            ));
        }
        if self.take_profit_brackets.len() > MAX_BRACKETS {
            return Err(AppError::BadRequest(format!(
                "at most {} take-profit brackets are supported",
                MAX_BRACKETS
            )));
        }

        let mut percent_sum = 0.0;
        let mut last_multiplier = 1.0;
        for bracket in &self.take_profit_brackets {
            if bracket.sell_percent <= 0.0 || bracket.sell_percent > 100.0 {
                return Err(AppError::BadRequest(
                    "bracket sell_percent must be in (0, 100]".into(),
                ));
            }
            if bracket.multiplier <= last_multiplier {
                return Err(AppError::BadRequest(
                    "bracket multipliers must be strictly increasing and above 1".into(),
                ));
            }
            last_multiplier = bracket.multiplier;
            percent_sum += bracket.sell_percent;
        }
        // The bracket percentages apply to the non-moon-bag portion; selling
        // more than all of it is a configuration error.
        if percent_sum > 100.0 + 1e-9 {
            return Err(AppError::BadRequest(
                "bracket sell_percent values must sum to at most 100".into(),
            ));
        }

        Ok(())
    }

    pub fn stop_loss_enabled(&self) -> bool {
        self.stop_loss_percent > 0.0
    }

    /// Admission gate: true when another auto-triggered buy is allowed for a
    /// user that currently holds `open_count` open or partial positions.
    pub fn admits_new_position(&self, open_count: usize) -> bool {
        if self.max_open_positions == 0 {
            return true;
        }
        open_count < self.max_open_positions as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        StrategySettings::default_for(StrategyMode::Primary)
            .validate()
            .unwrap();
        StrategySettings::default_for(StrategyMode::Bundle)
            .validate()
            .unwrap();
    }

    #[test]
    fn rejects_bracket_sum_above_hundred() {
        let mut settings = StrategySettings::default_for(StrategyMode::Primary);
        settings.take_profit_brackets = vec![
            TakeProfitBracket { sell_percent: 70.0, multiplier: 2.0 },
            TakeProfitBracket { sell_percent: 50.0, multiplier: 4.0 },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_non_increasing_multipliers() {
        let mut settings = StrategySettings::default_for(StrategyMode::Primary);
        settings.take_profit_brackets = vec![
            TakeProfitBracket { sell_percent: 30.0, multiplier: 3.0 },
            TakeProfitBracket { sell_percent: 30.0, multiplier: 2.0 },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_fourth_bracket() {
        let mut settings = StrategySettings::default_for(StrategyMode::Primary);
        settings.take_profit_brackets = vec![
            TakeProfitBracket { sell_percent: 10.0, multiplier: 2.0 },
            TakeProfitBracket { sell_percent: 10.0, multiplier: 3.0 },
            TakeProfitBracket { sell_percent: 10.0, multiplier: 4.0 },
            TakeProfitBracket { sell_percent: 10.0, multiplier: 5.0 },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn admission_gate_counts_open_positions() {
        let mut settings = StrategySettings::default_for(StrategyMode::Primary);
        settings.max_open_positions = 2;
        assert!(settings.admits_new_position(0));
        assert!(settings.admits_new_position(1));
        assert!(!settings.admits_new_position(2));
        assert!(!settings.admits_new_position(3));
    }

    #[test]
    fn zero_means_unlimited() {
        let mut settings = StrategySettings::default_for(StrategyMode::Primary);
        settings.max_open_positions = 0;
        assert!(settings.admits_new_position(10_000));
    }
}
