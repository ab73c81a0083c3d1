//! Exit decision ladder for open positions.
//!
//! Pure function of (position, settings, price): no I/O, no clock. The
//! monitor owns persistence; a returned action only becomes a bracket-hit
//! flag after the sell it describes has been verified on-chain.

use crate::models::{ExitReason, Position};
use crate::settings::StrategySettings;

/// A single sell instruction for the current tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitAction {
    /// Fraction of the *currently held* size to sell, in (0, 1].
    pub fraction_of_remaining: f64,
    pub reason: ExitReason,
}

/// Evaluate the exit ladder. First match wins, one action per tick:
/// stop-loss, then the first unhit take-profit bracket, then the moon bag
/// once every bracket is hit.
///
/// Bracket `sell_percent` values are configured as percentages of the
/// original non-moon-bag size; the emitted fraction converts that statement
/// into a fraction of what is currently held, since earlier brackets have
/// already reduced the holding.
pub fn evaluate(
    position: &Position,
    settings: &StrategySettings,
    current_price: f64,
) -> Option<ExitAction> {
    if !position.is_open() || position.size_remaining <= 0.0 {
        return None;
    }
    if !current_price.is_finite() || current_price <= 0.0 || position.entry_price <= 0.0 {
        return None;
    }

    let ratio = current_price / position.entry_price;

    // Stop-loss supersedes everything and liquidates the full remainder,
    // regardless of bracket state.
    if settings.stop_loss_enabled() && ratio <= 1.0 - settings.stop_loss_percent / 100.0 {
        return Some(ExitAction {
            fraction_of_remaining: 1.0,
            reason: ExitReason::StopLoss,
        });
    }

    let moon_fraction = settings.moon_bag_percent / 100.0;
    let remaining_fraction = position.remaining_fraction();

    // Only the first unhit bracket is eligible this tick; later brackets
    // wait for it even if price already exceeds their multipliers.
    for (i, bracket) in settings.take_profit_brackets.iter().enumerate() {
        let index = (i + 1) as u8;
        if position.bracket_hit(index) {
            continue;
        }
        if ratio >= bracket.multiplier {
            if remaining_fraction <= 0.0 {
                return None;
            }
            let share_of_original = bracket.sell_percent / 100.0 * (1.0 - moon_fraction);
            let fraction = (share_of_original / remaining_fraction).min(1.0);
            if fraction <= 0.0 {
                return None;
            }
            return Some(ExitAction {
                fraction_of_remaining: fraction,
                reason: ExitReason::Bracket(index),
            });
        }
        return None;
    }

    // Every configured bracket is hit: the moon bag becomes a final bracket
    // at its own multiplier. A zero multiplier means hold indefinitely.
    if moon_fraction > 0.0
        && settings.moon_bag_multiplier > 0.0
        && ratio >= settings.moon_bag_multiplier
    {
        return Some(ExitAction {
            fraction_of_remaining: 1.0,
            reason: ExitReason::MoonBag,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyMode;
    use crate::settings::TakeProfitBracket;

    fn settings() -> StrategySettings {
        let mut s = StrategySettings::default_for(StrategyMode::Primary);
        s.stop_loss_percent = 50.0;
        s.take_profit_brackets = vec![
            TakeProfitBracket { sell_percent: 50.0, multiplier: 2.0 },
            TakeProfitBracket { sell_percent: 30.0, multiplier: 5.0 },
            TakeProfitBracket { sell_percent: 20.0, multiplier: 10.0 },
        ];
        s.moon_bag_percent = 0.0;
        s.moon_bag_multiplier = 0.0;
        s
    }

    fn position() -> Position {
        Position::new("user", "Mint111", 1.0, 0.5, 100.0, StrategyMode::Primary)
    }

    #[test]
    fn bracket_ladder_walks_to_zero() {
        let settings = settings();
        let mut pos = position();

        // price 2.0: bracket 1 fires at 50% of remaining (remaining = 100%).
        let action = evaluate(&pos, &settings, 2.0).unwrap();
        assert_eq!(action.reason, ExitReason::Bracket(1));
        assert!((action.fraction_of_remaining - 0.5).abs() < 1e-9);
        pos.apply_sell_fill(action.fraction_of_remaining, action.reason);
        assert!((pos.size_remaining - 50.0).abs() < 1e-9);

        // price 5.0: bracket 2 sells 60% of the now-remaining half, i.e.
        // 30% of the original size.
        let action = evaluate(&pos, &settings, 5.0).unwrap();
        assert_eq!(action.reason, ExitReason::Bracket(2));
        assert!((action.fraction_of_remaining - 0.6).abs() < 1e-9);
        pos.apply_sell_fill(action.fraction_of_remaining, action.reason);
        assert!((pos.size_remaining - 20.0).abs() < 1e-9);

        // price 10.0: bracket 3 sells the rest.
        let action = evaluate(&pos, &settings, 10.0).unwrap();
        assert_eq!(action.reason, ExitReason::Bracket(3));
        assert!((action.fraction_of_remaining - 1.0).abs() < 1e-9);
        pos.apply_sell_fill(action.fraction_of_remaining, action.reason);
        assert_eq!(pos.size_remaining, 0.0);
        assert!(!pos.is_open());
        assert_eq!(evaluate(&pos, &settings, 20.0), None);
    }

    #[test]
    fn stop_loss_boundary() {
        let settings = settings();
        let pos = position();

        let action = evaluate(&pos, &settings, 0.49).unwrap();
        assert_eq!(action.reason, ExitReason::StopLoss);
        assert_eq!(action.fraction_of_remaining, 1.0);

        assert_eq!(evaluate(&pos, &settings, 0.51), None);
        // Exactly on the threshold fires.
        let action = evaluate(&pos, &settings, 0.5).unwrap();
        assert_eq!(action.reason, ExitReason::StopLoss);
    }

    #[test]
    fn stop_loss_overrides_bracket_state() {
        let settings = settings();
        let mut pos = position();
        pos.apply_sell_fill(0.5, ExitReason::Bracket(1));

        let action = evaluate(&pos, &settings, 0.2).unwrap();
        assert_eq!(action.reason, ExitReason::StopLoss);
        assert_eq!(action.fraction_of_remaining, 1.0);
    }

    #[test]
    fn disabled_stop_loss_never_fires() {
        let mut settings = settings();
        settings.stop_loss_percent = 0.0;
        let pos = position();
        assert_eq!(evaluate(&pos, &settings, 0.01), None);
    }

    #[test]
    fn later_brackets_wait_for_earlier_ones() {
        let settings = settings();
        let pos = position();

        // Price already past bracket 3, but bracket 1 is unhit: only
        // bracket 1 may fire this tick.
        let action = evaluate(&pos, &settings, 12.0).unwrap();
        assert_eq!(action.reason, ExitReason::Bracket(1));
    }

    #[test]
    fn below_first_multiplier_is_a_hold() {
        let settings = settings();
        let pos = position();
        assert_eq!(evaluate(&pos, &settings, 1.9), None);
    }

    #[test]
    fn moon_bag_reserved_from_bracket_sells() {
        let mut settings = settings();
        settings.moon_bag_percent = 20.0;
        settings.moon_bag_multiplier = 0.0;
        let mut pos = position();

        // Bracket 1: 50% of the 80% tradable portion = 40% of original.
        let action = evaluate(&pos, &settings, 2.0).unwrap();
        assert!((action.fraction_of_remaining - 0.4).abs() < 1e-9);
        pos.apply_sell_fill(action.fraction_of_remaining, action.reason);
        assert!((pos.size_remaining - 60.0).abs() < 1e-9);

        pos.apply_sell_fill(
            evaluate(&pos, &settings, 5.0).unwrap().fraction_of_remaining,
            ExitReason::Bracket(2),
        );
        pos.apply_sell_fill(
            evaluate(&pos, &settings, 10.0).unwrap().fraction_of_remaining,
            ExitReason::Bracket(3),
        );

        // The moon bag (20% of original) is left, and with multiplier 0 it
        // is held indefinitely.
        assert!((pos.size_remaining - 20.0).abs() < 1e-6);
        assert_eq!(evaluate(&pos, &settings, 1_000.0), None);
    }

    #[test]
    fn moon_bag_exits_at_its_multiplier() {
        let mut settings = settings();
        settings.moon_bag_percent = 20.0;
        settings.moon_bag_multiplier = 20.0;
        let mut pos = position();

        for price in [2.0, 5.0, 10.0] {
            let action = evaluate(&pos, &settings, price).unwrap();
            pos.apply_sell_fill(action.fraction_of_remaining, action.reason);
        }
        assert!(pos.size_remaining > 0.0);

        assert_eq!(evaluate(&pos, &settings, 15.0), None);
        let action = evaluate(&pos, &settings, 20.0).unwrap();
        assert_eq!(action.reason, ExitReason::MoonBag);
        assert_eq!(action.fraction_of_remaining, 1.0);
        pos.apply_sell_fill(action.fraction_of_remaining, action.reason);
        assert_eq!(pos.size_remaining, 0.0);
    }

    #[test]
    fn garbage_prices_are_ignored() {
        let settings = settings();
        let pos = position();
        assert_eq!(evaluate(&pos, &settings, f64::NAN), None);
        assert_eq!(evaluate(&pos, &settings, 0.0), None);
        assert_eq!(evaluate(&pos, &settings, -3.0), None);
    }
}
