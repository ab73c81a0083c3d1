pub mod broadcast;
pub mod constants;
pub mod database;
pub mod error;
pub mod exit_rules;
pub mod models;
pub mod price;
pub mod quote;
pub mod service;
pub mod settings;
pub mod vault;

pub mod events {
    pub mod event_system;
}

pub use broadcast::BroadcastClient;
pub use database::SupabaseClient;
pub use error::{AppError, SwapFailureReason};
pub use events::event_system::{Event, EventSystem};
pub use exit_rules::{evaluate, ExitAction};
pub use models::{
    ExitReason, KeypairRecord, Position, PositionStatus, Signal, StrategyMode, SwapResult,
    TradeRecord, TradeSide,
};
pub use price::PriceClient;
pub use quote::QuoteClient;
pub use service::PositionService;
pub use settings::{StrategySettings, TakeProfitBracket};
pub use vault::{derive_master_key, KeyVault};
