use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::{
    DatabaseNotification, DatabaseOperationEvent, ErrorEvent, ErrorNotification,
    PositionNotification, PriceUpdateNotification, TradeNotification, WalletUpdateNotification,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PositionOpened(PositionNotification),
    PositionUpdated(PositionNotification),
    PositionClosed(PositionNotification),
    TradeExecuted(TradeNotification),
    WalletUpdate(WalletUpdateNotification),
    PriceUpdate(PriceUpdateNotification),
    DatabaseOperation(DatabaseNotification),
    Error(ErrorNotification),
}

/// Fan-out bus for dashboard/bot subscribers. Emission never blocks and a
/// missing subscriber is not an error.
pub struct EventSystem {
    sender: broadcast::Sender<Event>,
}

impl EventSystem {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(200);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        if self.sender.receiver_count() == 0 {
            debug!(?event, "event dropped, no subscribers");
            return;
        }
        if let Err(e) = self.sender.send(event) {
            warn!("failed to broadcast event: {}", e);
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn emit_db_event(
        &self,
        operation: &str,
        table: &str,
        start_time: Instant,
        error: Option<String>,
    ) {
        let event = DatabaseOperationEvent {
            operation_type: operation.to_string(),
            table: table.to_string(),
            success: error.is_none(),
            duration_ms: start_time.elapsed().as_millis() as u64,
            error,
            timestamp: chrono::Utc::now(),
        };

        self.emit(Event::DatabaseOperation(DatabaseNotification {
            data: event,
            type_: "database_operation".to_string(),
        }));
    }

    pub fn emit_error(&self, error_type: &str, message: &str, context: serde_json::Value) {
        let event = ErrorEvent {
            error_type: error_type.to_string(),
            message: message.to_string(),
            context,
            timestamp: chrono::Utc::now(),
        };

        self.emit(Event::Error(ErrorNotification {
            data: event,
            type_: "error".to_string(),
        }));
    }
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}
