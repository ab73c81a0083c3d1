//! Redis subscription delivering buy signals from the external detectors.
//!
//! The detector side (creator-quality scoring, bundle-buy detection) is a
//! separate system; what arrives here is a `(user, token, mode)` tuple. A
//! bad or failing signal only logs — the subscription itself must survive.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sniper_common::constants::SIGNALS_CHANNEL;
use sniper_common::models::Signal;
use sniper_common::PositionService;
use tracing::{error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct SignalListener {
    redis_url: String,
    service: Arc<PositionService>,
}

impl SignalListener {
    pub fn new(redis_url: String, service: Arc<PositionService>) -> Self {
        Self { redis_url, service }
    }

    /// Subscription loop with reconnect. Never returns.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.listen_once().await {
                error!("signal subscription lost: {}", e);
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn listen_once(&self) -> Result<()> {
        let client = redis::Client::open(self.redis_url.as_str())
            .context("invalid redis url")?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .context("redis connection failed")?;
        pubsub
            .subscribe(SIGNALS_CHANNEL)
            .await
            .context("subscribe failed")?;
        info!(channel = SIGNALS_CHANNEL, "listening for signals");

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("unreadable signal payload: {}", e);
                    continue;
                }
            };

            let signal: Signal = match serde_json::from_str(&payload) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("malformed signal dropped: {} ({})", e, payload);
                    continue;
                }
            };

            info!(
                user = %signal.user_id,
                token = %signal.token_address,
                mode = %signal.mode,
                "signal received"
            );
            match self.service.handle_signal(&signal).await {
                Ok(Some(position)) => {
                    info!(position = %position.id, "signal buy filled");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        user = %signal.user_id,
                        token = %signal.token_address,
                        signature = e.signature().unwrap_or("-"),
                        "signal buy failed: {}", e
                    );
                }
            }
        }

        Ok(())
    }
}
