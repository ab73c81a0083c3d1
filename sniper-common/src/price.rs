use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::AppError;

const TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price_sol: Option<f64>,
}

/// Polled price reference. A token the feed does not know yet comes back as
/// `None`, which the monitor treats as "skip this tick", never as zero.
pub struct PriceClient {
    client: Client,
    base_url: String,
}

impl PriceClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn get_price(&self, token_address: &str) -> Result<Option<f64>, AppError> {
        let response = self
            .client
            .get(format!("{}/price/{}", self.base_url, token_address))
            .send()
            .await
            .map_err(|e| AppError::RequestError(format!("price request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::RequestError(format!(
                "price feed returned status {}",
                response.status()
            )));
        }

        let parsed: PriceResponse = response
            .json()
            .await
            .map_err(|e| AppError::JsonParseError(format!("bad price response: {}", e)))?;

        Ok(parsed.price_sol.filter(|p| p.is_finite() && *p > 0.0))
    }
}
