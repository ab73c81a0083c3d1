//! Quoting collaborator client.
//!
//! The quote service owns the swap-pricing math and hands back a
//! ready-to-sign transaction; this client only validates shape. Balances
//! and simulation are verified independently by the broadcast client before
//! anything derived from a quote is trusted.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tokio::time::sleep;
use tracing::warn;

use crate::constants::QUOTE_MAX_RETRIES;
use crate::error::AppError;

const TIMEOUT_SECS: u64 = 10;
const RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct QuoteParams<'a> {
    input_mint: &'a str,
    output_mint: &'a str,
    amount: String,
    slippage_bps: u16,
}

/// Quote payload, passed back to the swap endpoint verbatim. Only the two
/// amount fields are interpreted locally.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QuoteResponse {
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outAmount")]
    pub out_amount: String,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    user_public_key: String,
    quote_response: &'a QuoteResponse,
    prioritization_fee_lamports: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

/// A quoted, unsigned swap ready for the vault.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub unsigned_tx: Vec<u8>,
    pub in_amount: u64,
    pub out_amount: u64,
}

pub struct QuoteClient {
    client: Client,
    base_url: String,
}

impl QuoteClient {
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

    /// Fetch an unsigned swap transaction for `amount` of `input_mint` into
    /// `output_mint`. Transient failures are retried a bounded number of
    /// times here, then surfaced as `QuoteUnavailable`.
    pub async fn get_swap_transaction(
        &self,
        wallet: &Pubkey,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        priority_fee_lamports: u64,
    ) -> Result<SwapQuote, AppError> {
        let mut attempt = 0;
        loop {
            match self
                .fetch_once(wallet, input_mint, output_mint, amount, slippage_bps, priority_fee_lamports)
                .await
            {
                Ok(quote) => return Ok(quote),
                Err(e) if attempt + 1 < QUOTE_MAX_RETRIES && e.is_retryable() => {
                    attempt += 1;
                    warn!(attempt, "quote request failed, retrying: {}", e);
                    sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(
        &self,
        wallet: &Pubkey,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        priority_fee_lamports: u64,
    ) -> Result<SwapQuote, AppError> {
        let params = QuoteParams {
            input_mint,
            output_mint,
            amount: amount.to_string(),
            slippage_bps,
        };

        let response = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| AppError::QuoteUnavailable(format!("quote request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::QuoteUnavailable(format!("quote body unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::QuoteUnavailable(format!(
                "quote failed with status {}: {}",
                status, text
            )));
        }

        let quote: QuoteResponse = serde_json::from_str(&text).map_err(|e| {
            AppError::QuoteUnavailable(format!("unparseable quote response: {}", e))
        })?;

        let swap_request = SwapRequest {
            user_public_key: wallet.to_string(),
            quote_response: &quote,
            prioritization_fee_lamports: priority_fee_lamports,
        };

        let response = self
            .client
            .post(format!("{}/swap", self.base_url))
            .json(&swap_request)
            .send()
            .await
            .map_err(|e| AppError::QuoteUnavailable(format!("swap request failed: {}", e)))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_else(|_| "Unknown error".into());
            return Err(AppError::QuoteUnavailable(format!("swap failed: {}", error)));
        }

        let swap: SwapResponse = response.json().await.map_err(|e| {
            AppError::QuoteUnavailable(format!("unparseable swap response: {}", e))
        })?;

        // A quote that cannot even be base64-decoded is a collaborator
        // contract violation, not a transient outage.
        let unsigned_tx = BASE64
            .decode(&swap.swap_transaction)
            .map_err(|e| AppError::MalformedTransaction(format!("bad base64: {}", e)))?;

        let in_amount = quote.in_amount.parse::<u64>().unwrap_or(amount);
        let out_amount = quote
            .out_amount
            .parse::<u64>()
            .map_err(|e| AppError::QuoteUnavailable(format!("bad outAmount: {}", e)))?;

        Ok(SwapQuote {
            unsigned_tx,
            in_amount,
            out_amount,
        })
    }
}
