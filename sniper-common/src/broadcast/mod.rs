//! Broadcast client: builds, signs, simulates and submits swaps, then
//! resolves their final on-chain outcome.
//!
//! Submission order is tip bundle first, direct RPC second, never both in
//! parallel. Nothing is broadcast when simulation fails, and a buy whose
//! tokens never arrive is reported as a failure even though a signature
//! exists — the caller must not record a position for it.

pub mod confirm;
pub mod tip;

use std::sync::Arc;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::constants::{
    DIRECT_SEND_MAX_RETRIES, FEE_HEADROOM_LAMPORTS, LAMPORTS_PER_SOL, MIN_SWAP_LAMPORTS,
    SETTLE_DELAY_SECS, SETTLE_RECHECK_DELAY_SECS, WSOL,
};
use crate::error::{AppError, SwapFailureReason};
use crate::models::{SwapResult, TradeSide};
use crate::quote::QuoteClient;
use crate::settings::StrategySettings;
use crate::vault::KeyVault;

pub struct BroadcastClient {
    rpc_client: Arc<RpcClient>,
    quote_client: Arc<QuoteClient>,
    vault: Arc<KeyVault>,
    http: reqwest::Client,
}

impl BroadcastClient {
    pub fn new(
        rpc_client: Arc<RpcClient>,
        quote_client: Arc<QuoteClient>,
        vault: Arc<KeyVault>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            rpc_client,
            quote_client,
            vault,
            http,
        }
    }

    /// Execute one swap leg end to end. `amount` is SOL for buys and a token
    /// quantity for sells. Every invocation produces a fresh broadcast; the
    /// caller is responsible for not double-submitting the same intent.
    pub async fn execute_swap(
        &self,
        user_id: &str,
        token_address: &str,
        side: TradeSide,
        amount: f64,
        settings: &StrategySettings,
    ) -> Result<SwapResult, AppError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AppError::BadRequest("swap amount must be positive".into()));
        }

        let wallet = self.vault.public_key(user_id).await?;
        let mint: Pubkey = token_address.parse()?;
        let tip_lamports = (settings.tip_amount_sol * LAMPORTS_PER_SOL as f64) as u64;

        // Buy-side sizing gate: dust swaps never register on-chain.
        let buy_lamports = (amount * LAMPORTS_PER_SOL as f64) as u64;
        if side == TradeSide::Buy && buy_lamports < MIN_SWAP_LAMPORTS {
            return Err(AppError::BelowMinimumAmount);
        }

        // Balance headroom check before any network construction work.
        let have = self.rpc_client.get_balance(&wallet).await?;
        let need = match side {
            TradeSide::Buy => buy_lamports + tip_lamports + FEE_HEADROOM_LAMPORTS,
            TradeSide::Sell => tip_lamports + FEE_HEADROOM_LAMPORTS,
        };
        if have < need {
            return Err(AppError::InsufficientBalance { have, need });
        }

        // Resolve the sell quantity against what the wallet actually holds.
        let (pre_token_ui, pre_token_raw, decimals) =
            self.token_balance(&wallet, &mint).await;
        let (input_mint, output_mint, quote_amount) = match side {
            TradeSide::Buy => (WSOL.to_string(), token_address.to_string(), buy_lamports),
            TradeSide::Sell => {
                let requested_raw = (amount * 10f64.powi(decimals as i32)) as u64;
                let raw = requested_raw.min(pre_token_raw);
                if raw == 0 {
                    return Err(AppError::BadRequest("no tokens to sell".into()));
                }
                (token_address.to_string(), WSOL.to_string(), raw)
            }
        };

        let slippage_bps = (settings.slippage_percent * 100.0) as u16;
        let quote = self
            .quote_client
            .get_swap_transaction(
                &wallet,
                &input_mint,
                &output_mint,
                quote_amount,
                slippage_bps,
                settings.priority_fee_lamports,
            )
            .await?;

        let signed = self.vault.sign(user_id, &quote.unsigned_tx).await?;
        let signature = signed.signatures[0];

        self.simulate(&signed).await?;

        self.submit(user_id, &wallet, &signed, tip_lamports).await?;

        confirm::await_confirmation(&self.rpc_client, &signature).await?;

        match side {
            TradeSide::Buy => {
                let received = self
                    .verify_receipt(&wallet, &mint, pre_token_ui, &signature)
                    .await?;
                let sol_spent = buy_lamports as f64 / LAMPORTS_PER_SOL as f64;
                Ok(SwapResult {
                    signature: signature.to_string(),
                    side,
                    sol_amount: sol_spent,
                    token_amount: received,
                    unit_price: sol_spent / received,
                })
            }
            TradeSide::Sell => {
                let tokens_sold = quote_amount as f64 / 10f64.powi(decimals as i32);
                let sol_received = quote.out_amount as f64 / LAMPORTS_PER_SOL as f64;
                Ok(SwapResult {
                    signature: signature.to_string(),
                    side,
                    sol_amount: sol_received,
                    token_amount: tokens_sold,
                    unit_price: if tokens_sold > 0.0 {
                        sol_received / tokens_sold
                    } else {
                        0.0
                    },
                })
            }
        }
    }

    /// Pre-broadcast simulation. A failure here aborts the whole swap;
    /// nothing has been sent yet.
    async fn simulate(&self, transaction: &VersionedTransaction) -> Result<(), AppError> {
        let result = self.rpc_client.simulate_transaction(transaction).await?;

        if let Some(err) = result.value.err {
            let reason = SwapFailureReason::classify(&err, result.value.logs.as_deref());
            warn!(?err, %reason, "simulation failed, aborting swap");
            return Err(AppError::SimulationFailed(reason));
        }
        Ok(())
    }

    /// Two submission paths, in order. The tip path is skipped entirely when
    /// the configured tip is zero; a tip-path error falls back to direct
    /// submission rather than failing the swap.
    async fn submit(
        &self,
        user_id: &str,
        wallet: &Pubkey,
        signed: &VersionedTransaction,
        tip_lamports: u64,
    ) -> Result<(), AppError> {
        if tip_lamports > 0 {
            match self.submit_with_tip(user_id, wallet, signed, tip_lamports).await {
                Ok(bundle_id) => {
                    info!(%bundle_id, "swap submitted via tip path");
                    return Ok(());
                }
                Err(e) => {
                    warn!("tip path failed, falling back to direct submission: {}", e);
                }
            }
        }

        self.submit_direct(signed).await
    }

    async fn submit_with_tip(
        &self,
        user_id: &str,
        wallet: &Pubkey,
        signed: &VersionedTransaction,
        tip_lamports: u64,
    ) -> Result<String, AppError> {
        // The tip shares the swap's blockhash so both legs expire together.
        let blockhash = *signed.message.recent_blockhash();
        let unsigned_tip = tip::build_tip_transaction(wallet, tip_lamports, blockhash)?;
        let tip_tx = self.vault.sign(user_id, &unsigned_tip).await?;

        tip::submit_bundle(&self.http, signed, &tip_tx).await
    }

    async fn submit_direct(&self, signed: &VersionedTransaction) -> Result<(), AppError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: None,
            encoding: None,
            max_retries: Some(DIRECT_SEND_MAX_RETRIES),
            min_context_slot: None,
        };

        self.rpc_client
            .send_transaction_with_config(signed, config)
            .await
            .map(|_| ())
            .map_err(|e| AppError::BroadcastFailed(e.to_string()))
    }

    /// Post-trade verification for buys. A confirmed signature with no token
    /// delta means the swap was economically voided; the caller must not
    /// record a position for it.
    async fn verify_receipt(
        &self,
        wallet: &Pubkey,
        mint: &Pubkey,
        pre_balance_ui: f64,
        signature: &Signature,
    ) -> Result<f64, AppError> {
        sleep(Duration::from_secs(SETTLE_DELAY_SECS)).await;
        let (post_ui, _, _) = self.token_balance(wallet, mint).await;
        let received = post_ui - pre_balance_ui;
        if received > 0.0 {
            return Ok(received);
        }

        sleep(Duration::from_secs(SETTLE_RECHECK_DELAY_SECS)).await;
        let (post_ui, _, _) = self.token_balance(wallet, mint).await;
        let received = post_ui - pre_balance_ui;
        if received > 0.0 {
            return Ok(received);
        }

        Err(AppError::NoTokensReceived {
            signature: signature.to_string(),
        })
    }

    /// Custodial token balance. A missing associated token account reads as
    /// zero, not as an error.
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> (f64, u64, u8) {
        let ata = get_associated_token_address(owner, mint);
        match self.rpc_client.get_token_account_balance(&ata).await {
            Ok(balance) => {
                let raw = balance.amount.parse::<u64>().unwrap_or(0);
                (balance.ui_amount.unwrap_or(0.0), raw, balance.decimals)
            }
            Err(_) => (0.0, 0, 6),
        }
    }
}
