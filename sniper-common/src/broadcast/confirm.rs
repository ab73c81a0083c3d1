//! Confirmation of submitted swaps.
//!
//! A blocking status poll is raced against a fixed timeout. A timeout is
//! not a failure by itself: the transaction may still land, so one more
//! status poll happens after a grace delay before the outcome is declared
//! uncertain.

use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::constants::{CONFIRM_POLL_INTERVAL_MS, CONFIRM_TIMEOUT_SECS, LATE_POLL_DELAY_SECS};
use crate::error::{AppError, SwapFailureReason};

pub async fn await_confirmation(
    rpc_client: &RpcClient,
    signature: &Signature,
) -> Result<(), AppError> {
    let budget = Duration::from_secs(CONFIRM_TIMEOUT_SECS);

    match timeout(budget, poll_until_resolved(rpc_client, signature)).await {
        Ok(result) => result,
        Err(_elapsed) => {
            // The network may simply be behind; give it one more look.
            warn!(%signature, "confirmation timed out, scheduling late status poll");
            sleep(Duration::from_secs(LATE_POLL_DELAY_SECS)).await;

            match status_once(rpc_client, signature).await {
                Some(Ok(())) => {
                    info!(%signature, "transaction landed after timeout");
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Err(AppError::ConfirmationUncertain {
                    signature: signature.to_string(),
                }),
            }
        }
    }
}

async fn poll_until_resolved(
    rpc_client: &RpcClient,
    signature: &Signature,
) -> Result<(), AppError> {
    loop {
        if let Some(outcome) = status_once(rpc_client, signature).await {
            return outcome;
        }
        sleep(Duration::from_millis(CONFIRM_POLL_INTERVAL_MS)).await;
    }
}

/// One status read. `None` means still pending (or the RPC node hiccuped,
/// which is indistinguishable and handled the same way).
async fn status_once(
    rpc_client: &RpcClient,
    signature: &Signature,
) -> Option<Result<(), AppError>> {
    match rpc_client
        .get_signature_status_with_commitment(signature, CommitmentConfig::confirmed())
        .await
    {
        Ok(Some(Ok(()))) => Some(Ok(())),
        Ok(Some(Err(tx_err))) => {
            let reason = SwapFailureReason::classify(&tx_err, None);
            Some(Err(AppError::OnChainError {
                reason,
                signature: signature.to_string(),
            }))
        }
        Ok(None) => None,
        Err(e) => {
            warn!(%signature, "status poll error: {}", e);
            None
        }
    }
}
