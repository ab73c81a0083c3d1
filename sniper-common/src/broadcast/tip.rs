//! Tip-bundle submission path.
//!
//! The swap transaction is paired with a tip transfer and submitted as one
//! atomic unit to a block engine, which buys a better ordering guarantee
//! than the public mempool. Tip accounts and gateways are fixed pools with
//! a random pick per attempt to spread load.

use base58::ToBase58;
use rand::Rng;
use serde_json::json;
use solana_sdk::hash::Hash;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use tracing::info;

use crate::constants::{BLOCK_ENGINE_ENDPOINTS, TIP_ACCOUNTS};
use crate::error::AppError;

pub fn random_tip_account() -> Pubkey {
    let index = rand::thread_rng().gen_range(0..TIP_ACCOUNTS.len());
    TIP_ACCOUNTS[index]
}

pub fn random_endpoint() -> &'static str {
    let index = rand::thread_rng().gen_range(0..BLOCK_ENGINE_ENDPOINTS.len());
    BLOCK_ENGINE_ENDPOINTS[index]
}

/// Unsigned tip transfer, serialized for the vault to sign. Keeping the
/// signing path identical to the swap leg means the secret key never leaves
/// the vault for either transaction.
pub fn build_tip_transaction(
    payer: &Pubkey,
    tip_lamports: u64,
    recent_blockhash: Hash,
) -> Result<Vec<u8>, AppError> {
    let tip_account = random_tip_account();
    let transfer = system_instruction::transfer(payer, &tip_account, tip_lamports);
    let message = Message::new_with_blockhash(&[transfer], Some(payer), &recent_blockhash);
    let unsigned = VersionedTransaction::from(Transaction::new_unsigned(message));

    bincode::serialize(&unsigned)
        .map_err(|e| AppError::ServerError(format!("tip transaction encode failed: {}", e)))
}

/// Submit `[swap, tip]` as a single bundle. Returns the bundle id assigned
/// by the block engine.
pub async fn submit_bundle(
    http: &reqwest::Client,
    swap_tx: &VersionedTransaction,
    tip_tx: &VersionedTransaction,
) -> Result<String, AppError> {
    let encoded: Vec<String> = [swap_tx, tip_tx]
        .iter()
        .map(|tx| {
            bincode::serialize(tx)
                .map(|bytes| bytes.to_base58())
                .map_err(|e| AppError::BroadcastFailed(format!("bundle encode failed: {}", e)))
        })
        .collect::<Result<_, _>>()?;

    let endpoint = random_endpoint();
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "sendBundle",
        "params": [encoded],
    });

    let response = http
        .post(format!("{}/api/v1/bundles", endpoint))
        .json(&body)
        .send()
        .await
        .map_err(|e| AppError::BroadcastFailed(format!("bundle submit to {}: {}", endpoint, e)))?;

    if !response.status().is_success() {
        return Err(AppError::BroadcastFailed(format!(
            "block engine {} returned status {}",
            endpoint,
            response.status()
        )));
    }

    let parsed: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AppError::BroadcastFailed(format!("bundle response unreadable: {}", e)))?;

    if let Some(err) = parsed.get("error") {
        return Err(AppError::BroadcastFailed(format!(
            "block engine rejected bundle: {}",
            err
        )));
    }

    let bundle_id = parsed
        .get("result")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BroadcastFailed("bundle response missing result".into()))?
        .to_string();

    info!(%bundle_id, endpoint, "bundle submitted");
    Ok(bundle_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_account_comes_from_the_fixed_pool() {
        for _ in 0..64 {
            let account = random_tip_account();
            assert!(TIP_ACCOUNTS.contains(&account));
        }
    }

    #[test]
    fn endpoint_comes_from_the_fixed_pool() {
        for _ in 0..64 {
            let endpoint = random_endpoint();
            assert!(BLOCK_ENGINE_ENDPOINTS.contains(&endpoint));
        }
    }

    #[test]
    fn tip_transaction_round_trips_through_bincode() {
        let payer = Pubkey::new_unique();
        let bytes = build_tip_transaction(&payer, 100_000, Hash::default()).unwrap();
        let decoded: VersionedTransaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.message.static_account_keys()[0], payer);
    }
}
