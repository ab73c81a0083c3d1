use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use solana_client::client_error::ClientError;
use solana_sdk::instruction::InstructionError;
use solana_sdk::pubkey::ParsePubkeyError;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

/// Closed sub-taxonomy shared by simulation failures and on-chain program
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapFailureReason {
    SlippageExceeded,
    CurveNotTradable,
    InsufficientFunds,
    Unknown,
}

impl std::fmt::Display for SwapFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwapFailureReason::SlippageExceeded => "slippage exceeded",
            SwapFailureReason::CurveNotTradable => "pool or curve no longer tradable",
            SwapFailureReason::InsufficientFunds => "insufficient funds",
            SwapFailureReason::Unknown => "unknown program error",
        };
        f.write_str(s)
    }
}

impl SwapFailureReason {
    /// Map a transaction error (from simulation or confirmation) into the
    /// closed taxonomy. Program-specific custom codes cover the pump-style
    /// curve programs; the log scan catches aggregator routes that surface
    /// slippage as text.
    pub fn classify(err: &TransactionError, logs: Option<&[String]>) -> Self {
        match err {
            TransactionError::InstructionError(_, InstructionError::Custom(code)) => {
                match code {
                    // TooMuchSolRequired / TooLittleSolReceived
                    6002 | 6003 => SwapFailureReason::SlippageExceeded,
                    // BondingCurveComplete / NotAuthorized to trade
                    6005 | 6023 => SwapFailureReason::CurveNotTradable,
                    1 => SwapFailureReason::InsufficientFunds,
                    _ => Self::classify_logs(logs),
                }
            }
            TransactionError::InsufficientFundsForFee
            | TransactionError::InsufficientFundsForRent { .. } => {
                SwapFailureReason::InsufficientFunds
            }
            _ => Self::classify_logs(logs),
        }
    }

    fn classify_logs(logs: Option<&[String]>) -> Self {
        let Some(logs) = logs else {
            return SwapFailureReason::Unknown;
        };
        for line in logs {
            let lower = line.to_lowercase();
            if lower.contains("slippage") {
                return SwapFailureReason::SlippageExceeded;
            }
            if lower.contains("curve is complete") || lower.contains("migrated") {
                return SwapFailureReason::CurveNotTradable;
            }
            if lower.contains("insufficient") {
                return SwapFailureReason::InsufficientFunds;
            }
        }
        SwapFailureReason::Unknown
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid key format")]
    InvalidKeyFormat,

    #[error("No wallet configured for user")]
    NoWallet,

    #[error("Insufficient balance: have {have} lamports, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("Swap amount below network minimum")]
    BelowMinimumAmount,

    #[error("Quote service unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Malformed transaction from quote service: {0}")]
    MalformedTransaction(String),

    #[error("Simulation failed: {0}")]
    SimulationFailed(SwapFailureReason),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("On-chain error ({reason}), signature {signature}")]
    OnChainError {
        reason: SwapFailureReason,
        signature: String,
    },

    #[error("Confirmation uncertain, signature {signature}")]
    ConfirmationUncertain { signature: String },

    #[error("No tokens received, signature {signature}")]
    NoTokensReceived { signature: String },

    #[error("Position not found")]
    PositionNotFound,

    #[error("Position was modified concurrently")]
    StaleUpdate,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Json parse error: {0}")]
    JsonParseError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Solana RPC error: {0}")]
    SolanaRpcError(#[from] ClientError),

    #[error("Pubkey parse error: {0}")]
    PubkeyParseError(#[from] ParsePubkeyError),
}

impl AppError {
    /// Broadcast id attached to the failure, when one exists. Always
    /// surfaced to callers so a human can reconcile on-chain manually.
    pub fn signature(&self) -> Option<&str> {
        match self {
            AppError::OnChainError { signature, .. }
            | AppError::ConfirmationUncertain { signature }
            | AppError::NoTokensReceived { signature } => Some(signature),
            _ => None,
        }
    }

    /// Transient failures are worth retrying by the immediate caller;
    /// format and crypto errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::QuoteUnavailable(_)
                | AppError::RequestError(_)
                | AppError::BroadcastFailed(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidKeyFormat
            | AppError::BelowMinimumAmount
            | AppError::BadRequest(_)
            | AppError::PubkeyParseError(_) => StatusCode::BAD_REQUEST,
            AppError::NoWallet | AppError::PositionNotFound => StatusCode::NOT_FOUND,
            AppError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StaleUpdate => StatusCode::CONFLICT,
            AppError::QuoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({ "success": false, "error": self.to_string() });
        if let Some(sig) = self.signature() {
            body["signature"] = json!(sig);
        }
        (status, axum::Json(body)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonParseError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::ServerError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_custom_slippage_code() {
        let err = TransactionError::InstructionError(2, InstructionError::Custom(6002));
        assert_eq!(
            SwapFailureReason::classify(&err, None),
            SwapFailureReason::SlippageExceeded
        );
    }

    #[test]
    fn classify_fee_shortfall() {
        assert_eq!(
            SwapFailureReason::classify(&TransactionError::InsufficientFundsForFee, None),
            SwapFailureReason::InsufficientFunds
        );
    }

    #[test]
    fn classify_falls_back_to_logs() {
        let err = TransactionError::InstructionError(0, InstructionError::Custom(999));
        let logs = vec!["Program log: Error: exceeded desired slippage limit".to_string()];
        assert_eq!(
            SwapFailureReason::classify(&err, Some(&logs)),
            SwapFailureReason::SlippageExceeded
        );
    }

    #[test]
    fn classify_unknown_without_hints() {
        let err = TransactionError::InstructionError(0, InstructionError::Custom(424242));
        assert_eq!(
            SwapFailureReason::classify(&err, Some(&[])),
            SwapFailureReason::Unknown
        );
    }

    #[test]
    fn signature_is_preserved_on_receipt_failure() {
        let err = AppError::NoTokensReceived {
            signature: "5KtP…".to_string(),
        };
        assert_eq!(err.signature(), Some("5KtP…"));
        assert!(!err.is_retryable());
    }
}
