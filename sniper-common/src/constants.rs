use solana_sdk::pubkey::Pubkey;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub const WSOL: Pubkey = solana_sdk::pubkey!("So11111111111111111111111111111111111111112");

/// Swaps below this size do not reliably register on-chain.
pub const MIN_SWAP_LAMPORTS: u64 = 1_000_000; // 0.001 SOL

/// Headroom kept on top of amount + tip for transaction fees and rent.
pub const FEE_HEADROOM_LAMPORTS: u64 = 5_000_000; // 0.005 SOL

/// Tip accounts accepted by the block engines. One is chosen at random per
/// bundle so tip flow is spread across them.
pub const TIP_ACCOUNTS: &[Pubkey] = &[
    solana_sdk::pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"),
    solana_sdk::pubkey!("HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe"),
    solana_sdk::pubkey!("Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY"),
    solana_sdk::pubkey!("ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49"),
    solana_sdk::pubkey!("DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh"),
    solana_sdk::pubkey!("ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt"),
    solana_sdk::pubkey!("DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL"),
    solana_sdk::pubkey!("3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT"),
];

/// Equivalent block-engine gateways; any one may be chosen per attempt.
pub const BLOCK_ENGINE_ENDPOINTS: &[&str] = &[
    "https://mainnet.block-engine.jito.wtf",
    "https://ny.mainnet.block-engine.jito.wtf",
    "https://amsterdam.mainnet.block-engine.jito.wtf",
    "https://tokyo.mainnet.block-engine.jito.wtf",
    "https://frankfurt.mainnet.block-engine.jito.wtf",
];

/// Confirmation budget for a submitted swap.
pub const CONFIRM_TIMEOUT_SECS: u64 = 30;
pub const CONFIRM_POLL_INTERVAL_MS: u64 = 1_000;
/// Grace delay before the one-shot status poll after a confirmation timeout.
pub const LATE_POLL_DELAY_SECS: u64 = 5;

pub const DIRECT_SEND_MAX_RETRIES: usize = 3;
pub const QUOTE_MAX_RETRIES: u32 = 3;

/// Buy-side receipt verification: first read after the settle delay, one
/// retry after the recheck delay.
pub const SETTLE_DELAY_SECS: u64 = 2;
pub const SETTLE_RECHECK_DELAY_SECS: u64 = 5;

/// Expected decoded length of imported key material (ed25519 keypair bytes).
pub const SECRET_KEY_LEN: usize = 64;

/// Redis channel carrying buy signals from the external detectors.
pub const SIGNALS_CHANNEL: &str = "sniper:signals";
