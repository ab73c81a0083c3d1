//! Custodial key vault.
//!
//! One keypair per user, stored authenticated-encrypted. The master key is
//! derived once at process start from the operator secret and never leaves
//! memory; losing that secret makes every custodial wallet unrecoverable,
//! which is the accepted trust boundary of this design.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base58::{FromBase58, ToBase58};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use zeroize::Zeroizing;

use crate::constants::SECRET_KEY_LEN;
use crate::database::SupabaseClient;
use crate::error::AppError;
use crate::models::KeypairRecord;

const NONCE_LEN: usize = 12;

/// Derive the process-wide master key with Argon2id. Deliberately slow;
/// called exactly once at startup.
pub fn derive_master_key(operator_secret: &str, salt: &str) -> Result<[u8; 32], AppError> {
    if operator_secret.len() < 16 {
        return Err(AppError::ConfigError(
            "vault operator secret must be at least 16 characters".into(),
        ));
    }
    if salt.len() < 8 {
        return Err(AppError::ConfigError(
            "vault KDF salt must be at least 8 characters".into(),
        ));
    }

    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(operator_secret.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| AppError::ConfigError(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Decode raw key material from any of the accepted encodings: 64 raw
/// bytes, a 128-character hex string, or a base58 string. Anything whose
/// decoded length is not exactly 64 bytes is rejected.
pub fn decode_key_material(raw: &[u8]) -> Result<Zeroizing<Vec<u8>>, AppError> {
    if raw.len() == SECRET_KEY_LEN {
        return Ok(Zeroizing::new(raw.to_vec()));
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| AppError::InvalidKeyFormat)?
        .trim();

    let decoded = if text.len() == SECRET_KEY_LEN * 2
        && text.chars().all(|c| c.is_ascii_hexdigit())
    {
        hex::decode(text).map_err(|_| AppError::InvalidKeyFormat)?
    } else {
        text.from_base58().map_err(|_| AppError::InvalidKeyFormat)?
    };

    if decoded.len() != SECRET_KEY_LEN {
        return Err(AppError::InvalidKeyFormat);
    }
    Ok(Zeroizing::new(decoded))
}

/// AEAD layer over keypair bytes. Pure; persistence lives in `KeyVault`.
pub struct VaultCipher {
    cipher: Aes256Gcm,
}

impl VaultCipher {
    pub fn new(master_key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master_key));
        Self { cipher }
    }

    /// Encrypt keypair bytes under a fresh random nonce. Output is
    /// base64(nonce || ciphertext), the only at-rest representation.
    pub fn encrypt(&self, secret: &[u8]) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, secret)
            .map_err(|_| AppError::ServerError("wallet encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<Zeroizing<Vec<u8>>, AppError> {
        let raw = BASE64
            .decode(encrypted)
            .map_err(|_| AppError::ServerError("corrupt wallet record".into()))?;
        if raw.len() <= NONCE_LEN {
            return Err(AppError::ServerError("corrupt wallet record".into()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AppError::ServerError("wallet decryption failed".into()))?;

        if plaintext.len() != SECRET_KEY_LEN {
            return Err(AppError::ServerError("corrupt wallet record".into()));
        }
        Ok(Zeroizing::new(plaintext))
    }
}

pub struct KeyVault {
    cipher: VaultCipher,
    db: Arc<SupabaseClient>,
}

impl KeyVault {
    pub fn new(master_key: [u8; 32], db: Arc<SupabaseClient>) -> Self {
        Self {
            cipher: VaultCipher::new(master_key),
            db,
        }
    }

    /// Generate a fresh custodial keypair for the user, overwriting any
    /// existing record.
    pub async fn generate(&self, user_id: &str) -> Result<Pubkey, AppError> {
        let keypair = Keypair::new();
        let secret = Zeroizing::new(keypair.to_bytes().to_vec());
        let encrypted = self.cipher.encrypt(&secret)?;
        let pubkey = keypair.pubkey();

        self.db
            .upsert_wallet(user_id, &pubkey.to_string(), &encrypted)
            .await?;
        Ok(pubkey)
    }

    /// Import external key material. Replacing an existing wallet is
    /// destructive and irreversible; a decode failure leaves any existing
    /// record untouched.
    pub async fn import(&self, user_id: &str, raw: &[u8]) -> Result<Pubkey, AppError> {
        let secret = decode_key_material(raw)?;
        let keypair = Keypair::from_bytes(&secret).map_err(|_| AppError::InvalidKeyFormat)?;

        let encrypted = self.cipher.encrypt(&secret)?;
        let pubkey = keypair.pubkey();
        self.db
            .upsert_wallet(user_id, &pubkey.to_string(), &encrypted)
            .await?;
        Ok(pubkey)
    }

    /// Export the raw key material as a base58 string.
    pub async fn export(&self, user_id: &str) -> Result<String, AppError> {
        let record = self.fetch_record(user_id).await?;
        let secret = self.cipher.decrypt(&record.encrypted_secret)?;
        Ok(secret.to_base58())
    }

    pub async fn public_key(&self, user_id: &str) -> Result<Pubkey, AppError> {
        let record = self.fetch_record(user_id).await?;
        record
            .public_key
            .parse()
            .map_err(|_| AppError::ServerError("corrupt wallet record".into()))
    }

    /// Deserialize unsigned transaction bytes and sign them with the user's
    /// custodial key. The secret exists only inside this call.
    pub async fn sign(
        &self,
        user_id: &str,
        unsigned_tx: &[u8],
    ) -> Result<VersionedTransaction, AppError> {
        let record = self.fetch_record(user_id).await?;
        let secret = self.cipher.decrypt(&record.encrypted_secret)?;
        let keypair = Keypair::from_bytes(&secret)
            .map_err(|_| AppError::ServerError("corrupt wallet record".into()))?;

        let unsigned: VersionedTransaction = bincode::deserialize(unsigned_tx)
            .map_err(|e| AppError::MalformedTransaction(e.to_string()))?;

        VersionedTransaction::try_new(unsigned.message, &[&keypair])
            .map_err(|e| AppError::MalformedTransaction(format!("signing failed: {}", e)))
    }

    async fn fetch_record(&self, user_id: &str) -> Result<KeypairRecord, AppError> {
        self.db
            .get_wallet(user_id)
            .await?
            .ok_or(AppError::NoWallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> VaultCipher {
        VaultCipher::new([7u8; 32])
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = cipher();
        let keypair = Keypair::new();
        let secret = keypair.to_bytes();

        let encrypted = cipher.encrypt(&secret).unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(&secret[..], &decrypted[..]);
    }

    #[test]
    fn nonces_are_fresh_per_record() {
        let cipher = cipher();
        let secret = Keypair::new().to_bytes();
        let a = cipher.encrypt(&secret).unwrap();
        let b = cipher.encrypt(&secret).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_master_key_fails_closed() {
        let secret = Keypair::new().to_bytes();
        let encrypted = cipher().encrypt(&secret).unwrap();

        let other = VaultCipher::new([8u8; 32]);
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let secret = Keypair::new().to_bytes();
        let encrypted = cipher().encrypt(&secret).unwrap();

        let mut raw = BASE64.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert!(cipher().decrypt(&tampered).is_err());
    }

    #[test]
    fn decode_accepts_all_three_encodings() {
        let keypair = Keypair::new();
        let secret = keypair.to_bytes();

        let from_binary = decode_key_material(&secret).unwrap();
        assert_eq!(&from_binary[..], &secret[..]);

        let hex_string = hex::encode(secret);
        let from_hex = decode_key_material(hex_string.as_bytes()).unwrap();
        assert_eq!(&from_hex[..], &secret[..]);

        let b58_string = secret.to_base58();
        let from_b58 = decode_key_material(b58_string.as_bytes()).unwrap();
        assert_eq!(&from_b58[..], &secret[..]);
    }

    #[test]
    fn decode_rejects_wrong_lengths() {
        assert!(matches!(
            decode_key_material(&[1u8; 32]),
            Err(AppError::InvalidKeyFormat)
        ));
        assert!(matches!(
            decode_key_material(hex::encode([1u8; 32]).as_bytes()),
            Err(AppError::InvalidKeyFormat)
        ));
        assert!(matches!(
            decode_key_material([1u8; 16].to_base58().as_bytes()),
            Err(AppError::InvalidKeyFormat)
        ));
        assert!(matches!(
            decode_key_material(b"not key material at all \xff\x00"),
            Err(AppError::InvalidKeyFormat)
        ));
    }

    #[test]
    fn export_format_round_trips_through_import_decoding() {
        // export() hands back base58 of the 64 keypair bytes; feeding that
        // string to the import decoder recovers the secret exactly.
        let keypair = Keypair::new();
        let secret = keypair.to_bytes();
        let exported = secret.to_base58();

        let reimported = decode_key_material(exported.as_bytes()).unwrap();
        assert_eq!(&reimported[..], &secret[..]);
        assert_eq!(
            Keypair::from_bytes(&reimported).unwrap().pubkey(),
            keypair.pubkey()
        );
    }

    #[test]
    fn master_key_derivation_is_deterministic() {
        let a = derive_master_key("correct horse battery staple", "sniper-salt").unwrap();
        let b = derive_master_key("correct horse battery staple", "sniper-salt").unwrap();
        let c = derive_master_key("correct horse battery stable", "sniper-salt").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn short_operator_secret_is_refused() {
        assert!(derive_master_key("short", "sniper-salt").is_err());
        assert!(derive_master_key("correct horse battery staple", "s").is_err());
    }
}
