//! Secrets handling: license key generation and hashing, keyed email hashes,
//! and envelope encryption for license keys that have to travel through the
//! job queue.
//!
//! Sealed format: MAGIC (4 bytes) || nonce (12 bytes) || ciphertext

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

const NONCE_SIZE: usize = 12;

const MASTER_KEY_SIZE: usize = 32;

const ENCRYPTED_MAGIC: &[u8] = b"LHK1";

/// Number of characters of a license key that may be shown or logged.
pub const KEY_PREFIX_LEN: usize = 8;

/// Holds the master key. Per-tenant data keys are derived from it with HKDF.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_SIZE],
}

impl MasterKey {
    /// The decoded key must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("Invalid master key encoding: {}", e)))?;

        if decoded.len() != MASTER_KEY_SIZE {
            return Err(AppError::Internal(format!(
                "Master key must be {} bytes, got {}",
                MASTER_KEY_SIZE,
                decoded.len()
            )));
        }

        let mut key = [0u8; MASTER_KEY_SIZE];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Random key, base64-encoded. Used by dev mode when MASTER_KEY is unset.
    pub fn generate() -> String {
        let mut key = [0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn from_bytes(key: [u8; MASTER_KEY_SIZE]) -> Self {
        Self { key }
    }

    fn cipher_for(&self, tenant_id: &str) -> Result<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(Some(b"licensehook-v1"), &self.key);
        let mut dek = [0u8; 32];
        hk.expand(tenant_id.as_bytes(), &mut dek)
            .map_err(|e| AppError::Internal(format!("Key derivation failed: {}", e)))?;
        Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| AppError::Internal(format!("Failed to create cipher: {}", e)))
    }

    /// Encrypt with the data key of `tenant_id`. Only the same tenant's key opens it.
    pub fn seal(&self, tenant_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher_for(tenant_id)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(ENCRYPTED_MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, tenant_id: &str, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < ENCRYPTED_MAGIC.len() + NONCE_SIZE + 1 {
            return Err(AppError::Internal("Encrypted data too short".into()));
        }
        if &sealed[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
            return Err(AppError::Internal(
                "Invalid encrypted data format (missing magic bytes)".into(),
            ));
        }

        let cipher = self.cipher_for(tenant_id)?;
        let nonce_end = ENCRYPTED_MAGIC.len() + NONCE_SIZE;
        let nonce = Nonce::from_slice(&sealed[ENCRYPTED_MAGIC.len()..nonce_end]);

        cipher
            .decrypt(nonce, &sealed[nonce_end..])
            .map_err(|e| AppError::Internal(format!("Decryption failed: {}", e)))
    }

    /// `seal` followed by base64, for embedding in JSON payloads.
    pub fn seal_to_string(&self, tenant_id: &str, plaintext: &str) -> Result<String> {
        Ok(BASE64.encode(self.seal(tenant_id, plaintext.as_bytes())?))
    }

    pub fn open_string(&self, tenant_id: &str, sealed: &str) -> Result<String> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|e| AppError::Internal(format!("Invalid sealed value: {}", e)))?;
        String::from_utf8(self.open(tenant_id, &raw)?)
            .map_err(|_| AppError::Internal("Sealed value is not UTF-8".into()))
    }
}

/// Keyed email hashing so stored hashes cannot be brute-forced from a
/// dictionary without the key.
#[derive(Clone)]
pub struct EmailHasher {
    hmac_key: [u8; 32],
}

impl EmailHasher {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { hmac_key: key }
    }

    /// Accepts hex (64 chars) or base64 encodings of a 32 byte key.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let bytes = hex::decode(encoded)
            .ok()
            .or_else(|| BASE64.decode(encoded).ok())
            .ok_or_else(|| AppError::Internal("Invalid email HMAC key encoding".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("Email HMAC key must be 32 bytes".into()))?;
        Ok(Self::from_bytes(key))
    }

    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// NFC-normalized, lowercased and trimmed before hashing.
    pub fn hash(&self, email: &str) -> String {
        use unicode_normalization::UnicodeNormalization;

        let normalized: String = email.nfc().collect();
        let normalized = normalized.to_lowercase();
        let normalized = normalized.trim();

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.hmac_key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any size"));
        mac.update(normalized.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Salted SHA-256 for lookup of license keys and operator keys. Lowercase hex.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"licensehook-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// New license key: `LH-` followed by five groups of five base32 characters (125 bits).
pub fn generate_license_key() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut bytes = [0u8; 25];
    OsRng.fill_bytes(&mut bytes);

    let groups: Vec<String> = bytes
        .chunks(5)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
                .collect()
        })
        .collect();
    format!("LH-{}", groups.join("-"))
}

/// Displayable prefix of a license key.
pub fn key_prefix(key: &str) -> String {
    key.chars().take(KEY_PREFIX_LEN).collect()
}
