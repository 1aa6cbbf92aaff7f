//! At-rest protection for small secrets (corpsecret, EncodingAESKey).
//!
//! Key = PBKDF2-HMAC-SHA256(password, fixed salt, 100k rounds).
//! Output = base64(IV(12) || ciphertext || tag) using AES-256-GCM with a fresh IV per call.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, AeadCore, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::Sha256;

use crate::error::{Error, Result};

const KDF_SALT: &[u8] = b"wechat-notifier-salt";
const KDF_ROUNDS: u32 = 100_000;
const IV_LEN: usize = 12;

/// Derives the AES key once and reuses it for every call.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::Crypto("encryption password is empty".to_string()));
        }
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut key);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Crypto(format!("invalid derived key: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(iv.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Fails closed: never returns partial plaintext.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String> {
        let trimmed = ciphertext_b64.trim();
        if trimmed.is_empty() {
            return Err(Error::Decryption("empty ciphertext".to_string()));
        }
        let raw = BASE64
            .decode(trimmed)
            .map_err(|e| Error::Decryption(format!("invalid base64: {}", e)))?;
        if raw.len() < IV_LEN {
            return Err(Error::Decryption(format!(
                "ciphertext too short: {} bytes",
                raw.len()
            )));
        }

        let (iv, body) = raw.split_at(IV_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(iv), body)
            .map_err(|_| Error::Decryption("authentication failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Decryption("plaintext is not valid UTF-8".to_string()))
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}
