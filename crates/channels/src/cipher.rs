//! AES-256-CBC envelope used by 企业微信 callbacks.
//!
//! Protocol:
//! - AES key = Base64Decode(EncodingAESKey + "=")  → 32 bytes
//! - IV = first 16 bytes of the AES key
//! - PKCS#7 padding with a 32-byte block
//! - Plaintext layout: 16B random | 4B msg_len (big-endian) | msg | receiver id (corpId)

use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use std::sync::Arc;

use crate::error::CallbackError;
use crate::primitives::{CryptoPrimitives, RustCryptoPrimitives};
use crate::signature::verify_signature;

pub const ENCODING_AES_KEY_LEN: usize = 43;
const PAD_BLOCK: usize = 32;
const RANDOM_PREFIX_LEN: usize = 16;
const HEADER_LEN: usize = RANDOM_PREFIX_LEN + 4;

// Console-issued keys may carry non-zero trailing bits in the last character,
// which the strict STANDARD engine rejects.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a 43-char EncodingAESKey into the raw 32-byte AES key.
pub fn decode_encoding_aes_key(encoding_aes_key: &str) -> Result<[u8; 32], CallbackError> {
    let trimmed = encoding_aes_key.trim();
    let len = trimmed.chars().count();
    if len != ENCODING_AES_KEY_LEN {
        return Err(CallbackError::Configuration(format!(
            "EncodingAESKey must be {} characters, got {}",
            ENCODING_AES_KEY_LEN, len
        )));
    }

    let bytes = LENIENT
        .decode(format!("{}=", trimmed))
        .map_err(|e| CallbackError::Configuration(format!("EncodingAESKey is not base64: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CallbackError::Configuration(format!(
            "EncodingAESKey decodes to {} bytes, expected 32",
            b.len()
        ))
    })
}

/// Per-configuration callback cipher. Holds the raw AES key; never log it.
#[derive(Clone)]
pub struct CallbackCipher {
    key: [u8; 32],
    primitives: Arc<dyn CryptoPrimitives>,
}

impl std::fmt::Debug for CallbackCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CallbackCipher(..)")
    }
}

impl CallbackCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key,
            primitives: Arc::new(RustCryptoPrimitives),
        }
    }

    pub fn from_encoding_aes_key(encoding_aes_key: &str) -> Result<Self, CallbackError> {
        Ok(Self::new(decode_encoding_aes_key(encoding_aes_key)?))
    }

    /// Swap the primitive adapter (hash/CBC/RNG provider).
    pub fn with_primitives(mut self, primitives: Arc<dyn CryptoPrimitives>) -> Self {
        self.primitives = primitives;
        self
    }

    fn iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&self.key[..16]);
        iv
    }

    /// Decrypt a base64 payload and check it was sealed for `expected_receiver_id`.
    ///
    /// AES-CBC carries no authentication: a modified ciphertext can decrypt to
    /// modified plaintext without error. Inbound payloads go through
    /// [`Self::open_message`], which checks `msg_signature` first.
    pub(crate) fn decrypt_message(
        &self,
        payload_b64: &str,
        expected_receiver_id: &str,
    ) -> Result<String, CallbackError> {
        let ciphertext = general_purpose::STANDARD
            .decode(payload_b64.trim())
            .map_err(|e| CallbackError::Decrypt(format!("payload is not base64: {}", e)))?;
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CallbackError::Decrypt(format!(
                "ciphertext length {} is not a multiple of 16",
                ciphertext.len()
            )));
        }

        let decrypted = self
            .primitives
            .aes256_cbc_decrypt(&self.key, &self.iv(), &ciphertext)?;
        let plaintext = pkcs7_unpad(&decrypted)?;

        if plaintext.len() < HEADER_LEN {
            return Err(CallbackError::Decrypt(format!(
                "decrypted data too short: {} bytes",
                plaintext.len()
            )));
        }
        let msg_len = u32::from_be_bytes([
            plaintext[RANDOM_PREFIX_LEN],
            plaintext[RANDOM_PREFIX_LEN + 1],
            plaintext[RANDOM_PREFIX_LEN + 2],
            plaintext[RANDOM_PREFIX_LEN + 3],
        ]) as usize;

        let msg_end = HEADER_LEN
            .checked_add(msg_len)
            .filter(|end| *end <= plaintext.len())
            .ok_or_else(|| {
                CallbackError::Decrypt(format!(
                    "msg_len {} exceeds plaintext length {}",
                    msg_len,
                    plaintext.len()
                ))
            })?;

        let msg = std::str::from_utf8(&plaintext[HEADER_LEN..msg_end])
            .map_err(|e| CallbackError::Decrypt(format!("message is not UTF-8: {}", e)))?;
        let receiver = std::str::from_utf8(&plaintext[msg_end..])
            .map_err(|e| CallbackError::Decrypt(format!("receiver id is not UTF-8: {}", e)))?;

        if receiver != expected_receiver_id {
            return Err(CallbackError::ReceiverMismatch {
                expected: expected_receiver_id.to_string(),
                actual: receiver.to_string(),
            });
        }
        Ok(msg.to_string())
    }

    /// Seal `plaintext` for `receiver_id`; [`Self::open_message`] reverses it.
    pub fn encrypt_message(&self, plaintext: &str, receiver_id: &str) -> Result<String, CallbackError> {
        let msg = plaintext.as_bytes();
        let msg_len = u32::try_from(msg.len())
            .map_err(|_| CallbackError::Decrypt("message too large".to_string()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + msg.len() + receiver_id.len() + PAD_BLOCK);
        let mut random = [0u8; RANDOM_PREFIX_LEN];
        self.primitives.fill_random(&mut random);
        buf.extend_from_slice(&random);
        buf.extend_from_slice(&msg_len.to_be_bytes());
        buf.extend_from_slice(msg);
        buf.extend_from_slice(receiver_id.as_bytes());
        pkcs7_pad(&mut buf);

        let ciphertext = self
            .primitives
            .aes256_cbc_encrypt(&self.key, &self.iv(), &buf)?;
        Ok(general_purpose::STANDARD.encode(ciphertext))
    }

    /// Signature gate that runs before any decrypt.
    pub fn verify_message_signature(
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
        token: &str,
    ) -> Result<(), CallbackError> {
        if verify_signature(msg_signature, token, timestamp, nonce, encrypted) {
            Ok(())
        } else {
            Err(CallbackError::Signature)
        }
    }

    /// Signature check followed by decrypt; the path every inbound message takes.
    pub fn open_message(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
        token: &str,
        receiver_id: &str,
    ) -> Result<String, CallbackError> {
        Self::verify_message_signature(msg_signature, timestamp, nonce, encrypted, token)?;
        self.decrypt_message(encrypted, receiver_id)
    }

    /// URL verification handshake: returns the plaintext echo to send back verbatim.
    pub fn verify_url(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
        token: &str,
        corp_id: &str,
    ) -> Result<String, CallbackError> {
        self.open_message(msg_signature, timestamp, nonce, echostr, token, corp_id)
    }
}

fn pkcs7_pad(buf: &mut Vec<u8>) {
    let pad = PAD_BLOCK - (buf.len() % PAD_BLOCK);
    buf.extend(std::iter::repeat(pad as u8).take(pad));
}

fn pkcs7_unpad(data: &[u8]) -> Result<&[u8], CallbackError> {
    let pad = *data
        .last()
        .ok_or_else(|| CallbackError::Decrypt("empty plaintext".to_string()))? as usize;
    if pad == 0 || pad > PAD_BLOCK || pad > data.len() {
        return Err(CallbackError::Decrypt(format!("invalid PKCS7 pad value {}", pad)));
    }
    let (body, padding) = data.split_at(data.len() - pad);
    if padding.iter().any(|b| *b as usize != pad) {
        return Err(CallbackError::Decrypt("inconsistent PKCS7 padding".to_string()));
    }
    Ok(body)
}
