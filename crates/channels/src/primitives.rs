use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::CallbackError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const AES_BLOCK: usize = 16;

/// Platform seam for the raw primitives the callback cipher needs.
///
/// CBC calls operate on whole blocks only; padding is the caller's job.
pub trait CryptoPrimitives: Send + Sync {
    fn aes256_cbc_encrypt(
        &self,
        key: &[u8; 32],
        iv: &[u8; 16],
        data: &[u8],
    ) -> Result<Vec<u8>, CallbackError>;

    fn aes256_cbc_decrypt(
        &self,
        key: &[u8; 32],
        iv: &[u8; 16],
        data: &[u8],
    ) -> Result<Vec<u8>, CallbackError>;

    fn fill_random(&self, buf: &mut [u8]);
}

/// Default adapter backed by the `aes`/`cbc` crates and the OS RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoPrimitives;

fn check_blocks(data: &[u8]) -> Result<(), CallbackError> {
    if data.is_empty() || data.len() % AES_BLOCK != 0 {
        return Err(CallbackError::Decrypt(format!(
            "data length {} is not a positive multiple of {}",
            data.len(),
            AES_BLOCK
        )));
    }
    Ok(())
}

impl CryptoPrimitives for RustCryptoPrimitives {
    fn aes256_cbc_encrypt(
        &self,
        key: &[u8; 32],
        iv: &[u8; 16],
        data: &[u8],
    ) -> Result<Vec<u8>, CallbackError> {
        check_blocks(data)?;
        let encryptor = Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|e| CallbackError::Decrypt(format!("Failed to create AES encryptor: {}", e)))?;
        let mut buf = data.to_vec();
        let len = buf.len();
        encryptor
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|e| CallbackError::Decrypt(format!("AES encrypt failed: {}", e)))?;
        Ok(buf)
    }

    fn aes256_cbc_decrypt(
        &self,
        key: &[u8; 32],
        iv: &[u8; 16],
        data: &[u8],
    ) -> Result<Vec<u8>, CallbackError> {
        check_blocks(data)?;
        let decryptor = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| CallbackError::Decrypt(format!("Failed to create AES decryptor: {}", e)))?;
        let mut buf = data.to_vec();
        decryptor
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| CallbackError::Decrypt(format!("AES decrypt failed: {}", e)))?;
        Ok(buf)
    }

    fn fill_random(&self, buf: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buf);
    }
}
