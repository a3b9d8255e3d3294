//! Attribute cipher for `shiblink`.
//!
//! AES-256-CBC with PKCS#7 padding under a single key supplied at startup.
//! Every operation is explicit about its IV: the caller owns the IV and
//! stores it beside the ciphertext it produced.
//!
//! # Security model
//!
//! - The key comes from configuration as base64 and lives only in memory.
//! - IVs are 16 random bytes from the OS CSPRNG, base64 encoded for storage.
//! - CBC carries no authentication tag. A foreign key is detected only
//!   through invalid padding or non-UTF-8 output, which catches it with
//!   overwhelming but not absolute probability.

use std::fmt;

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block and IV length in bytes.
pub const IV_LEN: usize = 16;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// A 256-bit cipher key that is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a base64 key as supplied by configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the input is not base64 or does
    /// not decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey {
                reason: format!("not valid base64: {e}"),
            })?;

        let result = <[u8; KEY_LEN]>::try_from(decoded.as_slice())
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey {
                reason: format!("expected {KEY_LEN} bytes, got {}", decoded.len()),
            });
        decoded.zeroize();
        result
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Symmetric cipher for attribute values.
#[derive(Debug, Clone)]
pub struct Cipher {
    key: CipherKey,
}

impl Cipher {
    /// Create a cipher under the given key.
    #[must_use]
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    /// Create a cipher from a base64-encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the key cannot be decoded.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        CipherKey::from_base64(encoded).map(Self::new)
    }

    /// Generate a fresh random IV, base64 encoded for storage.
    #[must_use]
    pub fn new_iv() -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        STANDARD.encode(iv)
    }

    /// Encrypt `plaintext` under `iv_base64` and return base64 ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidIv`] if the IV is not a base64 16-byte value.
    pub fn encrypt(&self, iv_base64: &str, plaintext: &str) -> Result<String, CryptoError> {
        let iv = decode_iv(iv_base64).map_err(|reason| CryptoError::InvalidIv { reason })?;
        let encryptor = Aes256CbcEnc::new_from_slices(&self.key.0, &iv).map_err(|e| {
            CryptoError::InvalidKey {
                reason: e.to_string(),
            }
        })?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(STANDARD.encode(ciphertext))
    }

    /// Decrypt base64 ciphertext produced by [`encrypt`](Cipher::encrypt)
    /// with the same IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decryption`] if the IV or ciphertext is
    /// malformed, the padding is invalid, or the plaintext is not UTF-8.
    pub fn decrypt(&self, iv_base64: &str, cipher_text_base64: &str) -> Result<String, CryptoError> {
        let iv = decode_iv(iv_base64).map_err(|reason| CryptoError::Decryption { reason })?;
        let ciphertext = STANDARD
            .decode(cipher_text_base64)
            .map_err(|e| CryptoError::Decryption {
                reason: format!("ciphertext is not valid base64: {e}"),
            })?;

        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(CryptoError::Decryption {
                reason: format!(
                    "ciphertext length {} is not a positive multiple of {IV_LEN}",
                    ciphertext.len()
                ),
            });
        }

        let decryptor = Aes256CbcDec::new_from_slices(&self.key.0, &iv).map_err(|e| {
            CryptoError::Decryption {
                reason: e.to_string(),
            }
        })?;
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::Decryption {
                reason: "invalid padding".to_owned(),
            })?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption {
            reason: "plaintext is not valid UTF-8".to_owned(),
        })
    }
}

fn decode_iv(iv_base64: &str) -> Result<[u8; IV_LEN], String> {
    let bytes = STANDARD
        .decode(iv_base64)
        .map_err(|e| format!("IV is not valid base64: {e}"))?;
    <[u8; IV_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected {IV_LEN}-byte IV, got {} bytes", bytes.len()))
}
