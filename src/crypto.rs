//! Value encryption for sensitive settings
//!
//! Keys listed in the engine's encrypted-key configuration have their values
//! wrapped through a [`Crypto`] implementation exactly once per write and
//! unwrapped exactly once per read. A decrypt failure is a distinct,
//! user-facing error: it means the master key changed underneath stored
//! ciphertext and must never be masked by a default value.

use crate::error::{Error, Result};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use rand::Rng;

/// Encrypt/decrypt seam for setting values.
pub trait Crypto: Send + Sync {
    /// Wrap a plaintext value for storage
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Unwrap a stored ciphertext. The caller supplies the settings key so
    /// decrypt failures name the offending setting.
    fn decrypt(&self, key: &str, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM implementation with a random nonce per encryption.
///
/// Ciphertext envelope: `base64(nonce).base64(ciphertext)`.
pub struct AesGcmCrypto {
    cipher: Aes256Gcm,
}

impl AesGcmCrypto {
    /// Create from a raw 32-byte key
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is invalid.
    pub fn new(key: &[u8; 32]) -> Result<Self> {
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key)
                .map_err(|_| Error::Crypto("invalid key length".into()))?,
        })
    }

    /// Create from a password and salt, deriving the key with Argon2id
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn with_password(password: &str, salt: &[u8]) -> Result<Self> {
        let key = Self::derive_key(password, salt)?;
        Self::new(&key)
    }

    /// Generate a random 32-byte key
    #[must_use]
    pub fn generate_key() -> [u8; 32] {
        rand::rng().random()
    }

    /// Generate a random 16-byte salt for Argon2
    #[must_use]
    pub fn generate_salt() -> [u8; 16] {
        rand::rng().random()
    }

    /// Derive a 32-byte key from a password using Argon2id
    ///
    /// # Errors
    ///
    /// Returns an error if salt encoding or hashing fails.
    pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
        use argon2::{
            Argon2,
            password_hash::{PasswordHasher, SaltString},
        };

        let salt_string = SaltString::encode_b64(salt)
            .map_err(|e| Error::Crypto(format!("invalid salt bytes: {e}")))?;

        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt_string)
            .map_err(|e| Error::Crypto(format!("Argon2 hashing failed: {e}")))?;

        let output = password_hash
            .hash
            .ok_or_else(|| Error::Crypto("hash output missing".into()))?;
        let bytes = output.as_bytes();

        if bytes.len() < 32 {
            return Err(Error::Crypto(format!(
                "Argon2 output too short: {}",
                bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..32]);
        Ok(key)
    }
}

impl Crypto for AesGcmCrypto {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::rng().random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Encrypt(e.to_string()))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(format!(
            "{}.{}",
            b64.encode(nonce_bytes),
            b64.encode(&ciphertext)
        ))
    }

    fn decrypt(&self, key: &str, ciphertext: &str) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD;

        let (nonce_part, ct_part) = ciphertext
            .split_once('.')
            .ok_or_else(|| Error::Decrypt(key.to_string()))?;

        let nonce_bytes = b64
            .decode(nonce_part)
            .map_err(|_| Error::Decrypt(key.to_string()))?;
        let ct_bytes = b64
            .decode(ct_part)
            .map_err(|_| Error::Decrypt(key.to_string()))?;

        if nonce_bytes.len() != 12 {
            return Err(Error::Decrypt(key.to_string()));
        }

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ct_bytes.as_ref())
            .map_err(|_| Error::Decrypt(key.to_string()))?;

        String::from_utf8(plaintext).map_err(|_| Error::Decrypt(key.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
