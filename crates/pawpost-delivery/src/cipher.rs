//! Authenticated encryption of subscriber secrets at rest.
//!
//! Secrets are sealed with AES-256-GCM under a process-wide key. Each
//! encryption draws a fresh 96-bit nonce from the OS CSPRNG and prepends it
//! to the output, so a stored value is self-contained:
//!
//! ```text
//! base64url( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! Decryption failures are ordinary, per-subscriber errors. The dispatcher
//! skips the affected subscriber and carries on with the rest.

use std::{fmt, sync::Arc};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine};
use thiserror::Error;
use zeroize::Zeroizing;

/// Required key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-GCM.
const TAG_SIZE: usize = 16;

/// Errors raised while sealing or opening a secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Configured key is not exactly 32 bytes.
    #[error("invalid encryption key: expected {KEY_SIZE} bytes, got {length}")]
    InvalidKey {
        /// Length of the rejected key
        length: usize,
    },

    /// Stored value is not valid base64.
    #[error("ciphertext is not valid base64: {message}")]
    Encoding {
        /// Decoder error message
        message: String,
    },

    /// Stored value is too short to contain a nonce and tag.
    #[error("ciphertext too short: {length} bytes")]
    Truncated {
        /// Decoded length of the stored value
        length: usize,
    },

    /// Tag verification failed: tampered data or wrong key.
    #[error("ciphertext authentication failed")]
    Authentication,

    /// Decrypted bytes are not UTF-8.
    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,

    /// Encryption itself failed.
    #[error("encryption failed")]
    EncryptionFailed,
}

/// Symmetric cipher for subscriber secrets.
///
/// Cheap to clone; clones share the key schedule. Safe for concurrent use
/// from any number of delivery pipelines.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Arc<Aes256Gcm>,
}

impl SecretCipher {
    /// Creates a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` unless the key is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey { length: key.len() });
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKey { length: key.len() })?;

        Ok(Self { cipher: Arc::new(cipher) })
    }

    /// Encrypts a plaintext secret for storage.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if sealing fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&sealed))
    }

    /// Decrypts a stored secret.
    ///
    /// The plaintext is wiped from memory when the returned value drops.
    ///
    /// # Errors
    ///
    /// Returns `Encoding`, `Truncated`, `Authentication` or `InvalidUtf8`
    /// depending on how the stored value is broken.
    pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<String>, CryptoError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding { message: e.to_string() })?;

        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated { length: sealed.len() });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::Authentication)?,
        );

        let secret = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::InvalidUtf8)?;
        Ok(Zeroizing::new(secret.to_owned()))
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").field("algorithm", &"AES-256-GCM").finish_non_exhaustive()
    }
}
