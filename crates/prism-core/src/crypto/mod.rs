//! AES-256-GCM sealing for platform credentials at rest.
//!
//! Stored form is `base64(nonce || ciphertext)` with a random 96-bit nonce
//! per encryption, so sealing the same plaintext twice yields different
//! blobs. Plaintext tokens exist only on the stack of the caller.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed")]
    Decrypt,
    #[error("Ciphertext is malformed: {0}")]
    Malformed(String),
}

/// Seals and opens credential strings with a key derived from config.
#[derive(Clone)]
pub struct TokenVault {
    key: [u8; 32],
}

impl TokenVault {
    /// Derive the 32-byte AES key from the configured encryption key string.
    pub fn new(encryption_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(encryption_key.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt a plaintext token. Returns base64(nonce || ciphertext).
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Encrypt)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a sealed token back to plaintext.
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::Malformed("blob shorter than nonce".to_string()));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Decrypt)?;
        let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
        let plaintext = cipher
            .decrypt(nonce, &blob[NONCE_LEN..])
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let vault = TokenVault::new("unit-test-key");
        let sealed = vault.seal("ya29.secret-access-token").unwrap();
        assert_eq!(vault.open(&sealed).unwrap(), "ya29.secret-access-token");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let vault = TokenVault::new("unit-test-key");
        let a = vault.seal("same-plaintext").unwrap();
        let b = vault.seal("same-plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.open(&a).unwrap(), vault.open(&b).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let vault = TokenVault::new("key-one");
        let sealed = vault.seal("secret").unwrap();
        let other = TokenVault::new("key-two");
        assert!(matches!(other.open(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = TokenVault::new("unit-test-key");
        let sealed = vault.seal("secret").unwrap();
        let mut blob = BASE64.decode(&sealed).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let tampered = BASE64.encode(blob);
        assert!(matches!(vault.open(&tampered), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_malformed_blob_rejected() {
        let vault = TokenVault::new("unit-test-key");
        assert!(matches!(vault.open("@@@"), Err(CryptoError::Malformed(_))));
        assert!(matches!(
            vault.open(&BASE64.encode([0u8; 8])),
            Err(CryptoError::Malformed(_))
        ));
    }
}
