//! At-rest encryption for router and PPPoE credentials.
//!
//! Blobs are `base64(nonce || ciphertext || tag)` under AES-256-GCM with a
//! key derived from the master secret by SHA-256.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("master encryption key is empty")]
    EmptyKey,
    #[error("encryption failed")]
    Encrypt,
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("ciphertext too short")]
    TooShort,
    #[error("decryption failed")]
    Decrypt,
    #[error("decrypted payload is not utf-8")]
    Utf8,
}

/// Process-wide cipher; the key never changes after startup.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Vault(..)")
    }
}

impl Vault {
    pub fn new(master_secret: &str) -> Result<Self, CryptoError> {
        if master_secret.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        let digest = Sha256::digest(master_secret.as_bytes());
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest));
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let combined = STANDARD.decode(blob.trim())?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_reverses_encrypt() {
        let vault = Vault::new("master").unwrap();
        let blob = vault.encrypt("s3cret-pppoe").unwrap();
        assert_ne!(blob, "s3cret-pppoe");
        assert_eq!(vault.decrypt(&blob).unwrap(), "s3cret-pppoe");
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let vault = Vault::new("master").unwrap();
        assert_ne!(vault.encrypt("same").unwrap(), vault.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let blob = Vault::new("master").unwrap().encrypt("router-admin").unwrap();
        let other = Vault::new("another").unwrap();
        assert!(matches!(other.decrypt(&blob), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let vault = Vault::new("master").unwrap();
        let mut raw = STANDARD.decode(vault.encrypt("router-admin").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(matches!(vault.decrypt(&STANDARD.encode(raw)), Err(CryptoError::Decrypt)));
        assert!(matches!(vault.decrypt(&STANDARD.encode([0u8; 8])), Err(CryptoError::TooShort)));
    }

    #[test]
    fn empty_master_key_is_refused() {
        assert!(matches!(Vault::new(""), Err(CryptoError::EmptyKey)));
    }
}
