//! Encryption providers.
//!
//! [`AesGcmProvider`] writes `enc:v1:` + base64(nonce || ciphertext || tag) and
//! recognizes its own output by that prefix. [`looks_like_base64_ciphertext`] is a
//! structural check for providers whose output is bare base64.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::core::EncryptionProvider;
use crate::error::{MigrateError, ProviderError, Result};

/// Prefix marking values written by [`AesGcmProvider`].
pub const CIPHERTEXT_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Minimum length of a base64 string considered ciphertext.
const MIN_BASE64_CIPHERTEXT_LEN: usize = 24;

/// Heuristic: does the value look like base64-encoded ciphertext?
///
/// Only the base64 alphabet, at least 24 characters, and either a multiple of
/// four long or padded. Short alphanumeric plaintext can still match; providers
/// that tag their output should detect the tag instead.
pub fn looks_like_base64_ciphertext(value: &str) -> bool {
    if value.len() < MIN_BASE64_CIPHERTEXT_LEN {
        return false;
    }
    let alphabet = |c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=');
    value.chars().all(alphabet) && (value.len() % 4 == 0 || value.ends_with('='))
}

/// AES-256-GCM with a random 96-bit nonce per value.
pub struct AesGcmProvider {
    cipher: Aes256Gcm,
}

impl AesGcmProvider {
    /// Build a provider from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(MigrateError::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// Build a provider from a base64-encoded key.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = B64
            .decode(encoded.trim())
            .map_err(|e| MigrateError::Config(format!("encryption key is not base64: {}", e)))?;
        Self::new(&key)
    }

    /// Build a provider from the base64 key stored in an environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let encoded = std::env::var(var).map_err(|_| {
            MigrateError::Config(format!(
                "environment variable {} must hold a base64-encoded 32-byte key",
                var
            ))
        })?;
        Self::from_base64_key(&encoded)
    }

    /// Reverse [`EncryptionProvider::encrypt`], for audit and rollback checks.
    pub fn decrypt(&self, value: &str) -> std::result::Result<String, ProviderError> {
        let encoded = value
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| ProviderError("value does not carry the ciphertext prefix".into()))?;
        let bytes = B64
            .decode(encoded)
            .map_err(|e| ProviderError(format!("invalid base64: {}", e)))?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(ProviderError("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProviderError("decryption failed (wrong key or tampered value)".into()))?;
        String::from_utf8(plaintext).map_err(|e| ProviderError(format!("invalid UTF-8: {}", e)))
    }
}

impl EncryptionProvider for AesGcmProvider {
    fn encrypt(&self, plaintext: &str) -> std::result::Result<String, ProviderError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| ProviderError(format!("encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", CIPHERTEXT_PREFIX, B64.encode(payload)))
    }

    fn looks_encrypted(&self, value: &str) -> bool {
        value
            .strip_prefix(CIPHERTEXT_PREFIX)
            .map(looks_like_base64_ciphertext)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AesGcmProvider {
        AesGcmProvider::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let p = provider();
        let ct = p.encrypt("a@example.com").unwrap();
        assert!(ct.starts_with(CIPHERTEXT_PREFIX));
        assert!(p.looks_encrypted(&ct));
        assert_eq!(p.decrypt(&ct).unwrap(), "a@example.com");
    }

    #[test]
    fn test_nonces_are_unique() {
        let p = provider();
        assert_ne!(p.encrypt("same").unwrap(), p.encrypt("same").unwrap());
    }

    #[test]
    fn test_plaintext_is_not_detected() {
        let p = provider();
        assert!(!p.looks_encrypted("a@example.com"));
        assert!(!p.looks_encrypted("enc:v1:short"));
        assert!(!p.looks_encrypted(""));
    }

    #[test]
    fn test_wrong_key_fails() {
        let ct = provider().encrypt("secret").unwrap();
        let other = AesGcmProvider::new(&[9u8; KEY_LEN]).unwrap();
        assert!(other.decrypt(&ct).is_err());
    }

    #[test]
    fn test_key_length_checked() {
        assert!(AesGcmProvider::new(&[0u8; 16]).is_err());
        assert!(AesGcmProvider::from_base64_key("not base64!").is_err());
        let encoded = B64.encode([1u8; KEY_LEN]);
        assert!(AesGcmProvider::from_base64_key(&encoded).is_ok());
    }

    #[test]
    fn test_base64_heuristic() {
        assert!(looks_like_base64_ciphertext("QUJDREVGR0hJSktMTU5PUFFSU1RV"));
        assert!(looks_like_base64_ciphertext("QUJDREVGR0hJSktMTU5PUFFSU1Q="));
        assert!(!looks_like_base64_ciphertext("hello world, this is plain text"));
        assert!(!looks_like_base64_ciphertext("c2hvcnQ="));
        assert!(!looks_like_base64_ciphertext("QUJDREVGR0hJSktMTU5PUFFSU1RVV"));
    }
}
