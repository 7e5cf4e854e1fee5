//! Encryption of sensitive settings and lookup of decrypted secrets.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::consts::SECRET_KEY_ENV;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Passphrase used when [`SECRET_KEY_ENV`] is unset. Only suitable for local
/// development: anyone with the source can decrypt values sealed with it.
const DEV_PASSPHRASE: &str = "promptrelay-development-key";

/// Symmetric encryption for values stored in the settings table.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Something that can hand out a decrypted secret by setting key.
///
/// `None` covers every failure (missing key, empty value, bad ciphertext);
/// callers treat all of them as "not configured".
pub trait SecretResolver: Send + Sync {
    fn resolve_secret(&self, key: &str) -> Option<String>;
}

/// AES-256-GCM keyed by the SHA-256 of a passphrase.
///
/// Ciphertext is `base64(nonce || sealed)` with a fresh random nonce per call.
pub struct AesCipher {
    cipher: Aes256Gcm,
}

impl AesCipher {
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            bail!("encryption passphrase must not be empty");
        }
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow!("derived key has the wrong length"))?;
        Ok(Self { cipher })
    }

    /// Build from the passphrase in the environment, falling back to a fixed
    /// development passphrase.
    pub fn from_env() -> Result<Self> {
        match std::env::var(SECRET_KEY_ENV) {
            Ok(passphrase) if !passphrase.is_empty() => Self::from_passphrase(&passphrase),
            _ => {
                warn!(
                    env = SECRET_KEY_ENV,
                    "encryption passphrase not set, using the development key"
                );
                Self::from_passphrase(DEV_PASSPHRASE)
            }
        }
    }
}

impl Cipher for AesCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .context("ciphertext is not valid base64")?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            bail!("ciphertext is too short");
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| anyhow!("decryption failed: wrong key or corrupted value"))?;
        String::from_utf8(plain).context("decrypted value is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypts() {
        let cipher = AesCipher::from_passphrase("hunter2").unwrap();
        let sealed = cipher.encrypt("sk-live-123").unwrap();
        assert_ne!(sealed, "sk-live-123");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "sk-live-123");
    }

    #[test]
    fn nonce_differs_per_call() {
        let cipher = AesCipher::from_passphrase("hunter2").unwrap();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = AesCipher::from_passphrase("a").unwrap().encrypt("secret").unwrap();
        let other = AesCipher::from_passphrase("b").unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let cipher = AesCipher::from_passphrase("hunter2").unwrap();
        assert!(cipher.decrypt("not base64!").is_err());
        assert!(cipher.decrypt("AAAA").is_err());
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        assert!(AesCipher::from_passphrase("").is_err());
    }
}
