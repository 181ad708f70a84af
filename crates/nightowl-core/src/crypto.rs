//! At-rest encryption of tenant-configured provider credentials, keyed by
//! the process-wide secret key described in the Environment section.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Context, Result};

/// A 32-byte key parsed from the hex-encoded `NIGHTOWL__SECURITY__SECRET_KEY`
/// environment value. Constructed once at process start; never mutated.
#[derive(Clone)]
pub struct SecretKey(Key<Aes256Gcm>);

impl SecretKey {
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value).context("secret key must be hex-encoded")?;
        if bytes.len() != 32 {
            return Err(anyhow!("secret key must decode to exactly 32 bytes, got {}", bytes.len()));
        }
        Ok(Self(*Key::<Aes256Gcm>::from_slice(&bytes)))
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext` hex-encoded for
    /// storage in a `jsonb` column.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.0);
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| anyhow!("encryption failed"))?;
        let mut out = nonce_bytes.to_vec();
        out.extend(ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let raw = hex::decode(encoded).context("ciphertext must be hex-encoded")?;
        if raw.len() < 12 {
            return Err(anyhow!("ciphertext too short to contain a nonce"));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let cipher = Aes256Gcm::new(&self.0);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow!("decryption failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let key = SecretKey::from_hex(&"ab".repeat(32)).unwrap();
        let ciphertext = key.encrypt(b"slack-bot-token").unwrap();
        assert_ne!(ciphertext.as_bytes(), b"slack-bot-token");
        let plaintext = key.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"slack-bot-token");
    }

    #[test]
    fn rejects_short_keys() {
        assert!(SecretKey::from_hex("ab").is_err());
    }
}
