/// Encryption of secrets at rest
///
/// OAuth token pairs are stored as AES-256-GCM ciphertext. Every call
/// to `encrypt` draws a fresh random nonce, so identical plaintexts
/// never produce identical ciphertexts; tampering is detected by the
/// GCM tag and surfaces as a `Crypto` error.
use crate::error::{PayflowError, PayflowResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::Engine;
use rand::RngCore;

const NONCE_LEN: usize = 12;

/// Cipher for tokens and other secrets, keyed by the process-wide
/// master key.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build a cipher from a base64-encoded 256-bit master key.
    ///
    /// Fails if the decoded key is not exactly 32 bytes.
    pub fn from_base64_key(master_key: &str) -> PayflowResult<Self> {
        let key_bytes = base64::engine::general_purpose::URL_SAFE
            .decode(master_key)
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(master_key))
            .map_err(|e| PayflowError::Config(format!("MASTER_KEY is not valid base64: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(PayflowError::Config(format!(
                "MASTER_KEY must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a plaintext string, returning base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> PayflowResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| PayflowError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::URL_SAFE.encode(out))
    }

    /// Decrypt a ciphertext produced by `encrypt`.
    ///
    /// Corrupt input, or ciphertext produced under a different key,
    /// fails with a `Crypto` error and never returns garbage.
    pub fn decrypt(&self, ciphertext: &str) -> PayflowResult<String> {
        let raw = base64::engine::general_purpose::URL_SAFE
            .decode(ciphertext)
            .map_err(|_| PayflowError::Crypto("ciphertext is not valid base64".to_string()))?;

        if raw.len() <= NONCE_LEN {
            return Err(PayflowError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce_bytes, payload) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|_| PayflowError::Crypto("decryption failed (corrupt or foreign key)".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| PayflowError::Crypto("decrypted payload is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        let key = base64::engine::general_purpose::URL_SAFE.encode([7u8; 32]);
        SecretCipher::from_base64_key(&key).unwrap()
    }

    #[test]
    fn round_trip() {
        let cipher = test_cipher();
        let plaintext = "refresh-token-abc123";
        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn rejects_non_ciphertext() {
        let cipher = test_cipher();
        assert!(matches!(
            cipher.decrypt("not base64 at all!!!"),
            Err(PayflowError::Crypto(_))
        ));
        assert!(matches!(
            cipher.decrypt("aGVsbG8="),
            Err(PayflowError::Crypto(_))
        ));
    }

    #[test]
    fn rejects_foreign_key_ciphertext() {
        let cipher = test_cipher();
        let other_key = base64::engine::general_purpose::URL_SAFE.encode([9u8; 32]);
        let other = SecretCipher::from_base64_key(&other_key).unwrap();
        let encrypted = other.encrypt("secret").unwrap();
        assert!(matches!(
            cipher.decrypt(&encrypted),
            Err(PayflowError::Crypto(_))
        ));
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("secret").unwrap();
        let mut raw = base64::engine::general_purpose::URL_SAFE
            .decode(&encrypted)
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = base64::engine::general_purpose::URL_SAFE.encode(raw);
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(PayflowError::Crypto(_))
        ));
    }

    #[test]
    fn rejects_short_key() {
        let short = base64::engine::general_purpose::URL_SAFE.encode([1u8; 16]);
        assert!(SecretCipher::from_base64_key(&short).is_err());
    }
}
