use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use aes_gcm::aead::generic_array::GenericArray;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::env;

use crate::error::WarmupError;

const NONCE_SIZE: usize = 12;

/// AES-256-GCM credential vault (spec §4.2 / C2). Every `Account` password
/// at rest is ciphertext produced by this service; plaintext only exists
/// transiently inside the transport layer's SMTP/IMAP login calls.
pub struct EncryptionService {
    cipher: Aes256Gcm,
    key_id: String,
}

impl EncryptionService {
    pub fn new() -> Result<Self, WarmupError> {
        let key_str = env::var("ENCRYPTION_KEY").map_err(|_| {
            WarmupError::EncryptionUnavailable("ENCRYPTION_KEY environment variable not set".into())
        })?;

        let key_bytes = BASE64
            .decode(&key_str)
            .map_err(|e| WarmupError::EncryptionUnavailable(format!("invalid ENCRYPTION_KEY format: {e}")))?;

        if key_bytes.len() != 32 {
            return Err(WarmupError::EncryptionUnavailable(
                "ENCRYPTION_KEY must be 32 bytes (256 bits) when decoded".into(),
            ));
        }

        let key = GenericArray::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);

        let key_id = env::var("ENCRYPTION_KEY_ID").unwrap_or_else(|_| "default-key-v1".to_string());

        Ok(Self { cipher, key_id })
    }

    pub fn new_with_key(key_bytes: &[u8], key_id: &str) -> Result<Self, WarmupError> {
        if key_bytes.len() != 32 {
            return Err(WarmupError::EncryptionUnavailable("key must be 32 bytes (256 bits)".into()));
        }

        let key = GenericArray::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);

        Ok(Self {
            cipher,
            key_id: key_id.to_string(),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<(Vec<u8>, String), WarmupError> {
        use rand::RngCore;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| WarmupError::EncryptionUnavailable(format!("encryption failed: {e}")))?;

        let mut result = nonce_bytes.to_vec();
        result.extend(ciphertext);

        Ok((result, self.key_id.clone()))
    }

    pub fn decrypt(&self, encrypted_data: &[u8]) -> Result<String, WarmupError> {
        if encrypted_data.len() < NONCE_SIZE {
            return Err(WarmupError::EncryptionUnavailable("encrypted data too short".into()));
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| WarmupError::EncryptionUnavailable(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| WarmupError::EncryptionUnavailable(format!("invalid utf-8 in decrypted data: {e}")))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

pub fn generate_encryption_key() -> String {
    use rand::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [0u8; 32];
        let service = EncryptionService::new_with_key(&key, "test-key").unwrap();

        let plaintext = "my-secret-password";
        let (encrypted, key_id) = service.encrypt(plaintext).unwrap();

        assert_eq!(key_id, "test-key");
        assert_ne!(encrypted, plaintext.as_bytes());

        let decrypted = service.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_generate_key() {
        let key = generate_encryption_key();
        let decoded = BASE64.decode(&key).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_wrong_key_fails() {
        let service_a = EncryptionService::new_with_key(&[1u8; 32], "a").unwrap();
        let service_b = EncryptionService::new_with_key(&[2u8; 32], "b").unwrap();

        let (encrypted, _) = service_a.encrypt("hunter2").unwrap();
        assert!(service_b.decrypt(&encrypted).is_err());
    }
}
