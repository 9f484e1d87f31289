use crate::crypto::aead::{fill_random, AeadImpl};
use crate::error::{Error, Result};
use crate::Aead;
use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit},
    Aes256Gcm, Key as AesKey, Nonce,
};

use super::aead::{GCM_MAX_DATA_SIZE, GCM_NONCE_SIZE, GCM_TAG_SIZE};

/// AES-256-GCM implementation of AEAD
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmAead;

impl Aes256GcmAead {
    /// Creates a new instance of the AES-256-GCM AEAD implementation
    pub fn new() -> Self {
        Self
    }
}

impl AeadImpl for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::Crypto("Data too large for GCM".into()));
        }

        // Convert the key to AES format
        let cipher_key = AesKey::<Aes256Gcm>::from_slice(key);

        // Create the cipher
        let cipher = Aes256Gcm::new(cipher_key);

        let mut nonce_bytes = [0_u8; GCM_NONCE_SIZE];
        fill_random(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Encrypt the data
        let ciphertext = cipher
            .encrypt(nonce, data)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        // Wire format is ciphertext_and_tag followed by the nonce, matching the
        // on-disk/on-wire layout produced by other language implementations of
        // this envelope scheme.
        let mut cipher_and_nonce = Vec::with_capacity(ciphertext.len() + GCM_NONCE_SIZE);
        cipher_and_nonce.extend_from_slice(&ciphertext);
        cipher_and_nonce.extend_from_slice(&nonce_bytes);

        Ok(cipher_and_nonce)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
            // Must have at least nonce and tag
            return Err(Error::DecryptionFailed(
                "data length is too short for GCM (ciphertext + tag + nonce)".into(),
            ));
        }

        // Convert the key to AES format
        let cipher_key = AesKey::<Aes256Gcm>::from_slice(key);

        // Create the cipher
        let cipher = Aes256Gcm::new(cipher_key);

        let split = data.len() - GCM_NONCE_SIZE;
        let nonce = Nonce::from_slice(&data[split..]);

        // Decrypt the data
        let plaintext = cipher
            .decrypt(nonce, &data[..split]) // ciphertext + tag precedes the nonce
            .map_err(|e| Error::DecryptionFailed(format!("{}", e)))?;

        Ok(plaintext)
    }
}

impl Aead for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        AeadImpl::encrypt(self, data, key)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        AeadImpl::decrypt(self, data, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38D AES-256-GCM known-answer vector: all-zero 32-byte key,
    // all-zero 12-byte IV, empty plaintext and AAD. Pins this implementation's
    // ciphertext||tag||nonce layout against a known answer rather than just
    // round-tripping our own output through itself.
    #[test]
    fn test_decrypt_known_answer_vector() {
        let key = hex::decode("0".repeat(64)).expect("valid hex key");
        let nonce = hex::decode("000000000000000000000000").expect("valid hex nonce");
        let tag = hex::decode("530f8afbc74536b9a963b4f1c4cb738b").expect("valid hex tag");

        // Plaintext is empty, so ciphertext is empty: wire bytes are tag || nonce.
        let mut cipher_and_nonce = tag;
        cipher_and_nonce.extend_from_slice(&nonce);

        let aead = Aes256GcmAead::new();
        let plaintext = aead
            .decrypt(&cipher_and_nonce, &key)
            .expect("known-answer vector must decrypt");
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let aead = Aes256GcmAead::new();
        let key = vec![0x42_u8; 32];
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let ciphertext = aead.encrypt(plaintext, &key).expect("encrypt");
        assert_ne!(ciphertext.as_slice(), plaintext);

        let decrypted = aead.decrypt(&ciphertext, &key).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let aead = Aes256GcmAead::new();
        let key = vec![0x7_u8; 32];
        let mut ciphertext = aead.encrypt(b"hello world", &key).expect("encrypt");
        ciphertext[0] ^= 0xFF;

        let result = aead.decrypt(&ciphertext, &key);
        assert!(result.is_err());
    }

    #[test]
    fn test_decrypt_rejects_short_input() {
        let aead = Aes256GcmAead::new();
        let key = vec![0x1_u8; 32];
        let result = aead.decrypt(&[0_u8; 4], &key);
        assert!(result.is_err());
    }
}
