use crate::error::{Error, Result};
use crate::KeyManagementService;
use crate::crypto::{Aes256GcmAead, AeadImpl};
use async_trait::async_trait;
use securememory::protected_memory::DefaultSecretFactory;
use securememory::{Secret, SecretFactory};
use std::io::Read;
use zeroize::Zeroize;

/// A static key management service for testing
///
/// This implementation uses a single fixed master key, held in a secure-memory
/// secret rather than a plain byte vector, for encryption/decryption of system keys.
/// Useful for exercising the engine in tests and examples; a production deployment
/// should implement `KeyManagementService` against a real cloud KMS instead.
pub struct StaticKeyManagementService {
    /// The static master key, held off-heap behind `securememory`'s protection.
    master_key: Box<dyn Secret + Send + Sync>,
    /// AEAD implementation for encryption/decryption
    aead: Aes256GcmAead,
}

impl StaticKeyManagementService {
    /// Creates a new StaticKeyManagementService with the given master key.
    ///
    /// `master_key` is wiped after this call, mirroring the rest of the engine's
    /// secret-handling convention.
    pub fn new(master_key: Vec<u8>) -> Self {
        let factory = DefaultSecretFactory::new();
        let mut master_key = master_key;
        let secret = factory
            .new(&mut master_key)
            .expect("failed to allocate secure memory for static master key");

        Self {
            master_key: Box::new(secret),
            aead: Aes256GcmAead::new(),
        }
    }

    fn with_master_key<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        if self.master_key.is_closed() {
            return Err(Error::SecretClosed);
        }

        let mut buf = vec![0_u8; self.master_key.len()];
        let mut reader = self.master_key.reader().map_err(Error::from)?;
        reader.read_exact(&mut buf).map_err(Error::Io)?;
        let result = action(&buf);
        buf.zeroize();
        result
    }
}

impl std::fmt::Debug for StaticKeyManagementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyManagementService")
            .field("master_key", &"<hidden>")
            .finish()
    }
}

#[async_trait]
impl KeyManagementService for StaticKeyManagementService {
    async fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.with_master_key(|master_key| self.aead.encrypt(key, master_key))
    }

    async fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        self.with_master_key(|master_key| self.aead.decrypt(encrypted_key, master_key))
    }
}
