//! Cryptographic building blocks for the vault.
//!
//! X25519 key agreement for wrapping per-message content keys to the vault's
//! release key, and ChaCha20-Poly1305 with associated data for the content
//! itself.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{Result, VaultError};

/// blake3 derive-key context for wrap keys.
const WRAP_KEY_CONTEXT: &str = "lastword-vault-v1 content-key wrap";

/// The vault's public release key (X25519). Sealers only need this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPublicKey(pub [u8; 32]);

impl VaultPublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for VaultPublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// The vault's secret release key. Only the vault holds it.
pub struct VaultSecret(StaticSecret);

impl VaultSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derive the public key.
    pub fn public_key(&self) -> VaultPublicKey {
        VaultPublicKey::from(PublicKey::from(&self.0))
    }

    /// Recover the wrap key for an envelope sealed with `ephemeral`.
    pub(crate) fn wrap_key(&self, ephemeral: &VaultPublicKey, context: &[u8]) -> ContentKey {
        let shared = self.0.diffie_hellman(&ephemeral.to_dalek());
        derive_wrap_key(shared.as_bytes(), context)
    }
}

impl std::fmt::Debug for VaultSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VaultSecret({:?})", self.public_key())
    }
}

/// One-shot sender key for wrapping a single content key.
pub(crate) struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: VaultPublicKey,
}

impl EphemeralKeyPair {
    pub(crate) fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = VaultPublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub(crate) fn public_key(&self) -> VaultPublicKey {
        self.public
    }

    /// Consumes the ephemeral secret.
    pub(crate) fn wrap_key(self, vault: &VaultPublicKey, context: &[u8]) -> ContentKey {
        let shared = self.secret.diffie_hellman(&vault.to_dalek());
        derive_wrap_key(shared.as_bytes(), context)
    }
}

fn derive_wrap_key(shared: &[u8; 32], context: &[u8]) -> ContentKey {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(context);
    ContentKey(*hasher.finalize().as_bytes())
}

/// A 256-bit ChaCha20-Poly1305 key.
#[derive(Clone)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8], nonce: &ContentNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| VaultError::EncryptionError(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(&nonce.0), Payload { msg: plaintext, aad })
            .map_err(|e| VaultError::EncryptionError(e.to_string()))
    }

    /// Decrypt `ciphertext`; fails if it or `aad` was tampered with.
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8], nonce: &ContentNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| VaultError::DecryptionError(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce.0), Payload { msg: ciphertext, aad })
            .map_err(|e| VaultError::DecryptionError(e.to_string()))
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// A 96-bit ChaCha20-Poly1305 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNonce(pub [u8; 12]);

impl ContentNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_wrap_key_agreement() {
        let vault = VaultSecret::generate();
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let sender_key = ephemeral.wrap_key(&vault.public_key(), b"ctx");
        let vault_key = vault.wrap_key(&ephemeral_public, b"ctx");
        assert_eq!(sender_key.as_bytes(), vault_key.as_bytes());
    }

    #[test]
    fn test_wrap_key_bound_to_context() {
        let vault = VaultSecret::generate();
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let sender_key = ephemeral.wrap_key(&vault.public_key(), b"user-a");
        let vault_key = vault.wrap_key(&ephemeral_public, b"user-b");
        assert_ne!(sender_key.as_bytes(), vault_key.as_bytes());
    }

    #[test]
    fn test_aad_is_authenticated() {
        let key = ContentKey::generate();
        let nonce = ContentNonce::generate();
        let ciphertext = key.encrypt(b"last words", b"aad-1", &nonce).unwrap();

        assert_eq!(key.decrypt(&ciphertext, b"aad-1", &nonce).unwrap(), b"last words");
        assert!(key.decrypt(&ciphertext, b"aad-2", &nonce).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let nonce = ContentNonce::generate();
        let ciphertext = ContentKey::generate().encrypt(b"secret", b"", &nonce).unwrap();
        assert!(ContentKey::generate().decrypt(&ciphertext, b"", &nonce).is_err());
    }
}
