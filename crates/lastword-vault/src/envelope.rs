//! Sealed envelope format and the [`Sealer`].
//!
//! A message's content is encrypted under a fresh content key. The content
//! key is wrapped to the vault's release key with an ephemeral X25519
//! exchange, so whoever seals a message can never open it again; only the
//! vault can, and only with a release capability.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use lastword_core::{Blake3Hash, SealedPayload};

use crate::crypto::{ContentKey, ContentNonce, EphemeralKeyPair, VaultPublicKey};
use crate::error::{Result, VaultError};

/// Envelope format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeFormat {
    /// X25519 wrap + ChaCha20-Poly1305, digest is blake3 of the plaintext.
    X25519ChaCha20Poly1305 = 1,
}

/// The CBOR structure stored in [`SealedPayload::bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub format: EnvelopeFormat,
    /// Caller-supplied binding (typically the owner id); authenticated.
    pub context: Vec<u8>,
    pub ephemeral_public: VaultPublicKey,
    pub wrapped_key: Vec<u8>,
    pub key_nonce: ContentNonce,
    pub payload_nonce: ContentNonce,
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| VaultError::EncryptionError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| VaultError::MalformedEnvelope(e.to_string()))
    }
}

/// Seals plaintext to a vault's public release key.
#[derive(Debug, Clone, Copy)]
pub struct Sealer {
    vault: VaultPublicKey,
}

impl Sealer {
    /// Seal to `vault`.
    pub fn new(vault: VaultPublicKey) -> Self {
        Self { vault }
    }

    /// Encrypt `plaintext` and compute its integrity digest.
    pub fn seal(&self, plaintext: &[u8], context: &[u8]) -> Result<SealedPayload> {
        let content_key = ContentKey::generate();
        let payload_nonce = ContentNonce::generate();
        let ciphertext = content_key.encrypt(plaintext, context, &payload_nonce)?;

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let wrap_key = ephemeral.wrap_key(&self.vault, context);
        let key_nonce = ContentNonce::generate();
        let wrapped_key = wrap_key.encrypt(content_key.as_bytes(), context, &key_nonce)?;

        let envelope = SealedEnvelope {
            format: EnvelopeFormat::X25519ChaCha20Poly1305,
            context: context.to_vec(),
            ephemeral_public,
            wrapped_key,
            key_nonce,
            payload_nonce,
            ciphertext,
        };

        Ok(SealedPayload {
            bytes: Bytes::from(envelope.to_bytes()?),
            digest: Blake3Hash::hash(plaintext),
        })
    }
}
