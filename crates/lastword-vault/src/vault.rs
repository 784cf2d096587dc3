//! Capability-gated reveal.

use bytes::Bytes;

use lastword_core::{Blake3Hash, Ed25519PublicKey, MessageId, ReleaseCapability, SealedPayload};

use crate::crypto::{ContentKey, VaultSecret};
use crate::envelope::{EnvelopeFormat, SealedEnvelope};
use crate::error::{Result, VaultError};

/// Decrypted content, only ever produced for a message in `Delivering`.
#[derive(Clone, PartialEq, Eq)]
pub struct RevealedContent {
    pub plaintext: Bytes,
    pub digest: Blake3Hash,
}

impl std::fmt::Debug for RevealedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealedContent")
            .field("len", &self.plaintext.len())
            .field("digest", &self.digest)
            .finish()
    }
}

/// Holds the release key and the authority key capabilities are checked
/// against.
///
/// Revealing is a pure function of the sealed bytes and the capability, so
/// repeated reveals for the same message return the same plaintext.
#[derive(Debug)]
pub struct Vault {
    secret: VaultSecret,
    authority: Ed25519PublicKey,
}

impl Vault {
    /// Create a vault.
    pub fn new(secret: VaultSecret, authority: Ed25519PublicKey) -> Self {
        Self { secret, authority }
    }

    /// The key sealers encrypt to.
    pub fn public_key(&self) -> crate::VaultPublicKey {
        self.secret.public_key()
    }

    /// Reveal `sealed` for `message_id`.
    ///
    /// Checks, in order, and fails closed on the first problem:
    /// - the capability is signed by the authority
    /// - the capability is for this message
    /// - the capability digest matches the stored digest
    /// - the envelope decrypts
    /// - the plaintext hashes to the stored digest
    pub fn reveal(
        &self,
        message_id: &MessageId,
        sealed: &SealedPayload,
        capability: &ReleaseCapability,
    ) -> Result<RevealedContent> {
        capability
            .verify(&self.authority)
            .map_err(|e| VaultError::CapabilityRejected(e.to_string()))?;

        if capability.message_id != *message_id {
            return Err(VaultError::CapabilityMismatch {
                capability: capability.message_id.to_hex(),
                requested: message_id.to_hex(),
            });
        }

        if !capability.payload_digest.ct_eq(&sealed.digest) {
            tracing::error!(message_id = %message_id, "capability digest does not match stored digest");
            return Err(VaultError::IntegrityMismatch(
                "capability digest differs from stored digest".into(),
            ));
        }

        let envelope = SealedEnvelope::from_bytes(&sealed.bytes)?;
        let plaintext = self.open(&envelope)?;

        let digest = Blake3Hash::hash(&plaintext);
        if !digest.ct_eq(&sealed.digest) {
            tracing::error!(message_id = %message_id, "decrypted content does not match stored digest");
            return Err(VaultError::IntegrityMismatch(format!(
                "expected {}, got {}",
                sealed.digest.to_hex(),
                digest.to_hex()
            )));
        }

        Ok(RevealedContent {
            plaintext: Bytes::from(plaintext),
            digest,
        })
    }

    fn open(&self, envelope: &SealedEnvelope) -> Result<Vec<u8>> {
        match envelope.format {
            EnvelopeFormat::X25519ChaCha20Poly1305 => {
                let wrap_key = self
                    .secret
                    .wrap_key(&envelope.ephemeral_public, &envelope.context);
                let key_bytes =
                    wrap_key.decrypt(&envelope.wrapped_key, &envelope.context, &envelope.key_nonce)?;
                let key_bytes: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
                    VaultError::DecryptionError(format!(
                        "invalid content key length: expected 32, got {}",
                        key_bytes.len()
                    ))
                })?;
                ContentKey::from_bytes(key_bytes).decrypt(
                    &envelope.ciphertext,
                    &envelope.context,
                    &envelope.payload_nonce,
                )
            }
        }
    }
}
